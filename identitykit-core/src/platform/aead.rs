//! XChaCha20-Poly1305 sealing used by the software keystores.
//!
//! Output layout is `nonce (24 bytes) || ciphertext || tag`.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::error::{StorageError, StorageResult};

const NONCE_LEN: usize = 24;

pub(super) fn seal(key: &[u8; 32], aad: &[u8], plaintext: &[u8]) -> StorageResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|err| StorageError::Keystore(format!("wrap failed: {err}")))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(super) fn open(key: &[u8; 32], aad: &[u8], sealed: &[u8]) -> StorageResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(StorageError::Keystore("wrapped key too short".to_string()));
    }
    let (nonce, payload) = sealed.split_at(NONCE_LEN);
    XChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(
            XNonce::from_slice(nonce),
            Payload { msg: payload, aad },
        )
        .map_err(|err| StorageError::Keystore(format!("unwrap failed: {err}")))
}

pub(super) fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}
