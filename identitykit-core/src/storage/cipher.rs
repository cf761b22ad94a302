//! AES-CBC + HMAC-SHA256 encrypt-then-MAC over [`EncryptedBlob`]s.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{
    blob::{EncryptedBlob, IV_LEN},
    key_version::KeyVersion,
};
use crate::error::{StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

/// Symmetric storage key (AES-128, AES-192 or AES-256).
///
/// # Security
///
/// - Zeroized on drop.
/// - Never logged; use [`SecretKey::thumbprint`] to identify it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    /// Wraps raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Crypto`] unless the key is 16, 24 or 32 bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> StorageResult<Self> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes)),
            len => {
                let mut bytes = bytes;
                bytes.zeroize();
                Err(StorageError::Crypto(format!("invalid AES key length {len}")))
            }
        }
    }

    /// Generates a random 256-bit key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw key bytes. Treat as sensitive.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key used for the HMAC: SHA-256 of the raw key.
    fn mac_key(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(Sha256::digest(&self.0).into())
    }

    /// Stable identifier of this key: base64 of SHA-256 of the HMAC key.
    #[must_use]
    pub fn thumbprint(&self) -> String {
        STANDARD.encode(Sha256::digest(self.mac_key().as_slice()))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("len", &self.0.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn mac_for(key: &SecretKey, authenticated: &[u8]) -> StorageResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key.mac_key().as_slice())
        .map_err(|err| StorageError::Crypto(err.to_string()))?;
    mac.update(authenticated);
    Ok(mac)
}

/// Encrypts `plaintext` under `key`, tagging the blob with `version`.
pub(crate) fn seal(
    key: &SecretKey,
    version: KeyVersion,
    plaintext: &[u8],
) -> StorageResult<EncryptedBlob> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let raw = key.as_bytes();
    let invalid = |err: cbc::cipher::InvalidLength| StorageError::Crypto(err.to_string());
    let ciphertext = match raw.len() {
        16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(raw, &iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<aes::Aes192>::new_from_slices(raw, &iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(raw, &iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };

    let mut blob = EncryptedBlob {
        key_version: version,
        ciphertext,
        iv,
        mac: [0u8; 32],
    };
    let tag = mac_for(key, &blob.authenticated_bytes())?.finalize().into_bytes();
    blob.mac.copy_from_slice(&tag);
    Ok(blob)
}

/// Verifies and decrypts `blob` under `key`.
///
/// The MAC is checked in constant time before any decryption happens.
pub(crate) fn open(key: &SecretKey, blob: &EncryptedBlob) -> StorageResult<Zeroizing<Vec<u8>>> {
    mac_for(key, &blob.authenticated_bytes())?
        .verify_slice(&blob.mac)
        .map_err(|_| StorageError::Integrity("mac verification failed".to_string()))?;

    let raw = key.as_bytes();
    let invalid = |err: cbc::cipher::InvalidLength| StorageError::Crypto(err.to_string());
    let unpad = |_| StorageError::Integrity("invalid padding".to_string());
    let plaintext = match raw.len() {
        16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(raw, &blob.iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(&blob.ciphertext)
            .map_err(unpad)?,
        24 => cbc::Decryptor::<aes::Aes192>::new_from_slices(raw, &blob.iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(&blob.ciphertext)
            .map_err(unpad)?,
        _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(raw, &blob.iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(&blob.ciphertext)
            .map_err(unpad)?,
    };
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(16 ; "aes128")]
    #[test_case(24 ; "aes192")]
    #[test_case(32 ; "aes256")]
    fn test_seal_open(len: usize) {
        let key = SecretKey::from_bytes(vec![0x5A; len]).expect("key");
        let blob = seal(&key, KeyVersion::UserDefined, b"refresh-token").expect("seal");
        assert_eq!(blob.key_version, KeyVersion::UserDefined);
        assert_eq!(blob.ciphertext.len(), 16);
        let plaintext = open(&key, &blob).expect("open");
        assert_eq!(plaintext.as_slice(), b"refresh-token");
    }

    #[test]
    fn test_open_with_other_key_is_integrity_error() {
        let blob = seal(&SecretKey::generate(), KeyVersion::KeystoreWrapped, b"x").expect("seal");
        match open(&SecretKey::generate(), &blob) {
            Err(StorageError::Integrity(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_marker_is_authenticated() {
        let key = SecretKey::generate();
        let mut blob = seal(&key, KeyVersion::KeystoreWrapped, b"x").expect("seal");
        blob.key_version = KeyVersion::SoftwareDerived;
        assert!(matches!(open(&key, &blob), Err(StorageError::Integrity(_))));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            SecretKey::from_bytes(vec![0; 20]),
            Err(StorageError::Crypto(_))
        ));
    }

    #[test]
    fn test_thumbprint_is_stable_and_key_specific() {
        let key = SecretKey::from_bytes(vec![1; 32]).expect("key");
        let same = SecretKey::from_bytes(vec![1; 32]).expect("key");
        assert_eq!(key.thumbprint(), same.thumbprint());
        assert_ne!(key.thumbprint(), SecretKey::generate().thumbprint());
        assert!(!format!("{key:?}").contains("[1, 1"));
    }
}
