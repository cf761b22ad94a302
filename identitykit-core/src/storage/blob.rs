//! Text encoding of encrypted values.
//!
//! ```text
//! c E1 base64( marker(4) | AES-CBC ciphertext | IV(16) | HMAC-SHA256(32) )
//! ^ ^^
//! | encode version
//! 'a' + len(encode version)
//! ```
//!
//! The layout is shared with values already persisted by earlier releases and
//! must not change.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::key_version::KeyVersion;
use crate::error::{StorageError, StorageResult};

/// Current encode version.
pub const ENCODE_VERSION: &str = "E1";

/// Length of the CBC initialization vector.
pub const IV_LEN: usize = 16;

/// Length of the HMAC-SHA256 tag.
pub const MAC_LEN: usize = 32;

const BLOCK_LEN: usize = 16;

/// `'a' + len("E1")`, i.e. `'c'`.
#[allow(clippy::cast_possible_truncation)]
const ENCODE_VERSION_LENGTH_PREFIX: char = (b'a' + ENCODE_VERSION.len() as u8) as char;

/// Decoded form of an encrypted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    /// Key version marker.
    pub key_version: KeyVersion,
    /// AES-CBC ciphertext, PKCS#7 padded.
    pub ciphertext: Vec<u8>,
    /// CBC initialization vector.
    pub iv: [u8; IV_LEN],
    /// HMAC over `marker | ciphertext | iv`.
    pub mac: [u8; MAC_LEN],
}

impl EncryptedBlob {
    /// Whether `text` carries the encrypted-value prefix.
    #[must_use]
    pub fn is_encrypted(text: &str) -> bool {
        let mut chars = text.chars();
        chars.next() == Some(ENCODE_VERSION_LENGTH_PREFIX)
            && chars.as_str().starts_with(ENCODE_VERSION)
            && text.len() > 1 + ENCODE_VERSION.len()
    }

    /// Parses an encrypted value.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Malformed`] if the prefix is missing, the payload is
    ///   not base64 or it is too short to hold every field.
    /// - [`StorageError::Integrity`] if the marker is not a known key version.
    pub fn decode(text: &str) -> StorageResult<Self> {
        if !Self::is_encrypted(text) {
            return Err(StorageError::Malformed(
                "missing encode version prefix".to_string(),
            ));
        }
        let payload = &text[1 + ENCODE_VERSION.len()..];
        let bytes = STANDARD
            .decode(payload)
            .map_err(|err| StorageError::Malformed(format!("invalid base64: {err}")))?;
        Self::from_bytes(&bytes)
    }

    /// Parses the decoded binary layout.
    ///
    /// # Errors
    ///
    /// See [`EncryptedBlob::decode`].
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let min_len = KeyVersion::MARKER_LEN + BLOCK_LEN + IV_LEN + MAC_LEN;
        if bytes.len() < min_len {
            return Err(StorageError::Malformed(format!(
                "blob too short: {} bytes, need at least {min_len}",
                bytes.len()
            )));
        }

        let (marker, rest) = bytes.split_at(KeyVersion::MARKER_LEN);
        let key_version = KeyVersion::from_marker(marker).ok_or_else(|| {
            StorageError::Integrity(format!(
                "unknown key version marker {:?}",
                String::from_utf8_lossy(marker)
            ))
        })?;

        let (rest, mac) = rest.split_at(rest.len() - MAC_LEN);
        let (ciphertext, iv) = rest.split_at(rest.len() - IV_LEN);
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(StorageError::Malformed(format!(
                "ciphertext length {} is not a multiple of the block size",
                ciphertext.len()
            )));
        }

        let mut iv_bytes = [0u8; IV_LEN];
        iv_bytes.copy_from_slice(iv);
        let mut mac_bytes = [0u8; MAC_LEN];
        mac_bytes.copy_from_slice(mac);
        Ok(Self {
            key_version,
            ciphertext: ciphertext.to_vec(),
            iv: iv_bytes,
            mac: mac_bytes,
        })
    }

    /// Binary layout: `marker | ciphertext | iv | mac`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.authenticated_bytes();
        out.extend_from_slice(&self.mac);
        out
    }

    /// Text form, ready to be stored.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{ENCODE_VERSION_LENGTH_PREFIX}{ENCODE_VERSION}{}",
            STANDARD.encode(self.to_bytes())
        )
    }

    /// The bytes covered by the MAC.
    pub(crate) fn authenticated_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            KeyVersion::MARKER_LEN + self.ciphertext.len() + IV_LEN + MAC_LEN,
        );
        out.extend_from_slice(self.key_version.marker());
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.iv);
        out
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn sample() -> EncryptedBlob {
        EncryptedBlob {
            key_version: KeyVersion::KeystoreWrapped,
            ciphertext: vec![0xAA; 32],
            iv: [0x11; IV_LEN],
            mac: [0x22; MAC_LEN],
        }
    }

    #[test]
    fn test_encoded_text_layout() {
        let text = sample().encode();
        assert!(text.starts_with("cE1"));

        let bytes = STANDARD.decode(&text[3..]).expect("base64");
        assert_eq!(&bytes[..4], b"A001");
        assert_eq!(&bytes[4..36], &[0xAA; 32]);
        assert_eq!(&bytes[36..52], &[0x11; 16]);
        assert_eq!(&bytes[52..], &[0x22; 32]);
        assert_eq!(EncryptedBlob::decode(&text).expect("decode"), sample());
    }

    #[test_case("plain token" ; "plain text")]
    #[test_case("cE1" ; "prefix only")]
    #[test_case("cE2AAAA" ; "other encode version")]
    #[test_case("" ; "empty")]
    fn test_not_encrypted(text: &str) {
        assert!(!EncryptedBlob::is_encrypted(text));
    }

    #[test]
    fn test_unknown_marker_is_integrity_error() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        match EncryptedBlob::from_bytes(&bytes) {
            Err(StorageError::Integrity(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let bytes = sample().to_bytes();
        match EncryptedBlob::from_bytes(&bytes[..40]) {
            Err(StorageError::Malformed(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_bad_base64_is_malformed() {
        match EncryptedBlob::decode("cE1!!!not-base64!!!") {
            Err(StorageError::Malformed(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }
}
