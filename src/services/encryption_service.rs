use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Invalid hex key: {0}")]
    InvalidHexKey(hex::FromHexError),
    #[error("Encryption key must be 32 bytes (256 bits) long")]
    InvalidKeyLength,
    #[error("Invalid hex ciphertext: {0}")]
    InvalidHexCiphertext(hex::FromHexError),
    #[error("Ciphertext is too short to contain a nonce")]
    CiphertextTooShort,
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Invalid UTF-8 sequence: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("Malformed stored headers: {0}")]
    MalformedHeaders(serde_json::Error),
}

/// Symmetric encryption for target header values at rest.
///
/// Values are stored as hex(nonce || ciphertext) using AES-256-GCM.
pub struct HeaderCipher {
    cipher: Aes256Gcm,
}

impl HeaderCipher {
    /// Builds a cipher from a 64 character hex string (32 bytes).
    pub fn from_hex_key(key_hex: &str) -> Result<Self, EncryptionError> {
        let key_bytes = hex::decode(key_hex.trim()).map_err(EncryptionError::InvalidHexKey)?;
        Self::new(&key_bytes)
    }

    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.len() != 32 {
            return Err(EncryptionError::InvalidKeyLength);
        }
        Ok(Self {
            cipher: Aes256Gcm::new_from_slice(key)
                .map_err(|_e| EncryptionError::InvalidKeyLength)?,
        })
    }

    pub fn encrypt(&self, plain_text: &str) -> Result<String, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng); // must be unique for each encryption
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain_text.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(hex::encode(result))
    }

    pub fn decrypt(&self, cipher_hex: &str) -> Result<String, EncryptionError> {
        let encrypted_data =
            hex::decode(cipher_hex).map_err(EncryptionError::InvalidHexCiphertext)?;
        if encrypted_data.len() < NONCE_SIZE {
            return Err(EncryptionError::CiphertextTooShort);
        }

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let decrypted_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;

        Ok(String::from_utf8(decrypted_bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_encrypt_decrypt_success() {
        let cipher = HeaderCipher::from_hex_key(KEY_HEX).unwrap();
        let plain_text = "Bearer secret-token";

        let encrypted = cipher.encrypt(plain_text).unwrap();
        let decrypted = cipher.decrypt(&encrypted).unwrap();

        assert_ne!(plain_text, encrypted);
        assert_eq!(plain_text, decrypted);
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let other_key = "f1e1d1c1b1a191817161514131211101f0e0d0c0b0a090807060504030201000";
        let encrypted = HeaderCipher::from_hex_key(KEY_HEX)
            .unwrap()
            .encrypt("another secret")
            .unwrap();

        let result = HeaderCipher::from_hex_key(other_key)
            .unwrap()
            .decrypt(&encrypted);
        assert!(matches!(result, Err(EncryptionError::DecryptionFailed(_))));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            HeaderCipher::from_hex_key("1234"),
            Err(EncryptionError::InvalidKeyLength)
        ));
        let long_key = format!("{KEY_HEX}20");
        assert!(matches!(
            HeaderCipher::from_hex_key(&long_key),
            Err(EncryptionError::InvalidKeyLength)
        ));
    }

    #[test]
    fn test_invalid_hex() {
        assert!(matches!(
            HeaderCipher::from_hex_key("not-a-hex-string"),
            Err(EncryptionError::InvalidHexKey(_))
        ));

        let cipher = HeaderCipher::from_hex_key(KEY_HEX).unwrap();
        assert!(matches!(
            cipher.decrypt("not-a-hex-cipher"),
            Err(EncryptionError::InvalidHexCiphertext(_))
        ));
        assert!(matches!(
            cipher.decrypt("0011"),
            Err(EncryptionError::CiphertextTooShort)
        ));
    }
}
