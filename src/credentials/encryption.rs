//! AES-256-GCM sealing for stored broker credentials.
//!
//! The whole credential payload is sealed as one blob with a fresh random
//! nonce per write. The master key is 32 bytes, base64-encoded, and comes
//! from `BROKER_SESSION_ENCRYPTION_KEY`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

const KEY_SIZE: usize = 32;

/// 96-bit GCM nonce
const NONCE_SIZE: usize = 12;

/// A sealed payload, both halves base64-encoded for TEXT columns.
#[derive(Clone, Debug, PartialEq)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

/// Keyed AES-256-GCM cipher.
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Builds a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_base64.trim())
            .context("Failed to decode base64 encryption key")?;

        if key.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` under a new random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(Sealed {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce),
        })
    }

    /// Decrypts and authenticates a sealed payload.
    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>> {
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .context("Failed to decode ciphertext")?;
        let nonce = BASE64.decode(&sealed.nonce).context("Failed to decode nonce")?;

        if nonce.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce.len()
            ));
        }

        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> String {
        BASE64.encode([byte; 32])
    }

    #[test]
    fn test_key_must_be_32_bytes() {
        assert!(Cipher::from_base64(&key(0)).is_ok());
        assert!(Cipher::from_base64(&BASE64.encode([0u8; 16])).is_err());
        assert!(Cipher::from_base64(&BASE64.encode([0u8; 64])).is_err());
        assert!(Cipher::from_base64("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_seal_and_open() {
        let cipher = Cipher::from_base64(&key(0)).unwrap();

        let sealed = cipher.seal(b"{\"pin\":\"123456\"}").unwrap();
        assert!(!sealed.ciphertext.contains("123456"));

        assert_eq!(cipher.open(&sealed).unwrap(), b"{\"pin\":\"123456\"}");
    }

    #[test]
    fn test_each_seal_uses_fresh_nonce() {
        let cipher = Cipher::from_base64(&key(0)).unwrap();

        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let sealed = Cipher::from_base64(&key(0)).unwrap().seal(b"secret").unwrap();
        let other = Cipher::from_base64(&key(1)).unwrap();

        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_tampering_is_detected() {
        let cipher = Cipher::from_base64(&key(0)).unwrap();
        let mut sealed = cipher.seal(b"secret").unwrap();

        let swapped = cipher.seal(b"other").unwrap();
        sealed.nonce = swapped.nonce;
        assert!(cipher.open(&sealed).is_err());
    }
}
