use crate::domain::ports::CredentialCipher;
use crate::error::{PaymentError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const NONCE_LEN: usize = 12;

/// AES-256-GCM credential cipher.
///
/// Ciphertext is `base64(nonce || ciphertext+tag)` with a fresh random nonce
/// per call, so encrypting the same secret twice gives different output.
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Parses a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| PaymentError::Configuration(format!("encryption key is not base64: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            PaymentError::Configuration(format!(
                "encryption key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    /// A cipher with a random key; data encrypted with it dies with the process.
    pub fn generate() -> Self {
        Self {
            cipher: Aes256Gcm::new(&Aes256Gcm::generate_key(OsRng)),
        }
    }
}

impl CredentialCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| PaymentError::Crypto(format!("encryption failed: {e}")))?;
        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|e| PaymentError::Crypto(format!("ciphertext is not base64: {e}")))?;
        if sealed.len() <= NONCE_LEN {
            return Err(PaymentError::Crypto("ciphertext is too short".into()));
        }
        let (nonce, body) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| PaymentError::Crypto("decryption failed".into()))?;
        String::from_utf8(plaintext).map_err(|e| PaymentError::Crypto(e.to_string()))
    }
}
