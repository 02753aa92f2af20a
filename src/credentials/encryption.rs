#[cfg(test)]
use mockall::automock;

use aes_gcm::aead::Aead;
use aes_gcm::aead::AeadCore;
use aes_gcm::aead::KeyInit;
use aes_gcm::aead::OsRng;
use aes_gcm::Aes256Gcm;
use aes_gcm::Key;
use aes_gcm::Nonce;
use sha2::Digest;
use sha2::Sha256;

use crate::CredentialsError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric protection of credential secrets at rest
#[cfg_attr(test, automock)]
pub trait EncryptionService: Send + Sync + 'static {
    fn encrypt(
        &self,
        plaintext: &str,
    ) -> Result<String, CredentialsError>;

    fn decrypt(
        &self,
        ciphertext: &str,
    ) -> Result<String, CredentialsError>;
}

/// AES-256-GCM keyed with SHA-256 of an operator secret.
///
/// Output is lowercase hex of `nonce || ciphertext || tag` with a fresh
/// random 96-bit nonce per value.
pub struct AesGcmEncryption {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmEncryption {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("AesGcmEncryption").finish_non_exhaustive()
    }
}

impl AesGcmEncryption {
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }
}

impl EncryptionService for AesGcmEncryption {
    fn encrypt(
        &self,
        plaintext: &str,
    ) -> Result<String, CredentialsError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CredentialsError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    fn decrypt(
        &self,
        ciphertext: &str,
    ) -> Result<String, CredentialsError> {
        let sealed =
            hex::decode(ciphertext).map_err(|e| CredentialsError::Decryption(e.to_string()))?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CredentialsError::Decryption(format!(
                "sealed value too short ({} bytes)",
                sealed.len()
            )));
        }

        let (nonce, body) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|e| CredentialsError::Decryption(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CredentialsError::Decryption(e.to_string()))
    }
}
