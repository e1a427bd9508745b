//! Embedding encryption at rest (AES-256-GCM).
//!
//! Each blob is `nonce (12 bytes) || ciphertext`. The student id is bound as
//! associated data, so a blob copied onto another row fails to decrypt.

use crate::error::{Result, StoreError};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct EmbeddingCipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl std::fmt::Debug for EmbeddingCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCipher")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl EmbeddingCipher {
    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        let digest = Sha256::digest(key);
        let fingerprint = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            fingerprint,
        }
    }

    /// Fresh random key, not persisted.
    pub fn generate() -> Self {
        Self::from_key(&random_key())
    }

    /// Read the key file, creating it (mode 0600) with a random key if absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let key_err = |source| StoreError::KeyFile {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let bytes = std::fs::read(path).map_err(key_err)?;
            let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                StoreError::Cipher(format!(
                    "key file {} must hold exactly {KEY_LEN} bytes, found {}",
                    path.display(),
                    bytes.len()
                ))
            })?;
            return Ok(Self::from_key(&key));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(key_err)?;
        }
        let key = random_key();
        let mut file = open_private(path).map_err(key_err)?;
        file.write_all(&key).map_err(key_err)?;
        tracing::info!(path = %path.display(), "generated new embedding key");
        Ok(Self::from_key(&key))
    }

    /// Short hex fingerprint of the key, safe to store alongside the data.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn seal(&self, aad: &str, values: &[f32]) -> Result<Vec<u8>> {
        let plaintext: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Cipher("encryption failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn open(&self, aad: &str, blob: &[u8]) -> Result<Vec<f32>> {
        if blob.len() < NONCE_LEN {
            return Err(StoreError::Cipher("embedding blob too short".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Cipher("embedding failed authentication".into()))?;

        if plaintext.len() % 4 != 0 {
            return Err(StoreError::Cipher("embedding length is not a multiple of 4".into()));
        }
        Ok(plaintext
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

fn random_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let cipher = EmbeddingCipher::from_key(&[7u8; KEY_LEN]);
        let values = vec![0.25f32, -1.5, 3.0];
        let blob = cipher.seal("student-1", &values).unwrap();
        assert_ne!(&blob[NONCE_LEN..], le_bytes(&values).as_slice());
        assert_eq!(cipher.open("student-1", &blob).unwrap(), values);
    }

    fn le_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_nonce_differs_per_seal() {
        let cipher = EmbeddingCipher::generate();
        let a = cipher.seal("s", &[1.0]).unwrap();
        let b = cipher.seal("s", &[1.0]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_rejects_other_student() {
        let cipher = EmbeddingCipher::generate();
        let blob = cipher.seal("student-1", &[1.0, 2.0]).unwrap();
        assert!(matches!(cipher.open("student-2", &blob), Err(StoreError::Cipher(_))));
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let blob = EmbeddingCipher::from_key(&[1u8; KEY_LEN]).seal("s", &[1.0]).unwrap();
        let other = EmbeddingCipher::from_key(&[2u8; KEY_LEN]);
        assert!(other.open("s", &blob).is_err());
        assert!(other.open("s", &blob[..4]).is_err());
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = EmbeddingCipher::from_key(&[9u8; KEY_LEN]);
        let b = EmbeddingCipher::from_key(&[9u8; KEY_LEN]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
        assert_ne!(a.fingerprint(), EmbeddingCipher::generate().fingerprint());
    }

    #[test]
    fn test_load_or_create_persists_key() {
        let dir = std::env::temp_dir().join(format!("rollcall-key-{}", uuid::Uuid::new_v4()));
        let path = dir.join("embedding.key");

        let first = EmbeddingCipher::load_or_create(&path).unwrap();
        let second = EmbeddingCipher::load_or_create(&path).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(std::fs::read(&path).unwrap().len(), KEY_LEN);

        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(EmbeddingCipher::load_or_create(&path), Err(StoreError::Cipher(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
