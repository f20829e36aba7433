//! Passphrase-sealed credential file for devices without a usable keychain.
//!
//! File layout: `salt (16) || nonce (12) || ciphertext`. The key is derived
//! from the passphrase with Argon2id using the per-file salt; the plaintext
//! is the same JSON slot document `FileBackend` writes. Every write uses a
//! fresh nonce. The salt, and the key derived from it, are kept for the
//! life of the backend so key derivation runs once rather than per access.
//!
//! Key derivation and file I/O run on the blocking thread pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use argon2::Argon2;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::debug;

use super::file::{write_atomic, SlotDocument};
use super::{Slot, StorageBackend, StoreError, Surface};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Clone, Copy)]
struct DerivedKey {
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
}

/// The sealed file itself. Only touched from blocking tasks.
struct SealedFile {
    path: PathBuf,
    passphrase: String,
    cached_key: std::sync::Mutex<Option<DerivedKey>>,
}

impl SealedFile {
    fn key_for(&self, salt: [u8; SALT_LEN]) -> Result<[u8; KEY_LEN], StoreError> {
        let mut cached = self.cached_key.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(derived) = *cached {
            if derived.salt == salt {
                return Ok(derived.key);
            }
        }

        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| StoreError::Unavailable(format!("Key derivation failed: {}", e)))?;
        debug!(path = %self.path.display(), "Derived credential file key");
        *cached = Some(DerivedKey { salt, key });
        Ok(key)
    }

    fn current_salt(&self) -> Option<[u8; SALT_LEN]> {
        self.cached_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|derived| derived.salt)
    }

    fn seal(&self, document: &SlotDocument) -> Result<Vec<u8>, StoreError> {
        let plaintext = serde_json::to_vec(document)
            .map_err(|e| StoreError::Unavailable(format!("Failed to serialize credentials: {}", e)))?;

        let mut rng = rand::thread_rng();
        let salt = match self.current_salt() {
            Some(salt) => salt,
            None => {
                let mut salt = [0u8; SALT_LEN];
                rng.fill_bytes(&mut salt);
                salt
            }
        };
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        let key = self.key_for(salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| StoreError::Unavailable("Encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<SlotDocument, StoreError> {
        if sealed.len() <= SALT_LEN + NONCE_LEN {
            return Err(StoreError::Corrupt("sealed credential file is truncated".to_string()));
        }
        let (salt, rest) = sealed.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let mut salt_bytes = [0u8; SALT_LEN];
        salt_bytes.copy_from_slice(salt);

        let key = self.key_for(salt_bytes)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                StoreError::Corrupt("wrong passphrase or tampered credential file".to_string())
            })?;

        serde_json::from_slice(&plaintext).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn read_document(&self, slot: Slot) -> Result<SlotDocument, StoreError> {
        if !self.path.exists() {
            return Ok(SlotDocument::default());
        }
        let sealed = std::fs::read(&self.path).map_err(|e| StoreError::Read {
            slot,
            reason: e.to_string(),
        })?;
        self.open(&sealed)
    }

    fn write_document(&self, slot: Slot, document: &SlotDocument) -> Result<(), StoreError> {
        if document.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).map_err(|e| StoreError::Remove {
                    slot,
                    reason: e.to_string(),
                })?;
            }
            return Ok(());
        }

        let sealed = self.seal(document)?;
        let write_err = |e: std::io::Error| StoreError::Write {
            slot,
            reason: e.to_string(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        write_atomic(&self.path, &sealed).map_err(write_err)
    }

    fn load(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        Ok(self.read_document(slot)?.get(slot).cloned())
    }

    fn save(&self, slot: Slot, value: String) -> Result<(), StoreError> {
        // Never overwrite a file we cannot open: it may belong to another passphrase
        let mut document = self.read_document(slot)?;
        document.set(slot, Some(value));
        self.write_document(slot, &document)
    }

    fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        let mut document = match self.read_document(slot) {
            Ok(document) => document,
            Err(StoreError::Corrupt(_)) => SlotDocument::default(),
            Err(e) => return Err(e),
        };
        if document.get(slot).is_none() && !document.is_empty() {
            return Ok(());
        }
        document.set(slot, None);
        self.write_document(slot, &document)
    }
}

pub struct EncryptedFileBackend {
    surface: Surface,
    file: Arc<SealedFile>,
    lock: Mutex<()>,
}

impl EncryptedFileBackend {
    pub fn new(dir: impl AsRef<Path>, surface: Surface, passphrase: impl Into<String>) -> Self {
        let path = dir
            .as_ref()
            .join(format!("credentials-{}.sealed", surface.namespace()));
        Self {
            surface,
            file: Arc::new(SealedFile {
                path,
                passphrase: passphrase.into(),
                cached_key: std::sync::Mutex::new(None),
            }),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// Run `op` against the file on the blocking pool. Callers hold `lock`
    /// across the await so read-modify-write cycles do not interleave.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SealedFile) -> Result<T, StoreError> + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || op(&file))
            .await
            .map_err(|e| StoreError::Unavailable(format!("Credential file task failed: {}", e)))?
    }
}

#[async_trait]
impl StorageBackend for EncryptedFileBackend {
    async fn load(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        self.blocking(move |file| file.load(slot)).await
    }

    async fn save(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let value = value.to_string();
        self.blocking(move |file| file.save(slot, value)).await
    }

    async fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.blocking(move |file| file.remove(slot)).await
    }

    fn describe(&self) -> String {
        format!("encrypted:{}:{}", self.surface, self.file.path.display())
    }
}
