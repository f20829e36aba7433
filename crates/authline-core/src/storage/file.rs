use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Slot, StorageBackend, StoreError, Surface};

/// On-disk layout of the two slots. Also the plaintext sealed by
/// `EncryptedFileBackend`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SlotDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SlotDocument {
    pub fn get(&self, slot: Slot) -> Option<&String> {
        match slot {
            Slot::Access => self.access_token.as_ref(),
            Slot::Refresh => self.refresh_token.as_ref(),
        }
    }

    pub fn set(&mut self, slot: Slot, value: Option<String>) {
        match slot {
            Slot::Access => self.access_token = value,
            Slot::Refresh => self.refresh_token = value,
        }
        self.updated_at = Some(Utc::now());
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Persistent credential storage for the web storefront and admin dashboard.
///
/// Both slots live in one JSON document per surface,
/// `<dir>/credentials-<surface>.json`. Writes go through a temp file and a
/// rename so a crash never leaves a half-written document behind.
pub struct FileBackend {
    surface: Surface,
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(dir: impl AsRef<Path>, surface: Surface) -> Self {
        let path = dir
            .as_ref()
            .join(format!("credentials-{}.json", surface.namespace()));
        Self {
            surface,
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self, slot: Slot) -> Result<SlotDocument, StoreError> {
        if !self.path.exists() {
            return Ok(SlotDocument::default());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| StoreError::Read {
            slot,
            reason: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            StoreError::Corrupt(format!("{}: {}", self.path.display(), e))
        })
    }

    fn write_document(&self, slot: Slot, document: &SlotDocument) -> Result<(), StoreError> {
        let write_err = |e: std::io::Error| StoreError::Write {
            slot,
            reason: e.to_string(),
        };

        if document.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).map_err(|e| StoreError::Remove {
                    slot,
                    reason: e.to_string(),
                })?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let contents = serde_json::to_string_pretty(document).map_err(|e| StoreError::Write {
            slot,
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, contents.as_bytes()).map_err(write_err)
    }
}

/// Write `bytes` to a sibling temp file, then rename over `path`.
/// On unix the file is created readable by the owner only.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp, path)
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn load(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document(slot)?.get(slot).cloned())
    }

    async fn save(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut document = match self.read_document(slot) {
            Ok(document) => document,
            Err(StoreError::Corrupt(reason)) => {
                debug!(reason = %reason, "Replacing corrupt credential file");
                SlotDocument::default()
            }
            // The other slot may still be on disk; never overwrite it blind
            Err(e) => return Err(e),
        };
        document.set(slot, Some(value.to_string()));
        self.write_document(slot, &document)
    }

    async fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut document = match self.read_document(slot) {
            Ok(document) => document,
            // A corrupt document holds nothing worth keeping
            Err(StoreError::Corrupt(_)) => SlotDocument::default(),
            Err(e) => return Err(e),
        };
        if document.get(slot).is_none() && !document.is_empty() {
            return Ok(());
        }
        document.set(slot, None);
        self.write_document(slot, &document)
    }

    fn describe(&self) -> String {
        format!("file:{}:{}", self.surface, self.path.display())
    }
}
