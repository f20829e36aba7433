//! Storage backends for the credential pair.
//!
//! Each backend exposes exactly two slots (access and refresh) inside the
//! namespace of one application surface, so logging into the admin
//! dashboard never authenticates the storefront:
//! - `MemoryBackend`: process-local, for tests and throwaway sessions
//! - `FileBackend`: JSON document on disk (web/admin persistent storage)
//! - `KeyringBackend`: OS keychain (mobile secure storage)
//! - `EncryptedFileBackend`: passphrase-sealed file where no keychain exists

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod encrypted;
pub mod file;
pub mod keychain;
pub mod memory;

pub use encrypted::EncryptedFileBackend;
pub use file::FileBackend;
pub use keychain::KeyringBackend;
pub use memory::MemoryBackend;

/// Application surface that owns a storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    #[default]
    Web,
    Admin,
    Mobile,
}

impl Surface {
    pub fn namespace(&self) -> &'static str {
        match self {
            Surface::Web => "web",
            Surface::Admin => "admin",
            Surface::Mobile => "mobile",
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for Surface {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "web" | "storefront" => Ok(Surface::Web),
            "admin" | "dashboard" => Ok(Surface::Admin),
            "mobile" | "app" => Ok(Surface::Mobile),
            other => Err(format!("Unknown surface: {}", other)),
        }
    }
}

/// One of the two named credential slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Access,
    Refresh,
}

impl Slot {
    pub fn key(&self) -> &'static str {
        match self {
            Slot::Access => "access_token",
            Slot::Refresh => "refresh_token",
        }
    }

    /// Fully qualified slot name within a surface namespace, e.g. `web.access_token`
    pub fn qualified(&self, surface: Surface) -> String {
        format!("{}.{}", surface.namespace(), self.key())
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Storage-layer failure. Clone so a single renewal outcome can be handed
/// to every request waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Credential storage unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read {slot}: {reason}")]
    Read { slot: Slot, reason: String },

    #[error("Failed to write {slot}: {reason}")]
    Write { slot: Slot, reason: String },

    #[error("Failed to remove {slot}: {reason}")]
    Remove { slot: Slot, reason: String },

    #[error("Stored credentials are corrupt: {0}")]
    Corrupt(String),
}

/// A platform storage medium holding the two credential slots of one surface.
///
/// Reads of an unset slot return `Ok(None)`. Removing an unset slot is not an
/// error.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn load(&self, slot: Slot) -> Result<Option<String>, StoreError>;

    async fn save(&self, slot: Slot, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, slot: Slot) -> Result<(), StoreError>;

    /// Short human-readable name for logs
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_from_str() {
        assert_eq!("web".parse::<Surface>(), Ok(Surface::Web));
        assert_eq!("Admin".parse::<Surface>(), Ok(Surface::Admin));
        assert_eq!(" mobile ".parse::<Surface>(), Ok(Surface::Mobile));
        assert_eq!("dashboard".parse::<Surface>(), Ok(Surface::Admin));
        assert!("desktop".parse::<Surface>().is_err());
    }

    #[test]
    fn test_slot_qualified_names_are_namespaced() {
        assert_eq!(Slot::Access.qualified(Surface::Web), "web.access_token");
        assert_eq!(Slot::Refresh.qualified(Surface::Mobile), "mobile.refresh_token");
        assert_ne!(
            Slot::Access.qualified(Surface::Web),
            Slot::Access.qualified(Surface::Admin)
        );
    }

    #[test]
    fn test_surface_serde_lowercase() {
        let json = serde_json::to_string(&Surface::Admin).expect("serialize surface");
        assert_eq!(json, "\"admin\"");
        let parsed: Surface = serde_json::from_str("\"mobile\"").expect("parse surface");
        assert_eq!(parsed, Surface::Mobile);
    }
}
