//! OS keychain storage (Keychain, Credential Manager, Secret Service).

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use super::{Slot, StorageBackend, StoreError, Surface};

const SERVICE_NAME: &str = "authline";

/// Secure device storage backed by the platform keychain.
///
/// Each slot is a separate keychain entry under the `authline` service,
/// with account names namespaced by surface (`mobile.access_token`).
pub struct KeyringBackend {
    surface: Surface,
    access: Entry,
    refresh: Entry,
}

impl KeyringBackend {
    pub fn new(surface: Surface) -> Result<Self, StoreError> {
        let entry = |slot: Slot| {
            Entry::new(SERVICE_NAME, &slot.qualified(surface)).map_err(|e| {
                StoreError::Unavailable(format!("Failed to create keyring entry: {}", e))
            })
        };

        Ok(Self {
            surface,
            access: entry(Slot::Access)?,
            refresh: entry(Slot::Refresh)?,
        })
    }

    fn entry(&self, slot: Slot) -> &Entry {
        match slot {
            Slot::Access => &self.access,
            Slot::Refresh => &self.refresh,
        }
    }
}

#[async_trait]
impl StorageBackend for KeyringBackend {
    async fn load(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        match self.entry(slot).get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Read {
                slot,
                reason: e.to_string(),
            }),
        }
    }

    async fn save(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        self.entry(slot)
            .set_password(value)
            .map_err(|e| StoreError::Write {
                slot,
                reason: e.to_string(),
            })
    }

    async fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        match self.entry(slot).delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => {
                debug!(slot = %slot, "No keychain entry to remove");
                Ok(())
            }
            Err(e) => Err(StoreError::Remove {
                slot,
                reason: e.to_string(),
            }),
        }
    }

    fn describe(&self) -> String {
        format!("keyring:{}", self.surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_backend(surface: Surface) -> KeyringBackend {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        KeyringBackend::new(surface).expect("mock keyring entry")
    }

    #[tokio::test]
    async fn test_keyring_backend_round_trip() {
        let backend = mock_backend(Surface::Mobile);

        assert_eq!(backend.load(Slot::Access).await.unwrap(), None);
        backend.save(Slot::Access, "A1").await.unwrap();
        backend.save(Slot::Refresh, "R1").await.unwrap();
        assert_eq!(backend.load(Slot::Access).await.unwrap().as_deref(), Some("A1"));
        assert_eq!(backend.load(Slot::Refresh).await.unwrap().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_keyring_backend_remove_is_idempotent() {
        let backend = mock_backend(Surface::Mobile);

        backend.save(Slot::Refresh, "R1").await.unwrap();
        backend.remove(Slot::Refresh).await.unwrap();
        backend.remove(Slot::Refresh).await.unwrap();
        assert_eq!(backend.load(Slot::Refresh).await.unwrap(), None);
    }
}
