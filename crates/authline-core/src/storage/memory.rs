use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Slot, StorageBackend, StoreError, Surface};

/// Process-local credential storage. Nothing survives a restart.
pub struct MemoryBackend {
    surface: Surface,
    slots: Mutex<HashMap<Slot, String>>,
}

impl MemoryBackend {
    pub fn new(surface: Surface) -> Self {
        Self {
            surface,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn with_slots<T>(&self, f: impl FnOnce(&mut HashMap<Slot, String>) -> T) -> Result<T, StoreError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(f(&mut slots))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        self.with_slots(|slots| slots.get(&slot).cloned())
    }

    async fn save(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        self.with_slots(|slots| {
            slots.insert(slot, value.to_string());
        })
    }

    async fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        self.with_slots(|slots| {
            slots.remove(&slot);
        })
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_slots_are_independent() {
        let backend = MemoryBackend::new(Surface::Web);
        backend.save(Slot::Access, "A1").await.unwrap();

        assert_eq!(backend.load(Slot::Access).await.unwrap().as_deref(), Some("A1"));
        assert_eq!(backend.load(Slot::Refresh).await.unwrap(), None);

        backend.remove(Slot::Access).await.unwrap();
        assert_eq!(backend.load(Slot::Access).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_backend_remove_missing_is_ok() {
        let backend = MemoryBackend::new(Surface::Admin);
        assert!(backend.remove(Slot::Refresh).await.is_ok());
        assert_eq!(backend.describe(), "memory:admin");
    }
}
