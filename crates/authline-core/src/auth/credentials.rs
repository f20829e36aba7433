use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::storage::{Slot, StorageBackend, StoreError, Surface};

/// Access and refresh credentials as issued by the backend.
///
/// Both values are opaque: nothing here decodes them or inspects expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens stay out of logs and panic messages
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("refresh_token", &format_args!("<{} bytes>", self.refresh_token.len()))
            .finish()
    }
}

/// Observable authentication state. `Anonymous` means no access credential
/// is stored; collaborators watching for it should route to the login screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    Authenticated,
    Anonymous,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::Authenticated => write!(f, "authenticated"),
            AuthState::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// Uniform credential storage for one application surface.
///
/// Reads never fail: a backend error is logged and reported as absent.
/// Writes return their error so the renewal protocol can surface it;
/// other callers may ignore it. Writes are serialized so a read issued
/// after a write has completed sees the written value.
///
/// The generation changes whenever the identity changes (`set_pair` or
/// `clear`). A renewal records it up front and only writes its result back
/// if it is unchanged, so a renewal that outlives a logout or a new login
/// cannot resurrect or overwrite that identity.
pub struct CredentialStore {
    backend: Box<dyn StorageBackend>,
    surface: Surface,
    write_lock: Mutex<()>,
    generation: AtomicU64,
    state: watch::Sender<AuthState>,
}

impl CredentialStore {
    /// Open a store over `backend`, reading it once to establish the
    /// initial authentication state.
    pub async fn open(backend: Box<dyn StorageBackend>, surface: Surface) -> Self {
        let (state, _) = watch::channel(AuthState::Anonymous);
        let store = Self {
            backend,
            surface,
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            state,
        };
        let initial = store.current_state().await;
        store.state.send_replace(initial);
        debug!(
            surface = %surface,
            backend = %store.backend.describe(),
            state = ?initial,
            "Credential store opened"
        );
        store
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub async fn get_access(&self) -> Option<String> {
        self.read(Slot::Access).await
    }

    pub async fn get_refresh(&self) -> Option<String> {
        self.read(Slot::Refresh).await
    }

    /// Identity generation, for use with `apply_renewal` and `clear_if_current`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Presence check only: the token is not validated.
    pub async fn has_credential(&self) -> bool {
        self.get_access().await.is_some()
    }

    pub async fn set_access(&self, token: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.backend.save(Slot::Access, token).await?;
        self.publish(AuthState::Authenticated);
        Ok(())
    }

    pub async fn set_refresh(&self, token: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.backend.save(Slot::Refresh, token).await
    }

    /// Store a complete pair. The refresh credential is written first so an
    /// access credential never exists without its refresh partner.
    pub async fn set_pair(&self, access: &str, refresh: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.backend.save(Slot::Refresh, refresh).await?;
        self.backend.save(Slot::Access, access).await?;
        self.publish(AuthState::Authenticated);
        info!(surface = %self.surface, "Credentials stored");
        Ok(())
    }

    /// Write a renewal result, unless the identity changed since
    /// `generation` was read. Returns `false` when the result was discarded.
    /// A rotated refresh credential is written before the access credential.
    pub async fn apply_renewal(
        &self,
        generation: u64,
        access: &str,
        refresh: Option<&str>,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.generation() != generation {
            debug!(surface = %self.surface, "Credentials changed during renewal, discarding result");
            return Ok(false);
        }
        if let Some(refresh) = refresh {
            self.backend.save(Slot::Refresh, refresh).await?;
        }
        self.backend.save(Slot::Access, access).await?;
        self.publish(AuthState::Authenticated);
        Ok(true)
    }

    /// Remove both credentials. Idempotent. `Anonymous` is published even if
    /// a removal fails; the first failure is returned.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.clear_locked().await
    }

    /// `clear`, unless the identity changed since `generation` was read.
    /// Returns `false` when nothing was cleared.
    pub async fn clear_if_current(&self, generation: u64) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.generation() != generation {
            debug!(surface = %self.surface, "Credentials changed during renewal, keeping them");
            return Ok(false);
        }
        self.clear_locked().await.map(|()| true)
    }

    async fn clear_locked(&self) -> Result<(), StoreError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let access = self.backend.remove(Slot::Access).await;
        let refresh = self.backend.remove(Slot::Refresh).await;
        self.publish(AuthState::Anonymous);

        match access.and(refresh) {
            Ok(()) => {
                info!(surface = %self.surface, "Credentials cleared");
                Ok(())
            }
            Err(e) => {
                warn!(surface = %self.surface, error = %e, "Failed to fully clear credentials");
                Err(e)
            }
        }
    }

    /// Current authentication state as last published.
    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Subscribe to authentication state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    async fn read(&self, slot: Slot) -> Option<String> {
        match self.backend.load(slot).await {
            Ok(value) => value,
            Err(e) => {
                warn!(surface = %self.surface, slot = %slot, error = %e, "Credential read failed, treating as absent");
                None
            }
        }
    }

    async fn current_state(&self) -> AuthState {
        if self.has_credential().await {
            AuthState::Authenticated
        } else {
            AuthState::Anonymous
        }
    }

    fn publish(&self, state: AuthState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
