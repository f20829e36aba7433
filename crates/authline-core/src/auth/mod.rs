//! Identity state for one application surface.
//!
//! This module provides:
//! - `CredentialStore`: uniform access/refresh credential storage over any
//!   `StorageBackend`, with an observable `AuthState`
//! - `Session`: login, OAuth callback import, and logout
//!
//! Credentials are opaque. Nothing here decodes a token or tracks expiry;
//! the backend's 401 is the only expiry signal.

pub mod credentials;
pub mod session;

pub use crate::storage::Surface;
pub use credentials::{AuthState, CredentialPair, CredentialStore};
pub use session::{LoginError, Session};
