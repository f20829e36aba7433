//! authline - authenticated HTTP client for the storefront, admin dashboard,
//! and mobile app.
//!
//! Each surface gets its own `CredentialStore` over a platform-appropriate
//! `StorageBackend`, and an `AuthPipeline` that attaches the access
//! credential to every request and silently renews it once on a 401.

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, AuthPipeline, PipelineError};
pub use auth::{AuthState, CredentialPair, CredentialStore, Session, Surface};
pub use config::Config;
