use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use super::credentials::{AuthState, CredentialPair, CredentialStore};
use crate::api::envelope::Envelope;
use crate::api::error::{ApiError, TransportError};
use crate::api::pipeline::AuthPipeline;
use crate::api::transport::{ApiRequest, Transport};
use crate::storage::StoreError;

pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const LOGOUT_PATH: &str = "/api/v1/auth/logout";

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to parse login response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("Failed to store credentials: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Creates and ends the identity a pipeline authenticates as.
///
/// Login goes straight through the transport: a 401 there means a wrong
/// password, not an expired credential, and must never trigger renewal.
pub struct Session {
    transport: Arc<dyn Transport>,
    pipeline: Arc<AuthPipeline>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, pipeline: Arc<AuthPipeline>) -> Self {
        Self {
            transport,
            pipeline,
        }
    }

    fn store(&self) -> &CredentialStore {
        self.pipeline.store()
    }

    /// Authenticate with email and password and store the issued pair
    pub async fn login(&self, email: &str, password: &str) -> Result<(), LoginError> {
        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { email, password })?;
        let response = self.transport.send(request).await?;

        if response.status.as_u16() == 401 {
            warn!("Login rejected");
            return Err(LoginError::InvalidCredentials);
        }
        if !response.is_success() {
            return Err(ApiError::from_status(response.status, &response.text()).into());
        }

        let envelope: Envelope<CredentialPair> = response.json()?;
        let pair = envelope.into_data()?;
        self.store()
            .set_pair(&pair.access_token, &pair.refresh_token)
            .await?;

        info!(surface = %self.store().surface(), "Login successful");
        Ok(())
    }

    /// Store a pair delivered by an OAuth-style redirect callback
    pub async fn complete_oauth_callback(&self, access: &str, refresh: &str) -> Result<(), StoreError> {
        self.store().set_pair(access, refresh).await?;
        info!(surface = %self.store().surface(), "OAuth callback completed");
        Ok(())
    }

    /// Tell the backend the session is over (best effort), then clear the
    /// stored credentials.
    pub async fn logout(&self) -> Result<(), StoreError> {
        if self.store().has_credential().await {
            if let Err(e) = self.pipeline.execute(ApiRequest::post(LOGOUT_PATH)).await {
                warn!(error = %e, "Backend logout failed, clearing local credentials anyway");
            }
        }
        self.store().clear().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store().has_credential().await
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.store().subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::StatusCode;

    use super::*;
    use crate::api::pipeline::PipelineConfig;
    use crate::api::renewal::{RenewalEndpoint, RenewedCredentials};
    use crate::api::error::RenewalError;
    use crate::api::transport::ApiResponse;
    use crate::storage::{MemoryBackend, Surface};

    /// Accepts `shopper@example.com` / `correct-horse` and any bearer-authenticated logout.
    struct FakeAuthApi {
        paths: Mutex<Vec<String>>,
        logout_status: StatusCode,
    }

    #[async_trait]
    impl Transport for FakeAuthApi {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.paths.lock().unwrap().push(request.path.clone());
            match request.path.as_str() {
                LOGIN_PATH => {
                    let body = request.body.unwrap_or_default();
                    if body["email"] == "shopper@example.com" && body["password"] == "correct-horse" {
                        Ok(ApiResponse::new(
                            StatusCode::OK,
                            r#"{"success":true,"data":{"accessToken":"A1","refreshToken":"R1"},"timestamp":"2024-05-01T10:00:00Z"}"#,
                        ))
                    } else {
                        Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, r#"{"success":false}"#))
                    }
                }
                LOGOUT_PATH => Ok(ApiResponse::new(self.logout_status, r#"{"success":true,"data":null}"#)),
                _ => Ok(ApiResponse::new(StatusCode::NOT_FOUND, "")),
            }
        }
    }

    struct NoRenewal;

    #[async_trait]
    impl RenewalEndpoint for NoRenewal {
        async fn renew(&self, _refresh_token: &str) -> Result<RenewedCredentials, RenewalError> {
            Err(RenewalError::Rejected(StatusCode::UNAUTHORIZED))
        }
    }

    async fn session(logout_status: StatusCode) -> (Session, Arc<FakeAuthApi>) {
        let api = Arc::new(FakeAuthApi {
            paths: Mutex::new(Vec::new()),
            logout_status,
        });
        let store = Arc::new(
            CredentialStore::open(Box::new(MemoryBackend::new(Surface::Web)), Surface::Web).await,
        );
        let pipeline = Arc::new(AuthPipeline::new(
            api.clone(),
            Arc::new(NoRenewal),
            store,
            PipelineConfig::default(),
        ));
        (Session::new(api.clone(), pipeline), api)
    }

    #[tokio::test]
    async fn test_login_stores_pair() {
        let (session, _) = session(StatusCode::OK).await;
        let mut state = session.subscribe();

        session.login("shopper@example.com", "correct-horse").await.unwrap();

        assert!(session.is_authenticated().await);
        assert_eq!(session.store().get_access().await.as_deref(), Some("A1"));
        assert_eq!(session.store().get_refresh().await.as_deref(), Some("R1"));
        assert_eq!(*state.borrow_and_update(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_login_with_wrong_password() {
        let (session, api) = session(StatusCode::OK).await;

        let err = session.login("shopper@example.com", "wrong").await.unwrap_err();

        assert!(matches!(err, LoginError::InvalidCredentials));
        assert!(!session.is_authenticated().await);
        // No renewal attempt, no retry
        assert_eq!(*api.paths.lock().unwrap(), vec![LOGIN_PATH.to_string()]);
    }

    #[tokio::test]
    async fn test_oauth_callback_stores_pair() {
        let (session, _) = session(StatusCode::OK).await;
        session.complete_oauth_callback("OA1", "OR1").await.unwrap();
        assert_eq!(session.store().get_access().await.as_deref(), Some("OA1"));
        assert_eq!(session.store().get_refresh().await.as_deref(), Some("OR1"));
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_backend_fails() {
        let (session, api) = session(StatusCode::INTERNAL_SERVER_ERROR).await;
        session.complete_oauth_callback("A1", "R1").await.unwrap();

        session.logout().await.unwrap();

        assert!(!session.is_authenticated().await);
        assert_eq!(session.store().get_refresh().await, None);
        assert_eq!(*api.paths.lock().unwrap(), vec![LOGOUT_PATH.to_string()]);
    }

    #[tokio::test]
    async fn test_logout_when_anonymous_skips_backend() {
        let (session, api) = session(StatusCode::OK).await;
        session.logout().await.unwrap();
        session.logout().await.unwrap();
        assert!(api.paths.lock().unwrap().is_empty());
    }
}
