use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::envelope::Envelope;
use super::error::RenewalError;
use super::transport::{ApiRequest, Transport};

pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";

/// Credentials returned by a successful renewal. `refresh_token` is only
/// present when the backend rotated it; otherwise the stored one stays valid.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewedCredentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for RenewedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewedCredentials")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("rotated_refresh", &self.refresh_token.is_some())
            .finish()
    }
}

/// The backend call that exchanges a refresh credential for new credentials.
#[async_trait]
pub trait RenewalEndpoint: Send + Sync {
    async fn renew(&self, refresh_token: &str) -> Result<RenewedCredentials, RenewalError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// `POST /api/v1/auth/refresh` sent straight through the transport, never
/// through the authenticated pipeline.
pub struct HttpRenewalEndpoint {
    transport: Arc<dyn Transport>,
}

impl HttpRenewalEndpoint {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl RenewalEndpoint for HttpRenewalEndpoint {
    async fn renew(&self, refresh_token: &str) -> Result<RenewedCredentials, RenewalError> {
        let request = ApiRequest::post(REFRESH_PATH)
            .json(&RefreshRequest { refresh_token })
            .map_err(|e| RenewalError::InvalidResponse(e.to_string()))?;

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| RenewalError::Transport(e.to_string()))?;

        if !response.is_success() {
            warn!(status = %response.status, "Refresh endpoint rejected renewal");
            return Err(RenewalError::Rejected(response.status));
        }

        let envelope: Envelope<RenewedCredentials> = response
            .json()
            .map_err(|e| RenewalError::InvalidResponse(e.to_string()))?;

        if !envelope.success {
            return Err(RenewalError::Unsuccessful(
                envelope.message.unwrap_or_else(|| "no message".to_string()),
            ));
        }

        let renewed = envelope
            .data
            .ok_or_else(|| RenewalError::InvalidResponse("envelope has no data".to_string()))?;
        debug!(rotated_refresh = renewed.refresh_token.is_some(), "Renewal succeeded");
        Ok(renewed)
    }
}
