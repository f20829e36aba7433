//! Authenticated request pipeline.
//!
//! Every request is sent with the stored access credential attached. A 401
//! triggers one renewal using the refresh credential, after which the
//! original request is replayed exactly once. If renewal fails the stored
//! credentials are cleared, which is the signal for the application to send
//! the user back to the login screen.
//!
//! Concurrent 401s share a single renewal: the first request to need one
//! starts it and parks a shared handle in `inflight`; every other request
//! that fails while it is running awaits the same handle and sees the same
//! outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::error::{ApiError, PipelineError, RenewalError, TransportError};
use super::renewal::{RenewalEndpoint, RenewedCredentials};
use super::transport::{ApiRequest, ApiResponse, Transport, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::auth::CredentialStore;
use crate::storage::StoreError;

/// Renewal timeout in seconds. Shorter than the request timeout: a slow
/// refresh holds up every request waiting on it.
pub const DEFAULT_RENEW_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub request_timeout: Duration,
    pub renew_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            renew_timeout: Duration::from_secs(DEFAULT_RENEW_TIMEOUT_SECS),
        }
    }
}

/// A request together with its one-shot retry marker.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    request: ApiRequest,
    retried: bool,
}

impl PendingRequest {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn is_retry(&self) -> bool {
        self.retried
    }

    /// The replay of this request. Consumes it so a request can only be
    /// marked once.
    pub fn into_retry(self) -> Self {
        Self {
            request: self.request,
            retried: true,
        }
    }
}

#[derive(Debug, Clone)]
enum RenewFailure {
    Renewal(RenewalError),
    StoreWrite(StoreError),
}

impl From<RenewFailure> for PipelineError {
    fn from(failure: RenewFailure) -> Self {
        match failure {
            RenewFailure::Renewal(e) => PipelineError::Renewal(e),
            RenewFailure::StoreWrite(e) => PipelineError::StoreWrite(e),
        }
    }
}

type RenewalHandle = Shared<BoxFuture<'static, Result<(), RenewFailure>>>;

struct InflightRenewal {
    id: u64,
    handle: RenewalHandle,
}

pub struct AuthPipeline {
    transport: Arc<dyn Transport>,
    renewal: Arc<dyn RenewalEndpoint>,
    store: Arc<CredentialStore>,
    config: PipelineConfig,
    inflight: Arc<Mutex<Option<InflightRenewal>>>,
    next_renewal_id: AtomicU64,
}

impl AuthPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        renewal: Arc<dyn RenewalEndpoint>,
        store: Arc<CredentialStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            transport,
            renewal,
            store,
            config,
            inflight: Arc::new(Mutex::new(None)),
            next_renewal_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Perform `request` with automatic authentication.
    ///
    /// Returns the response for any 2xx status. A 401 is absorbed by one
    /// renewal and replay; other statuses become `PipelineError::Api`.
    /// Dropping the returned future cancels the request and its replay.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, PipelineError> {
        let mut pending = PendingRequest::new(request);

        loop {
            let attached = self.store.get_access().await;
            let outbound = pending.request().authorized(attached.as_deref())?;
            let response = self.send(outbound).await?;

            if response.status != StatusCode::UNAUTHORIZED {
                return Self::check_response(response);
            }

            if pending.is_retry() {
                warn!(path = %pending.request().path, "Replayed request rejected, ending session");
                if let Err(e) = self.store.clear().await {
                    error!(error = %e, "Failed to clear credentials after rejected replay");
                }
                return Err(ApiError::Unauthorized.into());
            }

            debug!(
                path = %pending.request().path,
                had_credential = attached.is_some(),
                "Access credential rejected, renewing"
            );
            self.renew(attached.as_deref()).await?;
            pending = pending.into_retry();
        }
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut(timeout)),
        }
    }

    fn check_response(response: ApiResponse) -> Result<ApiResponse, PipelineError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.text()).into())
        }
    }

    /// Renew the access credential, or wait on the renewal already running.
    ///
    /// `attached` is the credential the failed request was sent with. If the
    /// store already holds a different one, some other request renewed in
    /// the meantime and there is nothing left to do.
    async fn renew(&self, attached: Option<&str>) -> Result<(), PipelineError> {
        let handle = {
            let mut slot = self.inflight.lock().await;
            let existing = slot
                .as_ref()
                .map(|inflight| (inflight.id, inflight.handle.clone()));

            match existing {
                Some((id, handle)) => {
                    debug!(renewal_id = id, "Joining in-flight renewal");
                    handle
                }
                None => {
                    if let Some(current) = self.store.get_access().await {
                        if attached != Some(current.as_str()) {
                            debug!("Access credential already renewed, replaying");
                            return Ok(());
                        }
                    }

                    let id = self.next_renewal_id.fetch_add(1, Ordering::Relaxed);
                    debug!(renewal_id = id, "Starting renewal");
                    let handle = self.start_renewal(id);
                    *slot = Some(InflightRenewal {
                        id,
                        handle: handle.clone(),
                    });
                    handle
                }
            }
        };

        handle.await.map_err(PipelineError::from)
    }

    /// Build the shared renewal future. It owns everything it touches so it
    /// can outlive the request that started it, and removes itself from the
    /// in-flight slot once the store reflects its outcome.
    fn start_renewal(&self, id: u64) -> RenewalHandle {
        let store = Arc::clone(&self.store);
        let endpoint = Arc::clone(&self.renewal);
        let timeout = self.config.renew_timeout;
        let slot = Arc::downgrade(&self.inflight);
        let generation = self.store.generation();

        async move {
            let outcome = run_renewal(&store, generation, endpoint.as_ref(), timeout).await;

            if let Some(slot) = slot.upgrade() {
                let mut slot = slot.lock().await;
                if slot.as_ref().map(|inflight| inflight.id) == Some(id) {
                    *slot = None;
                }
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

async fn run_renewal(
    store: &CredentialStore,
    generation: u64,
    endpoint: &dyn RenewalEndpoint,
    timeout: Duration,
) -> Result<(), RenewFailure> {
    let result = match store.get_refresh().await {
        None => Err(RenewalError::MissingRefreshToken),
        Some(refresh) => match tokio::time::timeout(timeout, endpoint.renew(&refresh)).await {
            Ok(result) => result,
            Err(_) => Err(RenewalError::TimedOut(timeout)),
        },
    };

    let renewed = match result {
        Ok(renewed) => renewed,
        Err(e) => {
            warn!(error = %e, "Credential renewal failed, clearing credentials");
            clear_after_failure(store, generation).await;
            return Err(RenewFailure::Renewal(e));
        }
    };

    match persist(store, generation, &renewed).await {
        Ok(true) => {}
        Ok(false) => {
            warn!("Credentials changed while renewing, discarding renewed credentials");
            return Err(RenewFailure::Renewal(RenewalError::Superseded));
        }
        Err(e) => {
            error!(error = %e, "Renewed credentials could not be stored, clearing credentials");
            clear_after_failure(store, generation).await;
            return Err(RenewFailure::StoreWrite(e));
        }
    }

    info!(
        rotated_refresh = renewed.refresh_token.is_some(),
        "Access credential renewed"
    );
    Ok(())
}

/// A missing rotated refresh credential means the stored one is still valid.
async fn persist(
    store: &CredentialStore,
    generation: u64,
    renewed: &RenewedCredentials,
) -> Result<bool, StoreError> {
    store
        .apply_renewal(
            generation,
            &renewed.access_token,
            renewed.refresh_token.as_deref(),
        )
        .await
}

/// Clear the identity the renewal was started for; a logout or new login
/// in the meantime is left alone.
async fn clear_after_failure(store: &CredentialStore, generation: u64) {
    if let Err(e) = store.clear_if_current(generation).await {
        error!(error = %e, "Failed to clear credentials after renewal failure");
    }
}
