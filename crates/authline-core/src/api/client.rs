//! API client for communicating with the storefront REST API.
//!
//! `ApiClient` bundles one surface's transport, credential store,
//! authenticated pipeline and session, and offers typed request helpers
//! that unwrap the response envelope.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::envelope::Envelope;
use super::error::PipelineError;
use super::pipeline::{AuthPipeline, PipelineConfig};
use super::renewal::{HttpRenewalEndpoint, RenewalEndpoint};
use super::transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
use crate::auth::{CredentialStore, Session};
use crate::config::Config;

/// API client for one application surface.
/// Clone is cheap - everything inside is shared.
#[derive(Clone)]
pub struct ApiClient {
    pipeline: Arc<AuthPipeline>,
    session: Arc<Session>,
}

impl ApiClient {
    /// Wire up a client from configuration: reqwest transport bound to the
    /// configured origin, the surface's storage backend, and HTTP renewal.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let pipeline_config = config.pipeline_config();
        let transport: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::new(&config.base_url, pipeline_config.request_timeout)
                .context("Failed to build HTTP client")?,
        );
        let backend = config.open_backend()?;
        let store = Arc::new(CredentialStore::open(backend, config.surface).await);

        debug!(surface = %config.surface, base_url = %config.base_url, "API client configured");
        Ok(Self::new(transport, store, pipeline_config))
    }

    /// Build a client over an existing transport and store, renewing through
    /// the backend's refresh endpoint on the same transport.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        config: PipelineConfig,
    ) -> Self {
        let renewal: Arc<dyn RenewalEndpoint> =
            Arc::new(HttpRenewalEndpoint::new(transport.clone()));
        Self::with_renewal(transport, renewal, store, config)
    }

    pub fn with_renewal(
        transport: Arc<dyn Transport>,
        renewal: Arc<dyn RenewalEndpoint>,
        store: Arc<CredentialStore>,
        config: PipelineConfig,
    ) -> Self {
        let pipeline = Arc::new(AuthPipeline::new(transport.clone(), renewal, store, config));
        let session = Arc::new(Session::new(transport, pipeline.clone()));
        Self { pipeline, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.pipeline.store()
    }

    pub fn pipeline(&self) -> &Arc<AuthPipeline> {
        &self.pipeline
    }

    /// Perform a raw request with automatic authentication
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, PipelineError> {
        self.pipeline.execute(request).await
    }

    /// Perform a request and unwrap the `data` field of its envelope
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, PipelineError> {
        let response = self.pipeline.execute(request).await?;
        let envelope: Envelope<T> = response.json()?;
        Ok(envelope.into_data()?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PipelineError> {
        self.fetch(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PipelineError> {
        self.send_json(Method::POST, path, body).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PipelineError> {
        self.send_json(Method::PUT, path, body).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, PipelineError> {
        self.fetch(ApiRequest::delete(path)).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, PipelineError> {
        self.fetch(ApiRequest::new(method, path).json(body)?).await
    }
}
