//! REST API client module for the storefront backend.
//!
//! This module provides the `ApiClient` for performing requests with
//! automatic authentication, and the pieces it is built from: the
//! `Transport` that sends requests, the `RenewalEndpoint` that exchanges a
//! refresh credential for a new access credential, and the `AuthPipeline`
//! that attaches credentials and recovers from expiry.
//!
//! The API uses bearer token authentication; responses are wrapped in a
//! standard `{ success, data, timestamp }` envelope.

pub mod client;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod renewal;
pub mod transport;

pub use client::ApiClient;
pub use envelope::Envelope;
pub use error::{ApiError, PipelineError, RenewalError, TransportError};
pub use pipeline::{AuthPipeline, PendingRequest, PipelineConfig};
pub use renewal::{HttpRenewalEndpoint, RenewalEndpoint, RenewedCredentials};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};

pub use reqwest::{Method, StatusCode};
