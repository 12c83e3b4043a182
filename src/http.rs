//! HTTP client for the walking-route service.
//!
//! This module provides:
//! - Connection pooling through a shared reqwest client
//! - `POST /routes/proposals` and `POST /routes/recalculate`
//! - Automatic retry with exponential backoff on 429 and connection errors
//! - Mapping of HTTP status and body failures onto [`TransportError`]

use crate::error::TransportError;
use crate::recalculation::{
    ProposalRequest, ProposalResponse, RecalculationRequest, RecalculationResponse, RoutingClient, UpdatedRoute,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Routing service client.
#[derive(Debug, Clone)]
pub struct HttpRoutingClient {
    client: Client,
    base_url: String,
}

impl HttpRoutingClient {
    /// Create a client for the service at `base_url` (e.g. `https://api.example.com`).
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask for route proposals.
    pub async fn propose_routes(&self, request: &ProposalRequest) -> Result<ProposalResponse, TransportError> {
        let response: ProposalResponse = post_json(&self.client, &self.url("/routes/proposals"), request).await?;
        info!("[RoutingClient] Received {} route proposals", response.proposals.len());
        Ok(response)
    }

    /// Ask for a route from the walker's current position.
    pub async fn recalculate_route(&self, request: &RecalculationRequest) -> Result<UpdatedRoute, TransportError> {
        let response: RecalculationResponse =
            post_json(&self.client, &self.url("/routes/recalculate"), request).await?;
        Ok(response.updated_route)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl RoutingClient for HttpRoutingClient {
    fn recalculate(&self, request: RecalculationRequest) -> BoxFuture<'static, Result<UpdatedRoute, TransportError>> {
        let this = self.clone();
        async move { this.recalculate_route(&request).await }.boxed()
    }
}

/// Classify a non-success status.
fn status_error(status: StatusCode) -> TransportError {
    if status.is_client_error() {
        TransportError::Client { status: status.as_u16() }
    } else {
        TransportError::Server { status: status.as_u16() }
    }
}

/// Backoff after the `count`-th consecutive 429: 1s, 2s, 4s max.
fn rate_limit_backoff(count: u32) -> Duration {
    Duration::from_millis(500 * (1 << count.min(3)))
}

/// Backoff after the `retries`-th connection error: 400ms, 800ms, 1.6s.
fn error_backoff(retries: u32) -> Duration {
    Duration::from_millis(200 * (1 << retries))
}

async fn post_json<B, T>(client: &Client, url: &str, body: &B) -> Result<T, TransportError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let mut retries = 0;
    let req_start = Instant::now();

    loop {
        let response = client.post(url).json(body).send().await;

        match response {
            Ok(resp) => {
                let status = resp.status();

                if status == StatusCode::TOO_MANY_REQUESTS {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(status_error(status));
                    }
                    let wait = rate_limit_backoff(retries);
                    warn!("[RoutingClient] 429 from {}, retry {} with {:?} backoff", url, retries, wait);
                    tokio::time::sleep(wait).await;
                    continue;
                }

                if !status.is_success() {
                    warn!("[RoutingClient] {} returned HTTP {}", url, status);
                    return Err(status_error(status));
                }

                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| TransportError::Request(format!("Body download error: {}", e)))?;

                let data = serde_json::from_slice(&bytes).map_err(|e| {
                    warn!("[RoutingClient] Could not decode response from {}: {}", url, e);
                    TransportError::Decode(e.to_string())
                })?;

                debug!(
                    "[RoutingClient] POST {} ok in {:?} ({:.1}KB)",
                    url,
                    req_start.elapsed(),
                    bytes.len() as f64 / 1024.0
                );
                return Ok(data);
            }
            Err(e) => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(TransportError::Request(e.to_string()));
                }
                let wait = error_backoff(retries);
                warn!("[RoutingClient] Error: {}, retry {} after {:?}", e, retries, wait);
                tokio::time::sleep(wait).await;
            }
        }
    }
}
