//! Ranked-endpoint HTTP client with failover and a politeness delay.
//!
//! Endpoints are tried strictly in rank order. A network error or an
//! unexpected status moves on to the next endpoint; the configured
//! capacity status stops immediately because every mirror of the same API
//! enforces the same limit. There are no retries beyond one pass over the
//! list.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::FetchError;
use crate::encoder::{EncodedQuery, HttpMethod};
use crate::profile::TransportConfig;

/// Maximum length of the response body preview kept in failure details.
const BODY_PREVIEW_LEN: usize = 200;

/// What one logical call against the endpoint list produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// A 2xx response with its raw body.
    Success(String),
    /// The API reported that the queried area is too large.
    CapacityExceeded,
    /// Every endpoint failed; details of each attempt, in rank order.
    OtherFailure(String),
}

/// Sends an encoded query to a remote API.
#[async_trait]
pub trait EndpointClient: Send + Sync {
    /// Performs one logical call, failing over across endpoints.
    async fn call(&self, query: &EncodedQuery) -> CallOutcome;
}

/// [`EndpointClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpEndpointClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
    request_delay: Duration,
    capacity_status: Option<StatusCode>,
}

impl HttpEndpointClient {
    /// Wraps an existing HTTP client.
    #[must_use]
    pub const fn new(
        client: reqwest::Client,
        endpoints: Vec<String>,
        request_delay: Duration,
        capacity_status: Option<StatusCode>,
    ) -> Self {
        Self {
            client,
            endpoints,
            request_delay,
            capacity_status,
        }
    }

    /// Builds a client from a profile's `[transport]` section.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built, or
    /// [`FetchError::Config`] if the capacity status is not a valid HTTP
    /// status code.
    pub fn from_transport(transport: &TransportConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(transport.timeout())
            .user_agent(transport.user_agent.clone())
            .build()?;

        let capacity_status = transport
            .capacity_exceeded_status
            .map(|code| {
                StatusCode::from_u16(code).map_err(|e| FetchError::Config {
                    message: format!("capacity_exceeded_status {code}: {e}"),
                })
            })
            .transpose()?;

        Ok(Self::new(
            client,
            transport.endpoints.clone(),
            transport.request_delay(),
            capacity_status,
        ))
    }

    /// Candidate URLs in rank order.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn request(&self, url: &str, query: &EncodedQuery) -> reqwest::RequestBuilder {
        match query.method {
            HttpMethod::Get => self.client.get(url).query(&query.params),
            HttpMethod::Post => self.client.post(url).form(&query.params),
        }
    }

    /// One attempt against one endpoint. `Err` carries the failure detail.
    async fn attempt(&self, url: &str, query: &EncodedQuery) -> Result<CallOutcome, String> {
        let response = self
            .request(url, query)
            .send()
            .await
            .map_err(|e| format!("{url}: {e}"))?;

        let status = response.status();
        if Some(status) == self.capacity_status {
            return Ok(CallOutcome::CapacityExceeded);
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("{url}: reading body failed: {e}"))?;

        if status.is_success() {
            Ok(CallOutcome::Success(body))
        } else {
            Err(format!("{url}: HTTP {status}: {}", preview(&body)))
        }
    }
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl EndpointClient for HttpEndpointClient {
    async fn call(&self, query: &EncodedQuery) -> CallOutcome {
        let mut failures = Vec::new();

        for (rank, url) in self.endpoints.iter().enumerate() {
            log::debug!("Attempt {} of {}: {url}", rank + 1, self.endpoints.len());
            let result = self.attempt(url, query).await;

            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            match result {
                Ok(outcome) => {
                    if outcome == CallOutcome::CapacityExceeded {
                        log::debug!("{url} reports the area is too large");
                    }
                    return outcome;
                }
                Err(detail) => {
                    log::warn!("Endpoint failed, trying next: {detail}");
                    failures.push(detail);
                }
            }
        }

        if failures.is_empty() {
            failures.push("no endpoints configured".to_string());
        }
        CallOutcome::OtherFailure(failures.join("; "))
    }
}
