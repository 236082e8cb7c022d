//! Event source client.
//!
//! Fetches the currently announced events from a rule set's endpoint. Each
//! fetch is a single bounded GET; the whole body is decoded before anything
//! is returned, so callers never act on a partial read.

use std::time::Duration;

use async_trait::async_trait;
use gamescale_reconcile::{GameEvent, ReconcileError};
use thiserror::Error;
use tracing::{debug, error};

/// Errors from polling the event source. All of them mean "poll failed".
#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("received non-OK status from {url}: {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<EventSourceError> for ReconcileError {
    fn from(err: EventSourceError) -> Self {
        match err {
            EventSourceError::Timeout { url, timeout } => ReconcileError::Timeout {
                resource: url,
                elapsed: timeout,
            },
            other => ReconcileError::TransientIo(other.to_string()),
        }
    }
}

/// Provider of announced events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch all events currently announced at `endpoint`.
    async fn fetch(&self, endpoint: &str) -> Result<Vec<GameEvent>, EventSourceError>;
}

/// HTTP event source: `GET <endpoint>` returning a JSON array of events.
pub struct HttpEventSource {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpEventSource {
    /// Create a client whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, EventSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EventSourceError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> EventSourceError {
        if err.is_timeout() {
            EventSourceError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            EventSourceError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn fetch(&self, endpoint: &str) -> Result<Vec<GameEvent>, EventSourceError> {
        debug!(url = %endpoint, "Polling event source");

        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| self.classify(endpoint, e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            error!(url = %endpoint, status = %status, "Event source returned non-OK status");
            return Err(EventSourceError::Status {
                url: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify(endpoint, e))?;

        let events: Vec<GameEvent> =
            serde_json::from_slice(&body).map_err(|e| EventSourceError::Decode {
                url: endpoint.to_string(),
                message: e.to_string(),
            })?;

        debug!(url = %endpoint, event_count = events.len(), "Fetched events");
        Ok(events)
    }
}
