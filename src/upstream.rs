//! Upstream query/command API client ("EnterpriseDatabase")
//!
//! The core only talks to the upstream persistence/query API through this
//! narrow request/response contract. All calls are fire-and-forget from
//! the core's perspective: failures are caught, logged and replaced with a
//! degraded-but-well-formed empty response plus a synthetic critical
//! alert raised by the monitor actor. There is no automatic retry.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::MonitoredEntity;
use crate::alerting::Alert;

/// Result type alias for upstream operations
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors that can occur talking to the upstream API
#[derive(Debug)]
pub enum UpstreamError {
    /// Request could not be sent (connect failure, timeout)
    RequestFailed(String),

    /// The API answered with a non-success status
    Status(u16),

    /// The response body could not be decoded
    DecodeFailed(String),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::RequestFailed(msg) => {
                write!(f, "upstream request failed: {}", msg)
            }
            UpstreamError::Status(code) => write!(f, "upstream returned status {}", code),
            UpstreamError::DecodeFailed(msg) => {
                write!(f, "failed to decode upstream response: {}", msg)
            }
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpstreamError::DecodeFailed(err.to_string())
        } else {
            UpstreamError::RequestFailed(err.to_string())
        }
    }
}

/// Append-only log record kinds accepted by the upstream API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LogRecord {
    Activity {
        entity_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Command {
        message_id: String,
        entity_id: String,
        command: String,
        timestamp: DateTime<Utc>,
    },
    Alert {
        alert: Alert,
    },
}

/// Contract towards the upstream persistence/query API.
#[async_trait]
pub trait EnterpriseApi: Send + Sync {
    /// Fetch a snapshot of monitored entities and their latest status.
    async fn fetch_entities(&self) -> UpstreamResult<Vec<MonitoredEntity>>;

    /// Persist the current status/health of one entity.
    async fn persist_entity(&self, entity: &MonitoredEntity) -> UpstreamResult<()>;

    /// Append an activity, command or alert log record.
    async fn append_log(&self, record: &LogRecord) -> UpstreamResult<()>;
}

#[derive(Debug, Deserialize)]
struct EntitiesResponse {
    entities: Vec<MonitoredEntity>,
}

/// HTTP implementation of [`EnterpriseApi`].
#[derive(Debug, Clone)]
pub struct HttpEnterpriseApi {
    /// HTTP client (reused across requests for efficiency)
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpEnterpriseApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.header("X-FLEETWATCH-SECRET", token);
        }
        request
    }
}

#[async_trait]
impl EnterpriseApi for HttpEnterpriseApi {
    #[instrument(skip(self))]
    async fn fetch_entities(&self) -> UpstreamResult<Vec<MonitoredEntity>> {
        trace!("fetching entity snapshot");

        let response = self
            .request(reqwest::Method::GET, "/api/v1/entities")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        let body: EntitiesResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::DecodeFailed(e.to_string()))?;

        debug!("fetched snapshot of {} entities", body.entities.len());
        Ok(body.entities)
    }

    #[instrument(skip(self, entity), fields(entity_id = %entity.id))]
    async fn persist_entity(&self, entity: &MonitoredEntity) -> UpstreamResult<()> {
        let path = format!("/api/v1/entities/{}/status", entity.id);
        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(entity)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        trace!("persisted entity status");
        Ok(())
    }

    #[instrument(skip(self, record))]
    async fn append_log(&self, record: &LogRecord) -> UpstreamResult<()> {
        let response = self
            .request(reqwest::Method::POST, "/api/v1/logs")
            .json(record)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        Ok(())
    }
}
