//! Backend REST API: the response envelope, its error type and the HTTP client.
//!
//! DESIGN
//! ======
//! The engine talks to the backend only through the `Backend` trait: list,
//! create, update and delete per entity collection. `HttpBackend` is the
//! reqwest implementation; tests substitute an in-memory backend.
//! Envelope parsing lives in the pure `parse_envelope` for testability.
//!
//! ERROR HANDLING
//! ==============
//! Every failure is an `ApiError` value: `Network` when the request never
//! completed, `Http` for non-2xx statuses or `success: false` envelopes
//! (carrying status, message and field errors), `Decode` when a 2xx body is
//! not a valid envelope.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::model::{EntityId, EntityKind};

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The request never completed (connect, timeout, body read).
    #[error("request failed: {0}")]
    Network(String),

    /// The backend rejected the request.
    #[error("request rejected{}: {message}", status_suffix(.status))]
    Http { status: Option<u16>, message: String, field_errors: Option<Value> },

    /// The response body was not a valid envelope.
    #[error("response decode failed: {0}")]
    Decode(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            _ => None,
        }
    }

    /// Transient failures worth retrying.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http { status: Some(429 | 500..=599), .. })
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
}

/// Unwrap a `{success, data, message}` envelope into its `data`.
pub(crate) fn parse_envelope(status: u16, body: &str) -> Result<Value, ApiError> {
    let ok = (200..300).contains(&status);
    if ok && body.trim().is_empty() {
        return Ok(Value::Null);
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) if ok && envelope.success => Ok(envelope.data),
        Ok(envelope) => Err(ApiError::Http {
            status: Some(status),
            message: envelope
                .message
                .unwrap_or_else(|| format!("request failed with status {status}")),
            field_errors: (!envelope.data.is_null()).then_some(envelope.data),
        }),
        Err(e) if ok => Err(ApiError::Decode(e.to_string())),
        Err(_) => Err(ApiError::Http {
            status: Some(status),
            message: format!("request failed with status {status}"),
            field_errors: None,
        }),
    }
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Request/response access to the entity collections.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Fetch every record of a collection.
    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, ApiError>;

    /// Create a record; the response carries the confirmed `id`.
    async fn create(&self, kind: EntityKind, fields: Map<String, Value>) -> Result<Value, ApiError>;

    /// Update fields of an existing record.
    async fn update(&self, kind: EntityKind, id: EntityId, fields: Map<String, Value>) -> Result<Value, ApiError>;

    /// Delete a record.
    async fn delete(&self, kind: EntityKind, id: EntityId) -> Result<(), ApiError>;
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// Request and connect timeouts for the HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request: Duration,
    pub connect: Duration,
}

/// `Backend` over REST collection endpoints rooted at `base_url`.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns `Network` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeouts: HttpTimeouts) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeouts.request)
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| ApiError::Network(format!("http client build failed: {e}")))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.collection())
    }

    fn entity_url(&self, kind: EntityKind, id: EntityId) -> String {
        format!("{}/{}/{id}", self.base_url, kind.collection())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        parse_envelope(status, &text)
    }
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, ApiError> {
        match self.send(self.http.get(self.collection_url(kind))).await? {
            Value::Array(records) => Ok(records),
            other => Err(ApiError::Decode(format!("expected a list of {}, got {other}", kind.collection()))),
        }
    }

    async fn create(&self, kind: EntityKind, fields: Map<String, Value>) -> Result<Value, ApiError> {
        self.send(self.http.post(self.collection_url(kind)).json(&fields))
            .await
    }

    async fn update(&self, kind: EntityKind, id: EntityId, fields: Map<String, Value>) -> Result<Value, ApiError> {
        self.send(self.http.patch(self.entity_url(kind, id)).json(&fields))
            .await
    }

    async fn delete(&self, kind: EntityKind, id: EntityId) -> Result<(), ApiError> {
        self.send(self.http.delete(self.entity_url(kind, id)))
            .await
            .map(|_| ())
    }
}
