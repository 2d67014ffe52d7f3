//! HTTP handler implementation.
//!
//! This module maps queued operations onto a REST backend. The actual HTTP
//! client is abstracted via a trait so the engine does not depend on a
//! particular HTTP library (reqwest, hyper, a browser fetch bridge, ...).

use crate::error::{SyncError, SyncResult};
use crate::executor::EntityHandler;
use crate::operation::{EntityKind, Verb};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

/// Failure reported by an [`HttpClient`].
#[derive(Debug, Error)]
pub enum HttpError {
    /// No response was received (DNS, refused connection, reset, ...).
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The server answered with a non-success status.
    #[error("status {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

impl From<HttpError> for SyncError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Unreachable(message) => SyncError::connectivity(message),
            HttpError::Status { code, body } => SyncError::rejected_with_status(code, body),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request with an optional JSON body and returns the response
    /// body of a successful (2xx) response.
    async fn send(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> Result<Vec<u8>, HttpError>;
}

/// Handler that applies operations through a REST API.
///
/// | kind        | create             | update                  | delete                     |
/// |-------------|--------------------|-------------------------|----------------------------|
/// | settings    | unsupported        | `PUT /settings`         | unsupported                |
/// | sale        | `POST /sales`      | unsupported             | unsupported                |
/// | others      | `POST /{plural}`   | `PUT /{plural}/{id}`    | `DELETE /{plural}/{id}`    |
///
/// Update and delete take the entity id from the payload's `id` field,
/// percent-encoded as one path segment.
pub struct HttpHandler<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpHandler<C> {
    /// Creates a new HTTP handler.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn collection(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Product => "products",
            EntityKind::Sale => "sales",
            EntityKind::Customer => "customers",
            EntityKind::Supplier => "suppliers",
            EntityKind::Expense => "expenses",
            EntityKind::Transaction => "transactions",
            EntityKind::Settings => "settings",
        }
    }

    fn supports(kind: EntityKind, verb: Verb) -> bool {
        match kind {
            EntityKind::Settings => verb == Verb::Update,
            EntityKind::Sale => verb == Verb::Create,
            _ => true,
        }
    }

    fn entity_url(&self, kind: EntityKind, verb: Verb, payload: &Value) -> SyncResult<String> {
        let collection = Self::collection(kind);
        let id = match payload.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(SyncError::InvalidPayload(format!(
                    "{} {} payload has no id",
                    verb, kind
                )))
            }
        };
        Ok(format!("{}/{}/{}", self.base_url, collection, urlencoding::encode(&id)))
    }

    async fn request(&self, kind: EntityKind, verb: Verb, payload: &Value) -> SyncResult<()> {
        if !Self::supports(kind, verb) {
            return Err(SyncError::Unsupported { kind, verb });
        }

        let (method, url, body) = match (kind, verb) {
            (EntityKind::Settings, _) => (
                Method::Put,
                format!("{}/settings", self.base_url),
                Some(serde_json::to_vec(payload)?),
            ),
            (_, Verb::Create) => (
                Method::Post,
                format!("{}/{}", self.base_url, Self::collection(kind)),
                Some(serde_json::to_vec(payload)?),
            ),
            (_, Verb::Update) => (
                Method::Put,
                self.entity_url(kind, verb, payload)?,
                Some(serde_json::to_vec(payload)?),
            ),
            (_, Verb::Delete) => (Method::Delete, self.entity_url(kind, verb, payload)?, None),
        };

        debug!(%method, %url, "sending operation");
        match self.client.send(method, &url, body).await {
            Ok(_) => {
                *self.last_error.write() = None;
                Ok(())
            }
            Err(e) => {
                *self.last_error.write() = Some(e.to_string());
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl<C: HttpClient> EntityHandler for HttpHandler<C> {
    async fn create(&self, kind: EntityKind, payload: &Value) -> SyncResult<()> {
        self.request(kind, Verb::Create, payload).await
    }

    async fn update(&self, kind: EntityKind, payload: &Value) -> SyncResult<()> {
        self.request(kind, Verb::Update, payload).await
    }

    async fn delete(&self, kind: EntityKind, payload: &Value) -> SyncResult<()> {
        self.request(kind, Verb::Delete, payload).await
    }
}
