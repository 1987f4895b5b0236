//! Error taxonomy shared by the managers, the provider layer and the store.
//!
//! Tool invocation never surfaces these directly: the engine folds them into
//! an [`ExecutionResult::Error`](crate::engine::ExecutionResult). Managers
//! return them for configuration problems, and upstream model failures are
//! propagated to the caller untouched.

use std::fmt;

use thiserror::Error;

/// Kind of entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Tool,
    Model,
    Server,
    Step,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Entity::Tool => "tool",
            Entity::Model => "model",
            Entity::Server => "server",
            Entity::Step => "execution step",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ToolgateError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: Entity, id: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("unsupported provider type: {0}")]
    UnsupportedProvider(String),

    #[error("{provider} request failed: {source}")]
    Upstream {
        provider: String,
        #[source]
        source: UpstreamError,
    },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ToolgateError {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        ToolgateError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Failure talking to a model vendor.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Failure reading or writing the key/value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = ToolgateError> = std::result::Result<T, E>;
