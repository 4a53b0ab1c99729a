//! Error types for the mock resolution engine.

use thiserror::Error;

/// Errors produced while loading definitions or resolving a request.
///
/// `NotFound` and `NoMockResponse` are expected outcomes: callers treat
/// them as "forward to the real upstream".
#[derive(Debug, Error)]
pub enum MockError {
    /// Definitions were already loaded into this resolver.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No definition matched the request host, method and path.
    #[error("no mock definition matches {method} {host}{path}")]
    NotFound {
        host: String,
        method: String,
        path: String,
    },

    /// A definition matched but none of its responses qualified.
    #[error("no mock response prepared for definition `{definition}`")]
    NoMockResponse { definition: String },

    /// Missing or unsupported Content-Type on a request that needs one.
    #[error("content type error: {0}")]
    ContentType(String),

    /// The request body could not be decoded for its Content-Type.
    #[error("failed to decode {format} body: {message}")]
    BodyDecode {
        format: &'static str,
        message: String,
    },

    /// Template rendering or response assembly failed.
    #[error("response synthesis failed: {0}")]
    Synthesis(String),

    /// A path template could not be compiled.
    #[error("invalid path pattern `{template}`: {reason}")]
    InvalidPattern { template: String, reason: String },

    /// A definition record is malformed.
    #[error("invalid definition {index}: {reason}")]
    InvalidDefinition { index: usize, reason: String },

    /// A definition source failed to produce records.
    #[error("definition source `{source_name}` failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    /// Reading the request body failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The real upstream call failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The caller's deadline elapsed before the mock could be returned.
    #[error("request cancelled: {0}")]
    Cancelled(String),
}

impl MockError {
    /// Whether this outcome means "no mock applies" rather than a failure.
    pub fn is_pass_through(&self) -> bool {
        matches!(self, MockError::NotFound { .. } | MockError::NoMockResponse { .. })
    }
}

/// Result alias used across the crate.
pub type Result<T, E = MockError> = std::result::Result<T, E>;
