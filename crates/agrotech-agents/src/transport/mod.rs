//! Inference transport
//!
//! The [`LlmTransport`] trait is the seam between agent roles and the model
//! backend. Production code uses [`OllamaClient`]; tests plug in scripted
//! backends.

pub mod ollama;

pub use ollama::{OllamaClient, OllamaConfig, RuntimeOptions, TransportStats};

use std::time::Duration;

use agrotech_core::{PromptRequest, RawModelOutput};
use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failures
///
/// Everything except [`TransportError::Build`] is recoverable: agent roles
/// turn it into a fallback result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

impl TransportError {
    /// Fatal errors abort the pipeline instead of degrading to a fallback
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Build(_))
    }

    /// Errors that leave the connection pool in a suspect state
    pub fn should_reset_pool(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Connection(_) => true,
            TransportError::Request(message) => {
                let message = message.to_lowercase();
                message.contains("timeout") || message.contains("connection")
            }
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if err.is_builder() {
            TransportError::Build(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Sends one prompt to an inference backend
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Run a single non-streaming generation
    async fn generate(&self, request: &PromptRequest) -> Result<RawModelOutput, TransportError>;

    /// Whether the backend answers at all
    async fn health_check(&self) -> bool;

    /// Text model name, reported by the HTTP surface
    fn model_name(&self) -> &str;

    /// Discard pooled connections and start fresh
    fn reset(&self) {}

    /// Call counters, when the backend keeps any
    fn stats(&self) -> Option<TransportStats> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_build_errors_are_fatal() {
        assert!(TransportError::Build("tls".into()).is_fatal());
        assert!(!TransportError::Timeout(Duration::from_secs(60)).is_fatal());
        assert!(!TransportError::Status {
            status: 503,
            body: String::new()
        }
        .is_fatal());
    }

    #[test]
    fn test_pool_reset_classification() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).should_reset_pool());
        assert!(TransportError::Connection("refused".into()).should_reset_pool());
        assert!(TransportError::Request("Connection reset by peer".into()).should_reset_pool());
        assert!(TransportError::Request("read TIMEOUT".into()).should_reset_pool());
        assert!(!TransportError::Request("invalid header".into()).should_reset_pool());
        assert!(!TransportError::Decode("eof".into()).should_reset_pool());
    }
}
