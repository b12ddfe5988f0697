//! Scripted transport for tests and offline demos

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use agrotech_core::{PromptRequest, RawModelOutput};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::transport::{LlmTransport, TransportError};

type Reply = Result<String, TransportError>;

/// Backend that answers from a script instead of a model
///
/// Queued replies are consumed first; once empty, every call gets the
/// default reply. All requests are recorded.
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Reply>>,
    default_reply: Reply,
    healthy: bool,
    latency: Duration,
    requests: Mutex<Vec<PromptRequest>>,
}

impl ScriptedTransport {
    fn with_default(default_reply: Reply) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default_reply,
            healthy: true,
            latency: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`
    pub fn replying(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_default(Ok(text.into())))
    }

    /// Every call times out
    pub fn timing_out() -> Arc<Self> {
        Self::failing(TransportError::Timeout(Duration::from_secs(60)))
    }

    pub fn failing(error: TransportError) -> Arc<Self> {
        Arc::new(Self::with_default(Err(error)))
    }

    /// Answer with `replies` in order, then time out
    pub fn sequence(replies: Vec<Reply>) -> Arc<Self> {
        let transport = Self::with_default(Err(TransportError::Timeout(Duration::from_secs(60))));
        *transport.queue.lock() = replies.into();
        Arc::new(transport)
    }

    /// Report the backend as unreachable
    pub fn unhealthy() -> Arc<Self> {
        let mut transport = Self::with_default(Err(TransportError::Connection(
            "connection refused".to_string(),
        )));
        transport.healthy = false;
        Arc::new(transport)
    }

    /// Delay every reply
    pub fn slow(text: impl Into<String>, latency: Duration) -> Arc<Self> {
        let mut transport = Self::with_default(Ok(text.into()));
        transport.latency = latency;
        Arc::new(transport)
    }

    pub fn requests(&self) -> Vec<PromptRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn generate(&self, request: &PromptRequest) -> Result<RawModelOutput, TransportError> {
        self.requests.lock().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        reply.map(|text| RawModelOutput {
            text,
            status: 200,
            elapsed: self.latency,
            model: self.model_name().to_string(),
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
