//! Ollama HTTP client
//!
//! One pooled `reqwest::Client` is shared by every session. Transient HTTP
//! statuses and connection failures are retried with exponential backoff;
//! timeouts are not. After a timeout or connection failure the pool is
//! swapped for a fresh one so the next call does not reuse a dead socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agrotech_core::{GenerationOptions, PromptRequest, RawModelOutput};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{LlmTransport, TransportError};

/// HTTP statuses worth retrying
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Idle connections kept per host
const POOL_MAX_IDLE_PER_HOST: usize = 50;

/// Runtime options applied to every request that does not set its own
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_batch: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_gpu: Option<u32>,
}

/// Connection settings for an Ollama server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Server root, e.g. `http://localhost:11434`
    pub base_url: String,

    /// Model used for text-only prompts
    pub text_model: String,

    /// Model used when the prompt carries an image
    pub vision_model: String,

    #[serde(with = "secs")]
    pub text_timeout: Duration,

    #[serde(with = "secs")]
    pub vision_timeout: Duration,

    #[serde(with = "secs")]
    pub health_timeout: Duration,

    /// Retries after the first attempt
    pub max_retries: u32,

    /// Base delay of the exponential backoff
    #[serde(with = "millis")]
    pub backoff_factor: Duration,

    #[serde(default)]
    pub runtime: RuntimeOptions,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            text_model: "gemma3:4b".to_string(),
            vision_model: "qwen2.5vl:3b".to_string(),
            text_timeout: Duration::from_secs(60),
            vision_timeout: Duration::from_secs(180),
            health_timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_factor: Duration::from_secs(1),
            runtime: RuntimeOptions::default(),
        }
    }
}

impl OllamaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn with_vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = model.into();
        self
    }

    pub fn with_timeouts(mut self, text: Duration, vision: Duration) -> Self {
        self.text_timeout = text;
        self.vision_timeout = vision;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_factor: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn model_for(&self, request: &PromptRequest) -> &str {
        if request.has_image() {
            &self.vision_model
        } else {
            &self.text_model
        }
    }

    pub fn timeout_for(&self, request: &PromptRequest) -> Duration {
        if request.has_image() {
            self.vision_timeout
        } else {
            self.text_timeout
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_factor
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

/// Counters for calls made through the client
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransportStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retry_count: u64,
    pub pool_resets: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerationOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<&'a str>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Shared client for the Ollama `/api/generate` endpoint
pub struct OllamaClient {
    config: OllamaConfig,
    http: RwLock<Arc<reqwest::Client>>,
    stats: Mutex<TransportStats>,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, TransportError> {
        let http = build_http_client()?;
        Ok(Self {
            config,
            http: RwLock::new(Arc::new(http)),
            stats: Mutex::new(TransportStats::default()),
        })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.lock().clone()
    }

    /// Swap in a freshly built pool
    ///
    /// Calls already holding the old client finish on it.
    pub fn reset_pool(&self) {
        match build_http_client() {
            Ok(client) => {
                *self.http.write() = Arc::new(client);
                self.stats.lock().pool_resets += 1;
                tracing::warn!("HTTP connection pool reset");
            }
            Err(e) => tracing::error!("Failed to rebuild HTTP connection pool: {}", e),
        }
    }

    fn http(&self) -> Arc<reqwest::Client> {
        self.http.read().clone()
    }

    fn payload<'a>(&'a self, request: &'a PromptRequest) -> GenerateRequest<'a> {
        let mut options = request.options.clone();
        let runtime = &self.config.runtime;
        options.num_ctx = options.num_ctx.or(runtime.num_ctx);
        options.num_batch = options.num_batch.or(runtime.num_batch);
        options.num_gpu = options.num_gpu.or(runtime.num_gpu);

        GenerateRequest {
            model: self.config.model_for(request),
            prompt: &request.prompt,
            stream: false,
            options,
            images: request.image_base64.as_deref().map(|image| vec![image]),
        }
    }

    /// POST with retries on transient statuses and connection failures
    async fn send_with_retry(
        &self,
        payload: &GenerateRequest<'_>,
        timeout: Duration,
    ) -> Result<reqwest::Response, TransportError> {
        let url = self.config.generate_url();
        let mut attempt = 0u32;

        loop {
            let result = self
                .http()
                .post(&url)
                .timeout(timeout)
                .json(payload)
                .send()
                .await;

            let retry_reason = match &result {
                Ok(response) if RETRY_STATUSES.contains(&response.status().as_u16()) => {
                    format!("HTTP {}", response.status().as_u16())
                }
                Err(e) if e.is_connect() => e.to_string(),
                _ => String::new(),
            };

            if retry_reason.is_empty() || attempt >= self.config.max_retries {
                return result.map_err(|e| TransportError::from_reqwest(e, timeout));
            }

            let delay = self.config.backoff_delay(attempt);
            attempt += 1;
            self.stats.lock().retry_count += 1;
            tracing::warn!(
                "Generation attempt failed ({}), retry {}/{} in {:?}",
                retry_reason,
                attempt,
                self.config.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn execute(
        &self,
        request: &PromptRequest,
        timeout: Duration,
    ) -> Result<(String, u16), TransportError> {
        let payload = self.payload(request);
        let response = self.send_with_retry(&payload, timeout).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        Ok((body.response, status.as_u16()))
    }

    fn record(&self, success: bool, elapsed: Duration) {
        let mut stats = self.stats.lock();
        stats.total_requests += 1;
        if success {
            stats.successful_requests += 1;
        } else {
            stats.failed_requests += 1;
        }
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        stats.avg_response_time_ms = (stats.avg_response_time_ms
            * (stats.total_requests - 1) as f64
            + elapsed_ms)
            / stats.total_requests as f64;
    }
}

#[async_trait]
impl LlmTransport for OllamaClient {
    async fn generate(&self, request: &PromptRequest) -> Result<RawModelOutput, TransportError> {
        let model = self.config.model_for(request).to_string();
        let timeout = self.config.timeout_for(request);
        let start = Instant::now();

        tracing::info!(
            "[{}] Calling {} ({} chars, image: {})",
            request.role,
            model,
            request.prompt.len(),
            request.has_image()
        );

        let result = self.execute(request, timeout).await;
        let elapsed = start.elapsed();
        self.record(result.is_ok(), elapsed);

        match result {
            Ok((text, status)) => {
                tracing::info!(
                    "[{}] Response received in {:.2}s ({} chars)",
                    request.role,
                    elapsed.as_secs_f64(),
                    text.len()
                );
                Ok(RawModelOutput {
                    text,
                    status,
                    elapsed,
                    model,
                })
            }
            Err(e) => {
                tracing::error!(
                    "[{}] Generation failed after {:.2}s: {}",
                    request.role,
                    elapsed.as_secs_f64(),
                    e
                );
                if e.should_reset_pool() {
                    self.reset_pool();
                }
                Err(e)
            }
        }
    }

    async fn health_check(&self) -> bool {
        let result = self
            .http()
            .get(self.config.tags_url())
            .timeout(self.config.health_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                false
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.config.text_model
    }

    fn reset(&self) {
        self.reset_pool();
    }

    fn stats(&self) -> Option<TransportStats> {
        Some(OllamaClient::stats(self))
    }
}

fn build_http_client() -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
        .map_err(|e| TransportError::Build(e.to_string()))
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
