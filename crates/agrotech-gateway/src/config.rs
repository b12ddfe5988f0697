//! Gateway configuration
//!
//! Defaults, then a JSON file or the environment (`.env` is honoured), then
//! command-line overrides applied by the binary.

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use agrotech_agents::transport::RuntimeOptions;
use agrotech_agents::OllamaConfig;

use crate::{GatewayError, Result, DEFAULT_HOST, DEFAULT_PORT};

pub const ENV_OLLAMA_URL: &str = "OLLAMA_URL";
pub const ENV_OLLAMA_MODEL: &str = "OLLAMA_MODEL";
pub const ENV_OLLAMA_VISION_MODEL: &str = "OLLAMA_VISION_MODEL";
pub const ENV_HOST: &str = "AGROTECH_HOST";
pub const ENV_PORT: &str = "AGROTECH_PORT";
pub const ENV_TEXT_TIMEOUT: &str = "AGROTECH_TEXT_TIMEOUT_SECS";
pub const ENV_VISION_TIMEOUT: &str = "AGROTECH_VISION_TIMEOUT_SECS";
pub const ENV_MAX_RETRIES: &str = "AGROTECH_MAX_RETRIES";
pub const ENV_STAGE_DELAY: &str = "AGROTECH_STAGE_DELAY_MS";

/// Main gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum concurrent WebSocket connections
    pub max_connections: usize,

    /// Inference backend
    pub ollama: OllamaSettings,

    /// Pipeline behaviour
    pub pipeline: PipelineSettings,

    /// Per-connection bookkeeping
    pub session: SessionSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: 100,
            ollama: OllamaSettings::default(),
            pipeline: PipelineSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set max connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the Ollama server root
    pub fn with_ollama_url(mut self, url: impl Into<String>) -> Self {
        self.ollama.url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the text model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.ollama.model = model.into();
        self
    }

    /// Set the pause between pipeline stages
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.pipeline.stage_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Defaults overridden by environment variables, after loading `.env`
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_OLLAMA_URL) {
            config = config.with_ollama_url(url);
        }
        if let Some(model) = lookup(ENV_OLLAMA_MODEL) {
            config.ollama.model = model;
        }
        if let Some(model) = lookup(ENV_OLLAMA_VISION_MODEL) {
            config.ollama.vision_model = model;
        }
        if let Some(host) = lookup(ENV_HOST) {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, ENV_PORT)? {
            config.port = port;
        }
        if let Some(secs) = parse_var(&lookup, ENV_TEXT_TIMEOUT)? {
            config.ollama.text_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, ENV_VISION_TIMEOUT)? {
            config.ollama.vision_timeout_secs = secs;
        }
        if let Some(retries) = parse_var(&lookup, ENV_MAX_RETRIES)? {
            config.ollama.max_retries = retries;
        }
        if let Some(delay) = parse_var(&lookup, ENV_STAGE_DELAY)? {
            config.pipeline.stage_delay_ms = delay;
        }

        Ok(config)
    }

    /// Resolve the listen address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                GatewayError::InvalidConfig(format!("{}:{}: {}", self.host, self.port, e))
            })?
            .next()
            .ok_or_else(|| {
                GatewayError::InvalidConfig(format!(
                    "{}:{} resolves to nothing",
                    self.host, self.port
                ))
            })
    }

    pub fn stage_delay(&self) -> Duration {
        Duration::from_millis(self.pipeline.stage_delay_ms)
    }

    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| GatewayError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
    }
}

/// Inference backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    /// Server root
    pub url: String,

    /// Text model
    pub model: String,

    /// Model used for image prompts
    pub vision_model: String,

    pub text_timeout_secs: u64,
    pub vision_timeout_secs: u64,
    pub health_timeout_secs: u64,

    /// Retries after the first attempt
    pub max_retries: u32,

    /// Base backoff delay
    pub backoff_ms: u64,

    pub num_ctx: Option<u32>,
    pub num_batch: Option<u32>,
    pub num_gpu: Option<u32>,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        let transport = OllamaConfig::default();
        Self {
            url: transport.base_url,
            model: transport.text_model,
            vision_model: transport.vision_model,
            text_timeout_secs: transport.text_timeout.as_secs(),
            vision_timeout_secs: transport.vision_timeout.as_secs(),
            health_timeout_secs: transport.health_timeout.as_secs(),
            max_retries: transport.max_retries,
            backoff_ms: transport.backoff_factor.as_millis() as u64,
            num_ctx: None,
            num_batch: None,
            num_gpu: None,
        }
    }
}

impl OllamaSettings {
    /// Settings in the form the transport takes
    pub fn to_transport_config(&self) -> OllamaConfig {
        let mut config = OllamaConfig::new(&self.url)
            .with_text_model(&self.model)
            .with_vision_model(&self.vision_model)
            .with_timeouts(
                Duration::from_secs(self.text_timeout_secs),
                Duration::from_secs(self.vision_timeout_secs),
            )
            .with_retries(self.max_retries, Duration::from_millis(self.backoff_ms));
        config.health_timeout = Duration::from_secs(self.health_timeout_secs);
        config.runtime = RuntimeOptions {
            num_ctx: self.num_ctx,
            num_batch: self.num_batch,
            num_gpu: self.num_gpu,
        };
        config
    }
}

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Pause between stages
    pub stage_delay_ms: u64,

    /// Outgoing event queue per connection
    pub event_buffer: usize,

    /// Salvage fields from output with no parsable JSON
    pub partial_recovery: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_delay_ms: 0,
            event_buffer: 64,
            partial_recovery: true,
        }
    }
}

/// Session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Analysis runs remembered per connection
    pub history_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { history_limit: 20 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.ollama.url, "http://localhost:11434");
        assert_eq!(config.ollama.model, "gemma3:4b");
        assert_eq!(config.stage_delay(), Duration::ZERO);
    }

    #[test]
    fn test_config_builder() {
        let config = GatewayConfig::new()
            .with_host("0.0.0.0")
            .with_port(8080)
            .with_max_connections(50)
            .with_ollama_url("http://gpu-box:11434/")
            .with_stage_delay(Duration::from_secs(2));

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.ollama.url, "http://gpu-box:11434");
        assert_eq!(config.pipeline.stage_delay_ms, 2000);
    }

    #[test]
    fn test_from_lookup() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("OLLAMA_URL", "http://ollama:11434"),
            ("OLLAMA_MODEL", "llama3.2"),
            ("AGROTECH_PORT", "9000"),
            ("AGROTECH_TEXT_TIMEOUT_SECS", "30"),
            ("AGROTECH_MAX_RETRIES", "1"),
            ("AGROTECH_STAGE_DELAY_MS", "2000"),
        ]))
        .unwrap();

        assert_eq!(config.ollama.url, "http://ollama:11434");
        assert_eq!(config.ollama.model, "llama3.2");
        assert_eq!(config.port, 9000);
        assert_eq!(config.ollama.text_timeout_secs, 30);
        assert_eq!(config.ollama.vision_timeout_secs, 180);
        assert_eq!(config.ollama.max_retries, 1);
        assert_eq!(config.stage_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let err = GatewayConfig::from_lookup(lookup(&[("AGROTECH_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidConfig(msg) if msg.contains("AGROTECH_PORT")));
    }

    #[test]
    fn test_transport_config() {
        let mut settings = OllamaSettings::default();
        settings.backoff_ms = 250;
        settings.num_gpu = Some(1);

        let transport = settings.to_transport_config();
        assert_eq!(transport.backoff_factor, Duration::from_millis(250));
        assert_eq!(transport.runtime.num_gpu, Some(1));
        assert_eq!(transport.vision_model, "qwen2.5vl:3b");
    }

    #[test]
    fn test_socket_addr() {
        let config = GatewayConfig::new().with_host("127.0.0.1").with_port(8000);
        assert_eq!(config.socket_addr().unwrap().port(), 8000);

        let bad = GatewayConfig::new().with_host("not a host");
        assert!(bad.socket_addr().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = GatewayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);

        // Sections may be omitted
        let partial: GatewayConfig = serde_json::from_str(
            r#"{"host": "0.0.0.0", "port": 8000, "max_connections": 10,
                "ollama": {"model": "phi3"}, "pipeline": {}, "session": {}}"#,
        )
        .unwrap();
        assert_eq!(partial.ollama.model, "phi3");
        assert_eq!(partial.ollama.max_retries, 3);
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("agrotech-{}.json", uuid::Uuid::new_v4()));
        let config = GatewayConfig::new().with_port(8123);
        config.to_file(&path).unwrap();

        let loaded = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(loaded.port, 8123);
        std::fs::remove_file(path).unwrap();
    }
}
