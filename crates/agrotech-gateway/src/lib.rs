//! AgroTech Gateway - Real-Time Crop Assessment over WebSocket
//!
//! Accepts scenario requests from browser clients and streams each agent's
//! assessment back as soon as it is available.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    AgroTech Gateway                     │
//! ├─────────────────────────────────────────────────────────┤
//! │   GET /   GET /health   GET /status        WS /ws       │
//! │                                              │          │
//! │                                   ┌──────────▼───────┐  │
//! │                                   │  Session Manager │  │
//! │                                   │  (one per conn.) │  │
//! │                                   └──────────┬───────┘  │
//! │                                   ┌──────────▼───────┐  │
//! │                                   │    AgentPanel    │  │
//! │                                   │  (pipelines)     │  │
//! │                                   └──────────┬───────┘  │
//! │                                   ┌──────────▼───────┐  │
//! │                                   │  OllamaClient    │  │
//! │                                   │  (shared pool)   │  │
//! │                                   └──────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Streaming progress**: `scenario`, `status`, `agent_result` events
//! - **FIFO per connection**: one analysis at a time, in arrival order
//! - **Backend probe**: connections are refused early when Ollama is down

pub mod config;
pub mod error;
pub mod gateway;
pub mod session;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayClient, GatewayState, WebSocketConnection};
pub use session::{Session, SessionId, SessionInfo, SessionManager, SessionState};

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default HTTP/WebSocket port
pub const DEFAULT_PORT: u16 = 8000;

/// Default host
pub const DEFAULT_HOST: &str = "0.0.0.0";
