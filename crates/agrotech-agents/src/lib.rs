//! AgroTech Agents - Crop Assessment Panel
//!
//! Specialized agent roles backed by a local Ollama server, chained into a
//! sequential assessment pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       AgentPanel                          │
//! │   InboundMessage ──► Pipeline + PipelineSession           │
//! ├───────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌────────────┐  ┌───────────┐  ┌─────┐ │
//! │  │ ImageAnalyst │─►│ AgriVision │─►│ SoilSense │─►│Crop │ │
//! │  │ (image only) │  │            │  │           │  │Mast.│ │
//! │  └──────┬───────┘  └─────┬──────┘  └─────┬─────┘  └──┬──┘ │
//! │         └────────────────┴───────┬───────┴───────────┘    │
//! │                       ┌──────────▼──────────┐             │
//! │                       │  LlmTransport       │             │
//! │                       │  (OllamaClient)     │             │
//! │                       └─────────────────────┘             │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Data-driven roles**: one [`AgentRole`] runs every [`RoleSpec`]
//! - **Never-empty results**: timeouts and garbage output degrade to the
//!   role's fallback schema
//! - **Shared pool**: one HTTP client for all sessions, swapped after
//!   connection trouble

pub mod agent;
pub mod pipeline;
pub mod roles;
pub mod testing;
pub mod transport;

pub use agent::{AgentError, AgentRole, PromptContext};
pub use pipeline::{
    AgentPanel, Pipeline, PipelineError, PipelineSession, PipelineState, COMPLETION_MESSAGE,
};
pub use roles::RoleSpec;
pub use transport::{LlmTransport, OllamaClient, OllamaConfig, TransportError, TransportStats};
