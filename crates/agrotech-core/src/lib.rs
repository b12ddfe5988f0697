//! AgroTech Core - structured data out of free-text LLM output
//!
//! This crate holds everything in the agent panel that does not touch the
//! network:
//!
//! 1. **Types** (`types`): prompt requests, raw model output, parse outcomes
//!    and agent results
//! 2. **Protocol** (`protocol`): the JSON messages exchanged with clients over
//!    the WebSocket channel
//! 3. **Parser** (`parser`): the response parser cascade, the JSON repair
//!    engine and the partial-field reconstructor
//!
//! # Quick Start
//!
//! ```
//! use agrotech_core::parser::ResponseParser;
//! use agrotech_core::types::ParseOutcome;
//!
//! let parser = ResponseParser::default();
//! let outcome = parser.parse("Claro, aquí está: {\"crop_health\": \"healthy\", \"confidence\": 0.8");
//!
//! match outcome {
//!     ParseOutcome::Structured(mapping) => assert_eq!(mapping["crop_health"], "healthy"),
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! ```

pub mod error;
pub mod parser;
pub mod protocol;
pub mod types;

pub use error::{RepairError, Result};
pub use parser::{ParserConfig, ResponseParser};
pub use protocol::{InboundMessage, OutboundEvent, ProtocolError};
pub use types::{
    AgentResult, GenerationOptions, Mapping, ParseOutcome, PromptRequest, Provenance,
    RawModelOutput,
};

/// Core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
