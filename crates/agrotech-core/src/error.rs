//! Error types for AgroTech Core
//!
//! Parsing never surfaces an error to callers of [`crate::ResponseParser`];
//! these types describe the internal failure of a single recovery strategy.

use thiserror::Error;

/// Result type alias for repair operations
pub type Result<T> = std::result::Result<T, RepairError>;

/// Failure of the JSON repair engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepairError {
    /// The fragment contained no opening delimiter to work from
    #[error("No JSON structure found in fragment")]
    NoStructure,

    /// The reconstructed text still failed to parse
    #[error("Repaired text is still invalid JSON: {reason}")]
    StillInvalid { repaired: String, reason: String },
}
