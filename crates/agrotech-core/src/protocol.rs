//! Channel protocol
//!
//! JSON messages exchanged with clients over the persistent WebSocket
//! connection. Inbound messages are validated by hand rather than with a
//! derived `Deserialize` so that every malformed request maps to a precise,
//! user-facing error event while the channel stays open.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::AgentResult;

/// Inbound `type` for a text-described scenario
pub const CUSTOM_SCENARIO: &str = "custom_scenario";

/// Inbound `type` for a scenario carrying an image
pub const IMAGE_SCENARIO: &str = "image_scenario";

/// A validated client request
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Assess a scenario described in text
    CustomScenario {
        image_description: String,
        environment_description: String,
    },

    /// Describe an image with the vision model, then assess it
    ImageScenario {
        image_base64: String,
        environment_description: String,
    },
}

/// Why an inbound message was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Mensaje JSON inválido: {0}")]
    InvalidJson(String),

    #[error("Tipo de mensaje no reconocido: {0}")]
    UnknownType(String),

    #[error("Se requieren los campos {}", .0.join(" y "))]
    MissingFields(Vec<&'static str>),
}

impl InboundMessage {
    /// Parse and validate raw text received on the channel
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let message_type = value.get("type").and_then(Value::as_str).unwrap_or("");

        match message_type {
            CUSTOM_SCENARIO => {
                let (image_description, environment_description) =
                    required_pair(value, "image_description", "environment_description")?;
                Ok(InboundMessage::CustomScenario {
                    image_description,
                    environment_description,
                })
            }
            IMAGE_SCENARIO => {
                let (image_base64, environment_description) =
                    required_pair(value, "image_base64", "environment_description")?;
                Ok(InboundMessage::ImageScenario {
                    image_base64,
                    environment_description,
                })
            }
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }

    /// Display name announced in the `scenario` event
    pub fn scenario_name(&self) -> &'static str {
        match self {
            InboundMessage::CustomScenario { .. } => "🔍 Escenario Personalizado",
            InboundMessage::ImageScenario { .. } => "📷 Análisis de Imagen",
        }
    }
}

/// Both fields are reported whenever either one is missing or empty
fn required_pair(
    value: &Value,
    first: &'static str,
    second: &'static str,
) -> Result<(String, String), ProtocolError> {
    let read = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match (read(first), read(second)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ProtocolError::MissingFields(vec![first, second])),
    }
}

/// Event sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Progress narration
    Status { message: String },

    /// Scenario acknowledgement
    Scenario { data: ScenarioInfo },

    /// One completed pipeline stage
    AgentResult { agent: String, data: AgentResult },

    /// Fatal or per-request error
    Error { message: String },
}

/// Payload of the `scenario` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub description: String,
}

impl OutboundEvent {
    pub fn status(message: impl Into<String>) -> Self {
        OutboundEvent::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            message: message.into(),
        }
    }

    pub fn scenario(name: impl Into<String>) -> Self {
        let name = name.into();
        OutboundEvent::Scenario {
            data: ScenarioInfo {
                description: format!("Analizando: {}", name),
                name,
            },
        }
    }

    pub fn agent_result(result: AgentResult) -> Self {
        OutboundEvent::AgentResult {
            agent: result.role.clone(),
            data: result,
        }
    }

    /// Wire `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Status { .. } => "status",
            OutboundEvent::Scenario { .. } => "scenario",
            OutboundEvent::AgentResult { .. } => "agent_result",
            OutboundEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is a plain struct of strings and JSON maps.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"serialization failed: {}"}}"#, e)
        })
    }
}

impl From<ProtocolError> for OutboundEvent {
    fn from(error: ProtocolError) -> Self {
        OutboundEvent::error(error.to_string())
    }
}
