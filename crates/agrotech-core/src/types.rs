//! Shared data model for prompts, model output and agent results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// String-keyed, JSON-valued record produced by the parser and the agents
pub type Mapping = serde_json::Map<String, Value>;

/// Key every agent mapping carries
pub const CONFIDENCE_KEY: &str = "confidence";

/// Marker key added to reconstructed mappings
pub const PARSING_STATUS_KEY: &str = "parsing_status";

/// Value of [`PARSING_STATUS_KEY`] for reconstructed mappings
pub const PARTIAL_RECOVERY: &str = "partial_recovery";

/// Wire key carrying [`Provenance`]; never stored in a mapping
pub const PROVENANCE_KEY: &str = "provenance";

/// Sampling options forwarded to the inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f64,

    /// Nucleus sampling
    pub top_p: f64,

    /// Maximum output tokens
    pub num_predict: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_batch: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_gpu: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            num_predict: 300,
            num_ctx: None,
            num_batch: None,
            num_gpu: None,
        }
    }
}

impl GenerationOptions {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_num_predict(mut self, num_predict: u32) -> Self {
        self.num_predict = num_predict;
        self
    }

    pub fn with_num_ctx(mut self, num_ctx: u32) -> Self {
        self.num_ctx = Some(num_ctx);
        self
    }
}

/// A single rendered prompt, built per call and never mutated
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    /// Role issuing the request (used for logging)
    pub role: String,

    /// Expertise label of the role
    pub expertise: String,

    /// Rendered prompt text
    pub prompt: String,

    pub options: GenerationOptions,

    /// Base64-encoded image attached to the prompt
    pub image_base64: Option<String>,
}

impl PromptRequest {
    pub fn new(
        role: impl Into<String>,
        expertise: impl Into<String>,
        prompt: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            role: role.into(),
            expertise: expertise.into(),
            prompt: prompt.into(),
            options,
            image_base64: None,
        }
    }

    pub fn with_image(mut self, image_base64: impl Into<String>) -> Self {
        self.image_base64 = Some(image_base64.into());
        self
    }

    pub fn has_image(&self) -> bool {
        self.image_base64.is_some()
    }
}

/// Text returned by the backend plus transport metadata
#[derive(Debug, Clone, PartialEq)]
pub struct RawModelOutput {
    pub text: String,

    /// HTTP status code of the final attempt
    pub status: u16,

    pub elapsed: Duration,

    /// Model that produced the text
    pub model: String,
}

/// Result of running the parser cascade over raw model text
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// The text (or a span of it) parsed, possibly after repair
    Structured(Mapping),

    /// Field values were pulled out of otherwise unparsable text
    PartialRecovery {
        mapping: Mapping,
        /// Fields that received placeholder values
        marked_fields: Vec<String>,
    },

    /// No strategy produced a mapping
    Failed(String),
}

impl ParseOutcome {
    pub fn is_structured(&self) -> bool {
        matches!(self, ParseOutcome::Structured(_))
    }

    /// Borrow the mapping, if any
    pub fn mapping(&self) -> Option<&Mapping> {
        match self {
            ParseOutcome::Structured(mapping) => Some(mapping),
            ParseOutcome::PartialRecovery { mapping, .. } => Some(mapping),
            ParseOutcome::Failed(_) => None,
        }
    }
}

/// Where an agent result's data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Parsed from model output
    Model,
    /// Reconstructed from unparsable model output
    Partial,
    /// Static role fallback
    Fallback,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Model => write!(f, "model"),
            Provenance::Partial => write!(f, "partial"),
            Provenance::Fallback => write!(f, "fallback"),
        }
    }
}

/// Output of one agent role
///
/// The wire form is the mapping with an extra `provenance` key; the role is
/// carried by the enclosing event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    #[serde(skip)]
    pub role: String,

    #[serde(flatten)]
    pub mapping: Mapping,

    pub provenance: Provenance,
}

impl AgentResult {
    /// Build a result, forcing `confidence` into [0, 1]
    ///
    /// A `provenance` key in the mapping is dropped in favour of `provenance`.
    pub fn new(role: impl Into<String>, mut mapping: Mapping, provenance: Provenance) -> Self {
        mapping.remove(PROVENANCE_KEY);
        normalize_confidence(&mut mapping, 0.0);
        Self {
            role: role.into(),
            mapping,
            provenance,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.mapping
            .get(CONFIDENCE_KEY)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.mapping.get(key)
    }
}

/// Ensure `mapping["confidence"]` is a number in [0, 1]
///
/// Numeric strings are accepted; anything else is replaced by `default`.
pub fn normalize_confidence(mapping: &mut Mapping, default: f64) {
    let value = match mapping.get(CONFIDENCE_KEY) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
    .unwrap_or(default)
    .clamp(0.0, 1.0);

    mapping.insert(CONFIDENCE_KEY.to_string(), Value::from(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(value: Value) -> Mapping {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_agent_result_clamps_confidence() {
        let result = AgentResult::new(
            "AgriVision",
            mapping(json!({"confidence": 1.7})),
            Provenance::Model,
        );
        assert_eq!(result.confidence(), 1.0);

        let result = AgentResult::new(
            "AgriVision",
            mapping(json!({"confidence": -2})),
            Provenance::Model,
        );
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn test_agent_result_inserts_missing_confidence() {
        let result = AgentResult::new(
            "SoilSense",
            mapping(json!({"ph_level": 6.5})),
            Provenance::Model,
        );
        assert_eq!(result.get(CONFIDENCE_KEY), Some(&json!(0.0)));
    }

    #[test]
    fn test_numeric_string_confidence() {
        let mut m = mapping(json!({"confidence": " 0.42 "}));
        normalize_confidence(&mut m, 0.0);
        assert_eq!(m[CONFIDENCE_KEY], json!(0.42));
    }

    #[test]
    fn test_agent_result_wire_form() {
        let result = AgentResult::new(
            "CropMaster",
            mapping(json!({"overall_status": "good", "confidence": 0.9})),
            Provenance::Partial,
        );
        let wire = serde_json::to_value(&result).unwrap();

        assert_eq!(wire["overall_status"], "good");
        assert_eq!(wire["confidence"], 0.9);
        assert_eq!(wire["provenance"], "partial");
        assert!(wire.get("role").is_none());
    }

    #[test]
    fn test_model_provenance_key_is_overridden() {
        let result = AgentResult::new(
            "AgriVision",
            mapping(json!({"crop_health": "healthy", "provenance": "model-claimed"})),
            Provenance::Fallback,
        );
        assert!(result.get(PROVENANCE_KEY).is_none());

        let text = serde_json::to_string(&result).unwrap();
        assert_eq!(text.matches("\"provenance\"").count(), 1);

        let back: AgentResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back.provenance, Provenance::Fallback);
        assert_eq!(back.mapping, result.mapping);
    }

    #[test]
    fn test_generation_options_skip_unset() {
        let wire = serde_json::to_value(GenerationOptions::default()).unwrap();
        assert_eq!(wire["num_predict"], 300);
        assert!(wire.get("num_ctx").is_none());

        let wire = serde_json::to_value(GenerationOptions::default().with_num_ctx(4096)).unwrap();
        assert_eq!(wire["num_ctx"], 4096);
    }
}
