//! Response parser
//!
//! Turns raw model text into a [`ParseOutcome`] through a cascade of
//! strategies, each tried only when the previous one failed:
//!
//! 1. direct parse of the trimmed text
//! 2. parse of the first bracketed span ([`extract`])
//! 3. repair of that span ([`repair`])
//! 4. partial reconstruction of the raw text ([`reconstruct`])
//!
//! Strategies are ordered by cost and permissiveness, so well-formed output
//! never pays for recovery and malformed output still yields a mapping.

pub mod extract;
pub mod reconstruct;
pub mod repair;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Mapping, ParseOutcome};

pub use extract::{extract_json_span, Span};
pub use reconstruct::{FieldKind, FieldSpec, PartialReconstructor, EXPECTED_FIELDS};
pub use repair::repair;

/// Strategy that produced a parse outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    Direct,
    Extracted,
    Repaired,
    Partial,
    None,
}

/// Parser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Fall back to field reconstruction when nothing parses
    pub partial_recovery: bool,

    /// Characters of raw output included in debug logs
    pub log_preview_chars: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            partial_recovery: true,
            log_preview_chars: 200,
        }
    }
}

/// Resilient parser for model output
pub struct ResponseParser {
    config: ParserConfig,
    reconstructor: PartialReconstructor,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl ResponseParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            reconstructor: PartialReconstructor::default(),
        }
    }

    /// Use a custom field set for partial reconstruction
    pub fn with_reconstructor(mut self, reconstructor: PartialReconstructor) -> Self {
        self.reconstructor = reconstructor;
        self
    }

    /// Fail instead of reconstructing fields
    pub fn strict() -> Self {
        Self::new(ParserConfig {
            partial_recovery: false,
            ..ParserConfig::default()
        })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn parse(&self, raw: &str) -> ParseOutcome {
        self.parse_with_strategy(raw).0
    }

    /// Parse and report which strategy succeeded
    pub fn parse_with_strategy(&self, raw: &str) -> (ParseOutcome, ParseStrategy) {
        let trimmed = raw.trim();
        tracing::debug!(
            "Raw response ({} chars): {}",
            raw.len(),
            preview(trimmed, self.config.log_preview_chars)
        );

        if let Some(mapping) = parse_mapping(trimmed) {
            return (ParseOutcome::Structured(mapping), ParseStrategy::Direct);
        }

        if let Some(span) = extract_json_span(trimmed) {
            if let Some(mapping) = parse_mapping(span.text) {
                tracing::debug!("Extracted JSON span at offset {}", span.start);
                return (ParseOutcome::Structured(mapping), ParseStrategy::Extracted);
            }

            match repair(span.text) {
                Ok(value) => {
                    if let Some(mapping) = into_mapping(value) {
                        tracing::info!(
                            "Repaired {} JSON fragment",
                            if span.complete { "malformed" } else { "truncated" }
                        );
                        return (ParseOutcome::Structured(mapping), ParseStrategy::Repaired);
                    }
                    tracing::warn!("Repaired JSON is not an object");
                }
                Err(e) => tracing::warn!("JSON repair failed: {}", e),
            }
        } else {
            tracing::warn!("No JSON structure found in response");
        }

        if !self.config.partial_recovery {
            return (
                ParseOutcome::Failed("no parsable JSON object in model output".to_string()),
                ParseStrategy::None,
            );
        }

        let (mapping, marked_fields) = self.reconstructor.reconstruct(raw);
        (
            ParseOutcome::PartialRecovery {
                mapping,
                marked_fields,
            },
            ParseStrategy::Partial,
        )
    }
}

fn parse_mapping(text: &str) -> Option<Mapping> {
    serde_json::from_str::<Value>(text).ok().and_then(into_mapping)
}

/// Objects are used as-is; an array contributes its first element if that is an object
fn into_mapping(value: Value) -> Option<Mapping> {
    match value {
        Value::Object(mapping) => Some(mapping),
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(mapping)) => Some(mapping),
            _ => None,
        },
        _ => None,
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CONFIDENCE_KEY, PARSING_STATUS_KEY};
    use serde_json::json;

    fn structured(outcome: ParseOutcome) -> Mapping {
        match outcome {
            ParseOutcome::Structured(mapping) => mapping,
            other => panic!("expected structured outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_direct() {
        let parser = ResponseParser::default();
        let (outcome, strategy) =
            parser.parse_with_strategy("  {\"crop_health\": \"healthy\", \"confidence\": 0.85}\n");

        assert_eq!(strategy, ParseStrategy::Direct);
        assert_eq!(structured(outcome)["confidence"], json!(0.85));
    }

    #[test]
    fn test_extracted_from_prose() {
        let parser = ResponseParser::default();
        let raw = concat!(
            "Aquí tienes el análisis:\n",
            "```json\n{\"overall_status\": \"good\"}\n```\n",
            "Otro: {\"x\": 1}",
        );
        let (outcome, strategy) = parser.parse_with_strategy(raw);

        assert_eq!(strategy, ParseStrategy::Extracted);
        assert_eq!(
            Value::Object(structured(outcome)),
            json!({"overall_status": "good"})
        );
    }

    #[test]
    fn test_repaired_truncation() {
        let parser = ResponseParser::default();
        let raw = "JSON:\n{\"soil_moisture\": 45, \"alerts\": [\"humedad baja";
        let (outcome, strategy) = parser.parse_with_strategy(raw);

        assert_eq!(strategy, ParseStrategy::Repaired);
        assert_eq!(
            Value::Object(structured(outcome)),
            json!({"soil_moisture": 45, "alerts": ["humedad baja"]})
        );
    }

    #[test]
    fn test_array_wrapped_object() {
        let parser = ResponseParser::default();
        let mapping = structured(parser.parse(r#"[{"crop_health": "diseased"}]"#));
        assert_eq!(mapping["crop_health"], "diseased");
    }

    #[test]
    fn test_partial_recovery() {
        let parser = ResponseParser::default();
        let (outcome, strategy) =
            parser.parse_with_strategy("crop_health es \"healthy\" con confianza alta");

        assert_eq!(strategy, ParseStrategy::Partial);
        match outcome {
            ParseOutcome::PartialRecovery {
                mapping,
                marked_fields,
            } => {
                assert_eq!(mapping[PARSING_STATUS_KEY], "partial_recovery");
                assert_eq!(mapping[CONFIDENCE_KEY], json!(0.3));
                assert!(marked_fields.contains(&"crop_health".to_string()));
            }
            other => panic!("expected partial recovery, got {:?}", other),
        }
    }

    #[test]
    fn test_unrepairable_span_falls_through() {
        let parser = ResponseParser::default();
        let outcome = parser.parse(r#"{'crop_health': 'healthy', "confidence": 0.6}"#);

        match outcome {
            ParseOutcome::PartialRecovery { mapping, .. } => {
                assert_eq!(mapping[CONFIDENCE_KEY], json!(0.6));
            }
            other => panic!("expected partial recovery, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_mode_fails() {
        let parser = ResponseParser::strict();
        assert!(matches!(parser.parse("nada útil"), ParseOutcome::Failed(_)));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("añadir", 2), "añ");
        assert_eq!(preview("ok", 10), "ok");
    }
}
