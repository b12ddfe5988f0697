//! Partial-field reconstructor
//!
//! Last resort for model output no strategy could parse. Known fields are
//! pulled out of the raw text with per-field patterns; anything not found gets
//! a placeholder, so the result always has the same shape.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::types::{Mapping, CONFIDENCE_KEY, PARSING_STATUS_KEY, PARTIAL_RECOVERY};

/// Confidence used when the text carries no usable confidence value
pub const DEFAULT_PARTIAL_CONFIDENCE: f64 = 0.3;

/// Placeholder for list fields with no recoverable items
pub const DEFAULT_LIST_ITEMS: [&str; 2] = ["análisis visual", "condiciones ambientales"];

/// How a field's value is located in the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// First quoted value after the key
    Text,
    /// Quoted items of the following `[...]`, up to the first unquoted `]`
    List,
    /// Number or boolean literal, or a quoted value
    Scalar,
    /// First numeric literal, clamped into [0, 1]
    Confidence,
}

/// A field the reconstructor looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

/// Union of the output schemas of every built-in agent role
pub const EXPECTED_FIELDS: &[FieldSpec] = &[
    // Image description
    field("image_description", FieldKind::Text),
    field("soil_visual_indicators", FieldKind::List),
    field("environmental_context", FieldKind::Text),
    field("plant_health_indicators", FieldKind::List),
    field("recommended_focus_areas", FieldKind::List),
    // Vision assessment
    field("crop_health", FieldKind::Text),
    field("pest_detected", FieldKind::Scalar),
    field("leaf_condition", FieldKind::Text),
    field("disease_probability", FieldKind::Scalar),
    field("visual_symptoms", FieldKind::List),
    field("recommendations", FieldKind::List),
    // Environment assessment
    field("soil_moisture", FieldKind::Scalar),
    field("ph_level", FieldKind::Scalar),
    field("temperature", FieldKind::Scalar),
    field("humidity", FieldKind::Scalar),
    field("irrigation_needed", FieldKind::Scalar),
    field("fertilizer_status", FieldKind::Text),
    field("environmental_stress", FieldKind::Text),
    field("alerts", FieldKind::List),
    // Decision fusion
    field("overall_status", FieldKind::Text),
    field("priority_actions", FieldKind::List),
    field("estimated_yield", FieldKind::Text),
    field("risk_assessment", FieldKind::Text),
    field("next_inspection_hours", FieldKind::Scalar),
    field("economic_impact", FieldKind::Text),
    field("urgent_alerts", FieldKind::List),
    field(CONFIDENCE_KEY, FieldKind::Confidence),
];

lazy_static! {
    static ref DEFAULT_RECONSTRUCTOR: PartialReconstructor =
        PartialReconstructor::new(EXPECTED_FIELDS);
}

struct CompiledField {
    spec: FieldSpec,
    quoted: Regex,
    list: Regex,
    literal: Regex,
}

impl CompiledField {
    fn compile(spec: FieldSpec) -> Self {
        let key = format!(r#""{}"\s*:\s*"#, regex::escape(spec.name));
        Self {
            spec,
            quoted: Regex::new(&format!(r#"{}"((?:[^"\\]|\\.)*)""#, key)).unwrap(),
            list: Regex::new(&format!(r#"{}\["#, key)).unwrap(),
            literal: Regex::new(&format!(
                r#"{}"?(-?[0-9][0-9.eE+-]*|true|false)"#,
                key
            ))
            .unwrap(),
        }
    }

    /// Extracted value, or `None` when a placeholder is needed
    fn extract(&self, text: &str) -> Option<Value> {
        match self.spec.kind {
            FieldKind::Text => self.quoted_value(text).map(Value::String),
            FieldKind::List => {
                let items: Vec<Value> = self
                    .list
                    .find(text)
                    .map(|m| list_items(&text[m.end()..]))
                    .unwrap_or_default()
                    .into_iter()
                    .map(Value::String)
                    .collect();
                (!items.is_empty()).then_some(Value::Array(items))
            }
            FieldKind::Scalar => self
                .literal
                .captures(text)
                .and_then(|cap| serde_json::from_str::<Value>(&cap[1]).ok())
                .or_else(|| self.quoted_value(text).map(Value::String)),
            FieldKind::Confidence => self
                .literal
                .captures(text)
                .and_then(|cap| cap[1].parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .map(|v| Value::from(v.clamp(0.0, 1.0))),
        }
    }

    fn quoted_value(&self, text: &str) -> Option<String> {
        self.quoted.captures(text).map(|cap| unescape(&cap[1]))
    }

    fn placeholder(&self) -> Value {
        match self.spec.kind {
            FieldKind::List => Value::Array(
                DEFAULT_LIST_ITEMS
                    .iter()
                    .map(|item| Value::String(item.to_string()))
                    .collect(),
            ),
            FieldKind::Confidence => Value::from(DEFAULT_PARTIAL_CONFIDENCE),
            FieldKind::Text | FieldKind::Scalar => {
                Value::String(format!("Información parcial - {}", self.spec.name))
            }
        }
    }
}

/// Quoted items of a list body, stopping at the first `]` outside a string
///
/// An item cut off before its closing quote is dropped. Unquoted items are
/// skipped.
fn list_items(body: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut chars = body.char_indices();

    while let Some((start, ch)) = chars.next() {
        match ch {
            ']' => break,
            '"' => {
                let mut escaped = false;
                let mut end = None;
                for (offset, c) in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        end = Some(offset);
                        break;
                    }
                }
                match end {
                    Some(end) => items.push(unescape(&body[start + 1..end])),
                    None => break,
                }
            }
            _ => {}
        }
    }

    items
}

/// Decode JSON string escapes, keeping the raw text if they are malformed
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

/// Pattern-based extractor for a fixed set of fields
pub struct PartialReconstructor {
    fields: Vec<CompiledField>,
}

impl PartialReconstructor {
    pub fn new(fields: &[FieldSpec]) -> Self {
        Self {
            fields: fields.iter().copied().map(CompiledField::compile).collect(),
        }
    }

    /// Names of the fields this reconstructor produces
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.spec.name)
    }

    /// Build a mapping from `text`; never fails
    ///
    /// Returns the mapping and the fields that received placeholders.
    pub fn reconstruct(&self, text: &str) -> (Mapping, Vec<String>) {
        let mut mapping = Mapping::new();
        let mut marked = Vec::new();

        for field in &self.fields {
            let value = match field.extract(text) {
                Some(value) => value,
                None => {
                    marked.push(field.spec.name.to_string());
                    field.placeholder()
                }
            };
            mapping.insert(field.spec.name.to_string(), value);
        }

        mapping.insert(
            PARSING_STATUS_KEY.to_string(),
            Value::String(PARTIAL_RECOVERY.to_string()),
        );

        tracing::info!(
            "Partial response created with {} fields ({} placeholders)",
            mapping.len(),
            marked.len()
        );

        (mapping, marked)
    }
}

impl Default for PartialReconstructor {
    fn default() -> Self {
        Self::new(EXPECTED_FIELDS)
    }
}

/// Reconstruct with the built-in field set
pub fn reconstruct(text: &str) -> (Mapping, Vec<String>) {
    DEFAULT_RECONSTRUCTOR.reconstruct(text)
}
