//! JSON repair engine
//!
//! Completes a truncated or slightly malformed JSON fragment into a
//! syntactically valid one. The dominant failure mode of local models is
//! hitting the output-token cap, which cuts the text mid-string, mid-key or
//! mid-object; a single left-to-right scan with a closer stack handles all
//! three deterministically.

use serde_json::Value;

use crate::error::{RepairError, Result};

/// Repair `fragment` and parse it
///
/// Valid input is returned unchanged. Anything before the first `{`/`[` is
/// ignored, as is anything after the top-level structure closes.
pub fn repair(fragment: &str) -> Result<Value> {
    let trimmed = fragment.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let repaired = complete_structure(trimmed).ok_or(RepairError::NoStructure)?;
    tracing::debug!("Repaired JSON fragment: {}", repaired);

    serde_json::from_str(&repaired).map_err(|e| RepairError::StillInvalid {
        repaired,
        reason: e.to_string(),
    })
}

/// Rebuild a balanced structure from `text` without parsing it
///
/// Returns `None` when `text` has no opening delimiter.
pub fn complete_structure(text: &str) -> Option<String> {
    let start = text.find(&['{', '['][..])?;
    let mut scanner = Scanner::default();

    for ch in text[start..].chars() {
        if scanner.push(ch) {
            break;
        }
    }

    Some(scanner.finish())
}

#[derive(Default)]
struct Scanner {
    out: String,

    /// Expected closers, innermost last
    stack: Vec<char>,

    in_string: bool,
    escaped: bool,

    /// Byte offset in `out` of the opening quote of the latest string
    string_start: usize,
}

impl Scanner {
    /// Feed one character; returns `true` once the top-level structure closed
    fn push(&mut self, ch: char) -> bool {
        if self.in_string {
            self.out.push(ch);
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == '"' {
                self.in_string = false;
            }
            return false;
        }

        match ch {
            '"' => {
                self.string_start = self.out.len();
                self.in_string = true;
                self.escaped = false;
                self.out.push(ch);
            }
            '{' => {
                self.stack.push('}');
                self.out.push(ch);
            }
            '[' => {
                self.stack.push(']');
                self.out.push(ch);
            }
            '}' | ']' => {
                // Closers with no matching opener are dropped; a closer that
                // matches a deeper opener also closes everything above it.
                if !self.stack.contains(&ch) {
                    return false;
                }
                while let Some(expected) = self.stack.last().copied() {
                    self.settle_dangling();
                    self.stack.pop();
                    self.out.push(expected);
                    if expected == ch {
                        break;
                    }
                }
                return self.stack.is_empty();
            }
            _ => self.out.push(ch),
        }

        false
    }

    fn finish(mut self) -> String {
        if self.in_string {
            self.close_string();
        }

        while let Some(closer) = self.stack.last().copied() {
            self.settle_dangling();
            self.stack.pop();
            self.out.push(closer);
        }

        self.out
    }

    /// Close a string cut off by truncation
    fn close_string(&mut self) {
        strip_partial_escape(&mut self.out);

        let before = self.out[..self.string_start].trim_end();
        let is_value = before.ends_with(':') || self.stack.last() == Some(&']');

        self.out.push('"');
        if !is_value {
            self.out.push_str(": null");
        }
        self.in_string = false;
    }

    /// Make the tail of `out` legal right before a closer
    fn settle_dangling(&mut self) {
        let len = self.out.trim_end().len();
        self.out.truncate(len);

        if self.out.ends_with(':') {
            self.out.push_str(" null");
        } else if self.out.ends_with(',') {
            self.out.pop();
            self.settle_dangling();
        } else if self.out.ends_with('"') {
            if self.stack.last() == Some(&'}') && self.last_string_is_key() {
                self.out.push_str(": null");
            }
        } else {
            complete_literal(&mut self.out);
        }
    }

    /// A string directly after `{` or `,` inside an object is a key
    fn last_string_is_key(&self) -> bool {
        let before = self.out[..self.string_start].trim_end();
        before.ends_with('{') || before.ends_with(',')
    }
}

/// Drop a trailing escape sequence cut off mid-way (`\` or `\u12`)
fn strip_partial_escape(out: &mut String) {
    let Some(pos) = out.rfind('\\') else {
        return;
    };

    let tail = &out[pos + 1..];
    let partial = tail.is_empty()
        || (tail.starts_with('u')
            && tail.len() < 5
            && tail[1..].chars().all(|c| c.is_ascii_hexdigit()));
    let run = out[..=pos].chars().rev().take_while(|&c| c == '\\').count();

    if partial && run % 2 == 1 {
        out.truncate(pos);
    }
}

/// Complete a bare literal cut off mid-token (`tru`, `nul`, `12.`, `-`)
fn complete_literal(out: &mut String) {
    let token_len = out
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
        .count();
    if token_len == 0 {
        return;
    }

    let token_start = out.len() - token_len;
    let in_value_position = out[..token_start]
        .trim_end()
        .ends_with(&[':', ',', '['][..]);
    if !in_value_position {
        return;
    }

    let token = out[token_start..].to_string();
    let completed = if token.starts_with(|c: char| c.is_ascii_alphabetic()) {
        ["true", "false", "null"]
            .into_iter()
            .find(|literal| literal.starts_with(token.as_str()))
            .unwrap_or("null")
            .to_string()
    } else {
        let number = token.trim_end_matches(&['.', 'e', 'E', '+', '-'][..]);
        if number.is_empty() {
            "null".to_string()
        } else {
            number.to_string()
        }
    };

    out.truncate(token_start);
    out.push_str(&completed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_input_is_noop() {
        let text = r#"{"crop_health": "healthy", "alerts": [], "confidence": 0.85}"#;
        assert_eq!(
            repair(text).unwrap(),
            serde_json::from_str::<Value>(text).unwrap()
        );
    }

    #[test]
    fn test_truncated_mid_value() {
        let value = repair(r#"{"crop_health": "healthy", "leaf_condition": "go"#).unwrap();
        assert_eq!(value, json!({"crop_health": "healthy", "leaf_condition": "go"}));
    }

    #[test]
    fn test_truncated_mid_key() {
        let value = repair(r#"{"crop_health": "healthy", "leaf_cond"#).unwrap();
        assert_eq!(value, json!({"crop_health": "healthy", "leaf_cond": null}));
    }

    #[test]
    fn test_truncated_after_separator() {
        let value = repair(r#"{"soil_moisture": 45, "ph_level":"#).unwrap();
        assert_eq!(value, json!({"soil_moisture": 45, "ph_level": null}));
    }

    #[test]
    fn test_truncated_after_complete_key() {
        let value = repair(r#"{"soil_moisture": 45, "ph_level""#).unwrap();
        assert_eq!(value, json!({"soil_moisture": 45, "ph_level": null}));
    }

    #[test]
    fn test_truncated_nested() {
        let text = concat!(
            r#"{"overall_status": "good", "#,
            r#""priority_actions": ["regar por 10 minutos", "aplicar fung"#,
        );
        let value = repair(text).unwrap();
        assert_eq!(
            value,
            json!({
                "overall_status": "good",
                "priority_actions": ["regar por 10 minutos", "aplicar fung"]
            })
        );
    }

    #[test]
    fn test_trailing_commas() {
        let value = repair(r#"{"alerts": ["a", "b",], "confidence": 0.5,}"#).unwrap();
        assert_eq!(value, json!({"alerts": ["a", "b"], "confidence": 0.5}));

        let value = repair(r#"{"alerts": ["a",  "#).unwrap();
        assert_eq!(value, json!({"alerts": ["a"]}));
    }

    #[test]
    fn test_partial_literals() {
        assert_eq!(
            repair(r#"{"pest_detected": fal"#).unwrap(),
            json!({"pest_detected": false})
        );
        assert_eq!(
            repair(r#"{"irrigation_needed": tr"#).unwrap(),
            json!({"irrigation_needed": true})
        );
        assert_eq!(repair(r#"{"ph_level": 6."#).unwrap(), json!({"ph_level": 6}));
        assert_eq!(repair(r#"{"temperature": -"#).unwrap(), json!({"temperature": null}));
    }

    #[test]
    fn test_dangling_escape() {
        assert_eq!(
            repair(r#"{"note": "dijo \"hola\" y \"#).unwrap(),
            json!({"note": "dijo \"hola\" y "})
        );
        assert_eq!(repair(r#"{"note": "caf\u00"#).unwrap(), json!({"note": "caf"}));
        assert_eq!(repair(r#"{"path": "a\\"#).unwrap(), json!({"path": "a\\"}));
    }

    #[test]
    fn test_mismatched_closer_closes_inner() {
        assert_eq!(
            repair(r#"{"alerts": ["a", "b"}"#).unwrap(),
            json!({"alerts": ["a", "b"]})
        );
    }

    #[test]
    fn test_ignores_trailing_prose() {
        assert_eq!(
            repair(r#"{"a": 1,} Espero que esto ayude."#).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_no_structure() {
        assert_eq!(repair("sin json"), Err(RepairError::NoStructure));
    }

    #[test]
    fn test_unrepairable() {
        assert!(matches!(
            repair("{'crop_health': 'healthy'}"),
            Err(RepairError::StillInvalid { .. })
        ));
    }
}
