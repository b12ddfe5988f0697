//! Property tests for the response parser and the JSON repair engine

use agrotech_core::parser::repair::complete_structure;
use agrotech_core::parser::{repair, ParseStrategy, ResponseParser};
use agrotech_core::types::{ParseOutcome, CONFIDENCE_KEY, PARSING_STATUS_KEY};
use proptest::prelude::*;
use proptest::sample::Index;
use serde_json::Value;

const KEY: &str = "[a-z_]{1,6}";
const TEXT: &str = "[a-zñá \"\\\\]{0,10}";

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-10_000i64..10_000).prop_map(Value::from),
        TEXT.prop_map(Value::from),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(KEY, inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn json_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(KEY, json_value(), 1..5)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

/// Compact object text with string values, plus for each entry the byte
/// offsets of its separator and of its value's quotes
#[derive(Debug)]
struct StringDocument {
    text: String,
    keys: Vec<String>,
    separators: Vec<usize>,
    values: Vec<(usize, usize)>,
}

fn string_document() -> impl Strategy<Value = StringDocument> {
    prop::collection::btree_map(KEY, TEXT, 1..6).prop_map(|entries| {
        let mut text = String::from("{");
        let mut keys = Vec::new();
        let mut separators = Vec::new();
        let mut values = Vec::new();

        for (i, (key, value)) in entries.into_iter().enumerate() {
            if i > 0 {
                text.push(',');
            }
            text.push_str(&serde_json::to_string(&key).unwrap());
            separators.push(text.len());
            text.push(':');
            let open = text.len();
            text.push_str(&serde_json::to_string(&value).unwrap());
            values.push((open, text.len() - 1));
            keys.push(key);
        }
        text.push('}');

        StringDocument {
            text,
            keys,
            separators,
            values,
        }
    })
}

proptest! {
    #[test]
    fn prop_well_formed_parses_directly(value in json_object(), pretty in any::<bool>()) {
        let text = if pretty {
            serde_json::to_string_pretty(&value).unwrap()
        } else {
            serde_json::to_string(&value).unwrap()
        };

        let (outcome, strategy) = ResponseParser::default().parse_with_strategy(&text);
        prop_assert_eq!(strategy, ParseStrategy::Direct);
        prop_assert_eq!(outcome, ParseOutcome::Structured(value.as_object().unwrap().clone()));
    }

    #[test]
    fn prop_repair_is_noop_on_valid_input(value in json_object()) {
        let text = serde_json::to_string(&value).unwrap();
        prop_assert_eq!(repair(&text).unwrap(), value);
    }

    #[test]
    fn prop_truncated_string_value_keeps_intact_keys(
        doc in string_document(),
        entry in any::<Index>(),
        cut in any::<Index>(),
    ) {
        let i = entry.index(doc.keys.len());
        let (open, close) = doc.values[i];
        let boundaries: Vec<usize> = (open + 1..=close)
            .filter(|&b| doc.text.is_char_boundary(b))
            .collect();
        let end = boundaries[cut.index(boundaries.len())];

        let repaired = repair(&doc.text[..end]);
        prop_assert!(repaired.is_ok(), "repair failed for {:?}", &doc.text[..end]);
        let repaired = repaired.unwrap();
        let object = repaired.as_object().unwrap();

        for key in &doc.keys[..=i] {
            prop_assert!(object.contains_key(key), "missing {} in {}", key, repaired);
        }
        prop_assert!(object[&doc.keys[i]].is_string());
    }

    #[test]
    fn prop_truncated_after_separator_inserts_null(
        doc in string_document(),
        entry in any::<Index>(),
    ) {
        let i = entry.index(doc.keys.len());
        let end = doc.separators[i] + 1;

        let repaired = repair(&doc.text[..end]).unwrap();
        let object = repaired.as_object().unwrap();

        prop_assert_eq!(&object[&doc.keys[i]], &Value::Null);
        for key in &doc.keys[..i] {
            prop_assert!(object.contains_key(key));
        }
    }

    #[test]
    fn prop_any_prefix_closes_into_valid_json(value in json_object(), cut in any::<Index>()) {
        let text = serde_json::to_string(&value).unwrap();
        let boundaries: Vec<usize> = (1..=text.len())
            .filter(|&b| text.is_char_boundary(b))
            .collect();
        let prefix = &text[..boundaries[cut.index(boundaries.len())]];

        let completed = complete_structure(prefix).unwrap();
        prop_assert!(
            serde_json::from_str::<Value>(&completed).is_ok(),
            "{:?} completed to invalid {:?}",
            prefix,
            completed
        );
    }

    #[test]
    fn prop_brace_free_text_is_partially_recovered(text in "[^{}\\[\\]]{0,200}") {
        match ResponseParser::default().parse(&text) {
            ParseOutcome::PartialRecovery { mapping, .. } => {
                prop_assert_eq!(&mapping[PARSING_STATUS_KEY], "partial_recovery");
                let confidence = mapping[CONFIDENCE_KEY].as_f64().unwrap();
                prop_assert!((0.0..=1.0).contains(&confidence));
            }
            other => prop_assert!(false, "expected partial recovery, got {:?}", other),
        }
    }
}
