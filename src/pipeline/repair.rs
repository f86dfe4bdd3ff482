//! Repair chain: recover a canonical chunk list from a JSON-mode reply.
//!
//! Models asked for `[{"text": …, "bbox": […]}, …]` regularly return
//! something else:
//!
//! | Observed shape | Handled by |
//! |---|---|
//! | array wrapped in a ```` ```json ```` fence | fence strip before parsing |
//! | `[{"text": "<the whole array, JSON-encoded>"}]` | [`double_encoded_single_chunk`] |
//! | `{"text": [ …chunks… ]}` or `{"text": "<encoded array>"}` | [`object_with_text_list`] |
//! | a lone `{"text": …, "bbox": …}` object | [`lone_chunk_object`] |
//! | prose around the array | [`first_bracketed_array`] |
//!
//! Strategies run in a fixed order and the first match wins. Each one only
//! fires when its expected field is present (or absent), so a correctly
//! shaped reply is never rewritten. When nothing matches, the whole raw
//! reply becomes a single chunk flagged `parse_error`: [`repair`] never
//! fails, so one bad page cannot abort a batch.

use crate::output::{BBox, Chunk};
use crate::pipeline::postprocess::strip_code_fence;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// A parse attempt on the fence-stripped reply. `None` means "no match".
type TextStrategy = fn(&str) -> Option<Vec<Value>>;

/// A reshaping attempt on an already-parsed reply.
type ValueStrategy = fn(&Value) -> Option<Vec<Value>>;

const TEXT_STRATEGIES: &[(&str, TextStrategy)] = &[
    ("whole_reply", whole_reply),
    ("first_bracketed_array", first_bracketed_array),
];

const VALUE_STRATEGIES: &[(&str, ValueStrategy)] = &[
    ("double_encoded_single_chunk", double_encoded_single_chunk),
    ("plain_array", plain_array),
    ("object_with_text_list", object_with_text_list),
    ("lone_chunk_object", lone_chunk_object),
];

/// Parse a JSON-mode reply into chunks. Never fails.
pub fn repair(raw: &str) -> Vec<Chunk> {
    let text = strip_code_fence(raw);
    for (name, strategy) in TEXT_STRATEGIES {
        if let Some(items) = strategy(&text) {
            debug!("Repair: '{}' matched, {} chunks", name, items.len());
            return items.into_iter().map(chunk_from_value).collect();
        }
    }
    warn!(
        "Repair: no strategy matched a {}-char reply; emitting parse_error chunk",
        raw.len()
    );
    vec![Chunk::raw_fallback(raw)]
}

// ── Text-level strategies ────────────────────────────────────────────────

fn whole_reply(text: &str) -> Option<Vec<Value>> {
    let value: Value = serde_json::from_str(text).ok()?;
    VALUE_STRATEGIES.iter().find_map(|(name, strategy)| {
        let items = strategy(&value)?;
        debug!("Repair: value strategy '{}' matched", name);
        Some(items)
    })
}

static RE_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

/// Greedy `[` … `]` span anywhere in the reply.
///
/// Only arrays of objects or strings count: a span like a stray `bbox` list
/// must not turn into chunks.
fn first_bracketed_array(text: &str) -> Option<Vec<Value>> {
    let span = RE_ARRAY.find(text)?;
    match serde_json::from_str(span.as_str()).ok()? {
        Value::Array(items) if items.iter().all(|v| v.is_object() || v.is_string()) => Some(items),
        _ => None,
    }
}

// ── Value-level strategies ───────────────────────────────────────────────

/// `[{"text": "[…]"}]` with no `bbox`: the model put the whole array in one chunk.
fn double_encoded_single_chunk(value: &Value) -> Option<Vec<Value>> {
    let [only] = value.as_array()?.as_slice() else {
        return None;
    };
    let obj = only.as_object()?;
    if obj.contains_key("bbox") {
        return None;
    }
    decode_list(obj.get("text")?.as_str()?)
}

fn plain_array(value: &Value) -> Option<Vec<Value>> {
    value.as_array().cloned()
}

/// `{"text": [...]}` or `{"text": "[...]"}`.
fn object_with_text_list(value: &Value) -> Option<Vec<Value>> {
    match value.as_object()?.get("text")? {
        Value::Array(items) => Some(items.clone()),
        Value::String(s) => decode_list(s),
        _ => None,
    }
}

/// `{"text": "…", "bbox": …}`: a single well-formed chunk without its array.
fn lone_chunk_object(value: &Value) -> Option<Vec<Value>> {
    let obj = value.as_object()?;
    if obj.get("text")?.is_string() && obj.contains_key("bbox") {
        Some(vec![value.clone()])
    } else {
        None
    }
}

fn decode_list(s: &str) -> Option<Vec<Value>> {
    match serde_json::from_str(s).ok()? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

// ── Canonicalisation ─────────────────────────────────────────────────────

/// Coerce one recovered element into a [`Chunk`].
///
/// Non-string `text` values are kept in their JSON spelling; `bbox` survives
/// only as exactly four numbers.
fn chunk_from_value(value: Value) -> Chunk {
    match value {
        Value::Object(mut obj) => {
            let text = match obj.remove("text") {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            Chunk::with_bbox(text, obj.get("bbox").and_then(parse_bbox))
        }
        Value::String(s) => Chunk::new(s, None),
        other => Chunk::new(other.to_string(), None),
    }
}

fn parse_bbox(value: &Value) -> Option<BBox> {
    let number = |v: &Value| match v {
        Value::Number(n) => Some(n.clone()),
        _ => None,
    };
    match value.as_array()?.as_slice() {
        [x, y, w, h] => Some(BBox::from_numbers([number(x)?, number(y)?, number(w)?, number(h)?])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_array() {
        let chunks = repair(r#"[{"text":"A","bbox":[0,0,0.5,0.5]}]"#);
        assert_eq!(chunks, vec![Chunk::new("A", Some([0.0, 0.0, 0.5, 0.5]))]);
        assert!(!chunks[0].parse_error);
    }

    #[test]
    fn fenced_array() {
        let chunks = repair("```\n[{\"text\":\"A\",\"bbox\":null}]\n```");
        assert_eq!(chunks, vec![Chunk::new("A", None)]);
    }

    #[test]
    fn fenced_array_with_language_tag() {
        let chunks = repair("```json\n[{\"text\":\"A\",\"bbox\":[0.1,0.2,0.3,0.4]}]\n```\n");
        assert_eq!(chunks, vec![Chunk::new("A", Some([0.1, 0.2, 0.3, 0.4]))]);
    }

    #[test]
    fn double_encoded_array() {
        let chunks = repair(r#"[{"text":"[{\"text\":\"A\",\"bbox\":null}]"}]"#);
        assert_eq!(chunks, vec![Chunk::new("A", None)]);
    }

    #[test]
    fn single_chunk_with_bbox_is_not_unwrapped() {
        let raw = r#"[{"text":"[1, 2]","bbox":[0,0,1,1]}]"#;
        assert_eq!(repair(raw), vec![Chunk::new("[1, 2]", Some([0.0, 0.0, 1.0, 1.0]))]);
    }

    #[test]
    fn single_chunk_with_plain_text_kept() {
        let chunks = repair(r#"[{"text":"just words"}]"#);
        assert_eq!(chunks, vec![Chunk::new("just words", None)]);
    }

    #[test]
    fn object_with_list_text() {
        let chunks = repair(r#"{"text":[{"text":"A","bbox":[0,0,1,1]},{"text":"B","bbox":null}]}"#);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], Chunk::new("B", None));
    }

    #[test]
    fn object_with_encoded_list_text() {
        let chunks = repair(r#"{"text":"[{\"text\":\"A\",\"bbox\":null}]"}"#);
        assert_eq!(chunks, vec![Chunk::new("A", None)]);
    }

    #[test]
    fn lone_chunk_object() {
        let chunks = repair(r#"{"text":"Total","bbox":[0.5,0.9,0.1,0.02]}"#);
        assert_eq!(chunks, vec![Chunk::new("Total", Some([0.5, 0.9, 0.1, 0.02]))]);
    }

    #[test]
    fn array_embedded_in_prose() {
        let raw = "Here is the result:\n[{\"text\":\"A\",\"bbox\":null}]\nHope it helps.";
        assert_eq!(repair(raw), vec![Chunk::new("A", None)]);
    }

    #[test]
    fn bbox_list_in_prose_is_not_a_chunk_list() {
        let raw = r#"{"text":"x","bbox":[0.1,0.2,0.3,0.4]} trailing"#;
        assert_eq!(repair(raw), vec![Chunk::raw_fallback(raw)]);
    }

    #[test]
    fn number_array_in_prose_falls_back() {
        let raw = "Coordinates: [1, 2, 3]";
        assert_eq!(repair(raw), vec![Chunk::raw_fallback(raw)]);
    }

    #[test]
    fn integer_bbox_values_serialise_unchanged() {
        let chunks = repair(r#"[{"text":"A","bbox":[0,0,1,1]}]"#);
        let json = serde_json::to_string(&chunks[0].bbox).unwrap();
        assert_eq!(json, "[0,0,1,1]");
    }

    #[test]
    fn non_json_falls_back_verbatim() {
        let chunks = repair("hello world");
        assert_eq!(chunks, vec![Chunk::raw_fallback("hello world")]);
        assert!(chunks[0].parse_error);
        assert_eq!(chunks[0].bbox, None);
    }

    #[test]
    fn fallback_keeps_unstripped_raw() {
        let raw = "```\nnot json\n```";
        assert_eq!(repair(raw), vec![Chunk::raw_fallback(raw)]);
    }

    #[test]
    fn object_without_text_falls_back() {
        let raw = r#"{"error":"cannot read"}"#;
        assert_eq!(repair(raw), vec![Chunk::raw_fallback(raw)]);
    }

    #[test]
    fn truncated_array_falls_back() {
        let raw = r#"[{"text":"A","bbox":[0,0,1,1]},{"text":"B","bb"#;
        assert_eq!(repair(raw), vec![Chunk::raw_fallback(raw)]);
    }

    #[test]
    fn malformed_bbox_dropped() {
        let chunks = repair(r#"[{"text":"A","bbox":[0,0,1]},{"text":"B","bbox":"0,0,1,1"},{"text":"C","bbox":[0,0,"x",1]}]"#);
        assert!(chunks.iter().all(|c| c.bbox.is_none()));
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn non_object_elements_coerced() {
        let chunks = repair(r#"["line one", 42, {"text": 7, "bbox": null}]"#);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["line one", "42", "7"]);
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(repair("[]").is_empty());
    }
}
