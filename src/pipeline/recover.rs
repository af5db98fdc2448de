//! Response recovery: turn raw model output into a JSON object.
//!
//! ## Why is recovery necessary?
//!
//! Even when told to "return JSON only", chat models regularly:
//!
//! - wrap the object in ` ```json ... ``` ` fences,
//! - add a sentence of commentary before or after it,
//! - stop mid-object when they hit the completion-token cap.
//!
//! This module undoes the first two and repairs the third as far as a brace
//! scanner can. It is best-effort, not a JSON parser: when the model emits two
//! top-level objects side by side only the first survives, and a truncated
//! object loses its incomplete tail. Total failure yields an empty mapping so
//! the validator reports "No data extracted".
//!
//! ## Steps
//!
//! 1. Strip fences (`json`-labelled block, else any block, else stray markers)
//! 2. Parse from the first `{` to the last brace that brings depth back to zero
//! 3. Repair: retry at earlier zero-depth points; if the root object never
//!    closes, cut after the last complete nested value and close what is open
//! 4. No `{` at all: parse the whole cleaned text

use crate::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Parse model output into a JSON object, never failing.
///
/// Returns an empty map when nothing usable can be recovered; the reason is
/// logged at `warn` level.
pub fn recover_json(raw: &str) -> Map<String, Value> {
    match try_recover_json(raw) {
        Ok(map) => map,
        Err(e) => {
            warn!("Failed to parse JSON from response: {}", e);
            debug!("Response text: {}", preview(raw, 1000));
            Map::new()
        }
    }
}

/// Parse model output into a JSON object, reporting why it failed.
pub fn try_recover_json(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let cleaned = strip_fences(raw);
    info!(
        "Original response length: {}, cleaned length: {}",
        raw.len(),
        cleaned.len()
    );
    if cleaned.is_empty() {
        return Err(ParseError::Empty);
    }

    let Some(scan) = scan_braces(&cleaned) else {
        // No object start at all: the whole text is the last resort.
        return parse_object(&cleaned);
    };

    let mut last_err = None;

    // Step 2 + 3a: zero-depth points, last first.
    for &end in scan.closes.iter().rev() {
        match parse_object(&cleaned[scan.start..=end]) {
            Ok(map) => {
                if Some(&end) != scan.closes.last() {
                    info!("Recovered JSON by truncating at offset {}", end);
                }
                return Ok(map);
            }
            Err(e) => last_err = Some(e),
        }
    }

    // Step 3b: the root object was cut off.
    if scan.closes.is_empty() {
        if let Some((cut, open)) = &scan.last_cut {
            let mut repaired = cleaned[scan.start..*cut].to_string();
            for bracket in open.iter().rev() {
                repaired.push(if *bracket == b'{' { '}' } else { ']' });
            }
            info!(
                "Fixed truncated JSON, new length: {} (closed {} open brackets)",
                repaired.len(),
                open.len()
            );
            match parse_object(&repaired) {
                Ok(map) => return Ok(map),
                Err(e) => last_err = Some(e),
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        ParseError::Malformed("object never closes and has no complete member".into())
    }))
}

// ── Step 1: Strip fences ─────────────────────────────────────────────────────

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").unwrap());
static RE_ANY_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").unwrap());
static RE_FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[a-zA-Z]*\s*").unwrap());
static RE_FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```\s*").unwrap());

/// Remove Markdown code fences around (or scattered through) the payload.
pub fn strip_fences(input: &str) -> String {
    if let Some(caps) = RE_JSON_FENCE.captures(input) {
        debug!("Found ```json block");
        return caps[1].trim().to_string();
    }
    if let Some(caps) = RE_ANY_FENCE.captures(input) {
        debug!("Found generic ``` block");
        return caps[1].trim().to_string();
    }
    let s = RE_FENCE_OPEN.replace_all(input, "");
    let s = RE_FENCE_CLOSE.replace_all(&s, "");
    s.trim().to_string()
}

// ── Step 2: Brace scanning ───────────────────────────────────────────────────

/// Structure of the text from the first `{` onwards.
#[derive(Debug, PartialEq)]
struct BraceScan {
    /// Offset of the first `{`.
    start: usize,
    /// Offsets of every `}` that brought the depth back to zero.
    closes: Vec<usize>,
    /// Offset just past the last `}`/`]` that closed a nested value while the
    /// root was still open, with the brackets open at that point.
    last_cut: Option<(usize, Vec<u8>)>,
}

/// Scan brackets from the first `{`, ignoring those inside string literals.
///
/// Between top-level objects (depth zero) quotes are not tracked, so stray
/// prose between two objects cannot flip the string state.
fn scan_braces(text: &str) -> Option<BraceScan> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut closes = Vec::new();
    let mut last_cut = None;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if stack.is_empty() {
            if b == b'{' {
                stack.push(b);
            }
            continue;
        }
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(b),
            b'}' | b']' => {
                stack.pop();
                if stack.is_empty() {
                    if b == b'}' {
                        closes.push(i);
                    }
                } else if closes.is_empty() {
                    last_cut = Some((i + 1, stack.clone()));
                }
            }
            _ => {}
        }
    }

    Some(BraceScan {
        start,
        closes,
        last_cut,
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn parse_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ParseError::NotAnObject(kind_name(&other))),
        Err(e) => Err(ParseError::Malformed(e.to_string())),
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// First `max` characters of `s`, for log lines.
pub(crate) fn preview(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{
  "header": {
    "contract_note_no": "ISEC/2025029/036170355",
    "trade_date": "10-02-2025",
    "client_name": "PKEDAY ADVISORS LLP"
  },
  "transactions": [
    {"isin": "INE00WC01027", "security_name": "AFFLE (INDIA) LIMITED", "buy_quantity": 6000}
  ]
}"#;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    // ── Fences ───────────────────────────────────────────────────────────────

    #[test]
    fn json_fence_round_trips() {
        let wrapped = format!("```json\n{SAMPLE}\n```");
        let expected: Value = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(Value::Object(recover_json(&wrapped)), expected);
    }

    #[test]
    fn json_fence_preferred_over_earlier_generic_fence() {
        let text = "```\nnot this\n```\nHere you go:\n```json\n{\"a\": 1}\n```";
        assert_eq!(strip_fences(text), "{\"a\": 1}");
    }

    #[test]
    fn generic_fence_extracted() {
        assert_eq!(strip_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn unterminated_fence_markers_removed() {
        assert_eq!(strip_fences("```json\n{\"a\": 1"), "{\"a\": 1");
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(strip_fences("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    // ── Extraction ───────────────────────────────────────────────────────────

    #[test]
    fn commentary_around_object_ignored() {
        let text = format!("Sure! Here is the data:\n{SAMPLE}\nLet me know if you need more.");
        assert_eq!(recover_json(&text).len(), 2);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_scanner() {
        let text = r#"{"security_name": "ODD } NAME {", "n": 1} trailing"#;
        assert_eq!(
            recover_json(text),
            obj(json!({"security_name": "ODD } NAME {", "n": 1}))
        );
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let text = r#"{"name": "A \"quoted\" } brace", "n": 2}"#;
        assert_eq!(recover_json(text)["n"], json!(2));
    }

    #[test]
    fn sibling_objects_keep_only_first() {
        let text = r#"{"header": {"a": 1}} {"transactions": []}"#;
        assert_eq!(recover_json(text), obj(json!({"header": {"a": 1}})));
    }

    #[test]
    fn trailing_fragment_after_complete_object_discarded() {
        let text = r#"{"header": {"a": 1}} {"transactions": [{"isin": "#;
        assert_eq!(recover_json(text), obj(json!({"header": {"a": 1}})));
    }

    // ── Truncation repair ────────────────────────────────────────────────────

    #[test]
    fn truncated_root_keeps_complete_members() {
        let text = r#"{"header": {"contract_note_no": "X1"},
            "transactions": [
                {"isin": "INE00WC01027", "security_name": "AFFLE"},
                {"isin": "INE0"#;
        let map = recover_json(text);
        assert_eq!(
            map,
            obj(json!({
                "header": {"contract_note_no": "X1"},
                "transactions": [{"isin": "INE00WC01027", "security_name": "AFFLE"}]
            }))
        );
    }

    #[test]
    fn truncated_nested_field_after_complete_section() {
        let text = r#"```json
{"header": {"client_id": "5550001544"}, "obligations": {"gst_details": {"cgst_rate": 9"#;
        assert_eq!(
            recover_json(text),
            obj(json!({"header": {"client_id": "5550001544"}}))
        );
    }

    #[test]
    fn truncated_before_any_complete_member_is_empty() {
        assert!(recover_json(r#"{"header": {"contract_no"#).is_empty());
        assert!(matches!(
            try_recover_json(r#"{"header": "abc"#),
            Err(ParseError::Malformed(_))
        ));
    }

    // ── Failure modes ────────────────────────────────────────────────────────

    #[test]
    fn empty_and_fence_only_input() {
        assert_eq!(try_recover_json(""), Err(ParseError::Empty));
        assert_eq!(try_recover_json("```json\n```"), Err(ParseError::Empty));
        assert!(recover_json("   ").is_empty());
    }

    #[test]
    fn non_object_json_rejected() {
        assert_eq!(
            try_recover_json("[1, 2, 3]"),
            Err(ParseError::NotAnObject("array"))
        );
        assert!(recover_json("42").is_empty());
    }

    #[test]
    fn prose_without_json_is_empty() {
        assert!(recover_json("I could not read the attached document.").is_empty());
    }

    #[test]
    fn scan_reports_zero_depth_points() {
        let scan = scan_braces(r#"xx{"a":{}}y{"b":[1]}"#).unwrap();
        assert_eq!(scan.start, 2);
        assert_eq!(scan.closes, vec![9, 19]);
        // The nested `{}` closed while the root was still open.
        assert_eq!(scan.last_cut, Some((9, vec![b'{'])));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("₹₹₹", 2), "₹₹");
        assert_eq!(preview("ab", 10), "ab");
    }
}
