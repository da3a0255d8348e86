//! MCP envelope unwrapping.
//!
//! Events delivered over the MCP transport arrive wrapped in `event_msg` /
//! `response_item` envelopes whose payload carries the real event. The
//! unwrapper strips the envelope (recursively, so double-wrapping is
//! harmless) and normalizes the payload type so the shared canonicalization
//! applies regardless of transport.

use serde_json::Value;

const ENVELOPE_TYPES: [&str; 2] = ["event_msg", "response_item"];
const CODEX_EVENT_PREFIX: &str = "codex/event/";

/// Strip `event_msg`/`response_item` envelopes and return the normalized
/// inner event type plus its payload. Returns `None` when the value is not
/// an envelope.
pub fn unwrap_envelope(value: &Value) -> Option<(String, Value)> {
    let obj = value.as_object()?;
    let envelope_type = obj.get("type").and_then(Value::as_str)?;
    if !ENVELOPE_TYPES.contains(&envelope_type) {
        return None;
    }
    let payload = obj.get("payload")?;
    if !payload.is_object() {
        return None;
    }

    // Double-wrapped envelopes collapse to the innermost payload.
    if let Some(inner) = unwrap_envelope(payload) {
        return Some(inner);
    }

    let raw_type = payload.get("type").and_then(Value::as_str).unwrap_or("");
    Some((normalize_event_type(raw_type), payload.clone()))
}

/// Normalize a dialect event name: strip the `codex/event/` prefix,
/// snake-case it, and re-map aliases (`plan` → `todo_list`).
pub fn normalize_event_type(raw: &str) -> String {
    let stripped = raw.strip_prefix(CODEX_EVENT_PREFIX).unwrap_or(raw);
    let snake = to_snake_case(stripped);
    match snake.as_str() {
        "plan" | "plan_update" => "todo_list".to_string(),
        other => other.to_string(),
    }
}

fn to_snake_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev_lower = false;
    for ch in value.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else if ch == '-' || ch == '.' || ch == '/' || ch == ' ' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else {
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}
