//! Redaction of secrets from debug log output.
//!
//! Debug logs include request headers, query/body payloads and decoded
//! responses. With sanitization enabled (the default), credential fields
//! are replaced with `REDACTED` and `resources` lists are truncated so a
//! large query doesn't flood the log.

use serde_json::Value;

use crate::config::GLOBAL_API_MAX_RETURN;

/// Keys whose values never reach the log in clear text.
const REDACTED_KEYS: [&str; 5] = [
    "access_token",
    "client_id",
    "client_secret",
    "member_cid",
    "token",
];

/// Returns a redacted copy of `value`.
///
/// Redaction applies to top-level keys and to keys inside a top-level
/// `body` object. `body.resources` is truncated to
/// `max(1, min(record_max, GLOBAL_API_MAX_RETURN))` entries.
pub fn sanitize_value(value: &Value, record_max: usize) -> Value {
    let mut cleaned = value.clone();
    let Some(map) = cleaned.as_object_mut() else {
        return value.clone();
    };

    for key in REDACTED_KEYS {
        if map.contains_key(key) {
            map.insert(key.to_string(), Value::from("REDACTED"));
        }
    }
    if map.contains_key("Authorization") {
        map.insert("Authorization".to_string(), Value::from("Bearer REDACTED"));
    }

    if let Some(Value::Object(body)) = map.get_mut("body") {
        for key in REDACTED_KEYS {
            if body.contains_key(key) {
                body.insert(key.to_string(), Value::from("REDACTED"));
            }
        }
        if let Some(Value::Array(resources)) = body.get_mut("resources") {
            let keep = record_max.min(GLOBAL_API_MAX_RETURN).max(1);
            resources.truncate(keep);
        }
    }

    cleaned
}

/// Returns a redacted copy of a header list. `Authorization` values keep
/// their scheme and lose the credential.
pub fn sanitize_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if name.eq_ignore_ascii_case("authorization") {
                let scheme = value.split_whitespace().next().unwrap_or("Bearer");
                (name.clone(), format!("{scheme} REDACTED"))
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
