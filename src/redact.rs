//! Redaction of sensitive values in JSON documents.

use serde_json::{Map, Value};

/// Replacement for redacted values.
pub const REDACTED_MARKER: &str = "[REDACTED]";

const SENSITIVE_KEY_FRAGMENTS: [&str; 4] = ["password", "token", "secret", "key"];

/// Whether a field name looks like it holds a credential.
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| key.contains(fragment))
}

/// Deep copy of `value` with every sensitive key's value replaced by
/// [`REDACTED_MARKER`], at any depth.
pub fn redact_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if is_sensitive_key(key) {
                        Value::String(REDACTED_MARKER.to_string())
                    } else {
                        redact_sensitive(value)
                    };
                    (key.clone(), value)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive).collect()),
        other => other.clone(),
    }
}
