//! Redaction of secret-shaped substrings from log/audit output, grounded on
//! the teacher's `util::text_processing::redact_sensitive`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Redact sensitive-looking values in free text, keeping key prefixes for
/// debugging context.
pub fn redact_sensitive(input: &str) -> String {
    redact_sensitive_with(input, "[REDACTED]")
}

pub fn redact_sensitive_with(input: &str, replacement: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{prefix}{replacement}")
            })
            .to_string();
    }
    redacted
}

fn redact_patterns() -> &'static Vec<Regex> {
    static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
        vec![
            Regex::new(r"(?i)(authorization:\s+)([^\s]+(?:\s+[^\s]+)*)").unwrap(),
            Regex::new(r"(?i)((?:^|\b)Bearer\s+)([A-Za-z0-9\-._~+/]+=*)").unwrap(),
            Regex::new(r"(?i)((?:^|\b)Basic\s+)([A-Za-z0-9+/]+=*)").unwrap(),
            Regex::new(r"(?i)((?:api[\s_-]?key|auth[\s_-]?token|token|secret|password)\s*[:=]\s*)([^\s,;]+)").unwrap(),
            Regex::new(r"(?i)((?:[A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD))=)([^\s]+)").unwrap(),
        ]
    });
    &PATTERNS
}

const SENSITIVE_KEYS: &[&str] = &["authorization", "auth", "token", "access_token", "id_token", "secret", "password", "api_key", "apikey", "x-api-key", "cookie", "set-cookie"];

/// Recursively redact a JSON value: string leaves are scanned with
/// [`redact_sensitive`], and object keys that look like credentials are
/// masked outright regardless of their value's shape.
pub fn redact_json_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_sensitive(&s)),
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                if SENSITIVE_KEYS.iter().any(|sensitive| key.eq_ignore_ascii_case(sensitive)) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_json_value(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(redact_json_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_tokens() {
        let input = "Authorization: Bearer secret123";
        assert_eq!(redact_sensitive(input), "Authorization: [REDACTED]");
    }

    #[test]
    fn redacts_key_value_pairs() {
        let input = "API_KEY=abc123 TOKEN=xyz789";
        assert_eq!(redact_sensitive(input), "API_KEY=[REDACTED] TOKEN=[REDACTED]");
    }

    #[test]
    fn redacts_sensitive_json_keys_regardless_of_value() {
        let value = serde_json::json!({"api_key": 12345, "name": "calc"});
        let redacted = redact_json_value(value);
        assert_eq!(redacted["api_key"], "[REDACTED]");
        assert_eq!(redacted["name"], "calc");
    }
}
