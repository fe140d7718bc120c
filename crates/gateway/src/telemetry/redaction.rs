//! Regex-based redaction applied before a turn record is stored or an
//! admin payload is returned.

use regex::Regex;
use std::sync::OnceLock;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
    })
}

fn card_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 13–16 digits, optionally separated by spaces or dashes.
    RE.get_or_init(|| Regex::new(r"\b(?:\d[ -]?){12,15}\d\b").unwrap())
}

fn ssn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap())
}

/// Redact PII patterns in a string. Idempotent: replacement tokens
/// contain no digits or `@`, so a second pass matches nothing.
pub fn redact(text: &str) -> String {
    let out = email_re().replace_all(text, "[EMAIL]");
    let out = ssn_re().replace_all(&out, "[SSN]");
    let out = card_re().replace_all(&out, "[CARD]");
    out.into_owned()
}

/// Recursively redact every string inside a JSON value. Event-agnostic:
/// keys are left alone, all string leaves are scrubbed.
pub fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            let redacted = redact(s);
            if redacted != *s {
                *s = redacted;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                redact_value(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_redacted() {
        assert_eq!(
            redact("contact alice.smith+x@example.co.uk for details"),
            "contact [EMAIL] for details"
        );
    }

    #[test]
    fn card_numbers_are_redacted() {
        assert_eq!(redact("card 4111 1111 1111 1111 ok"), "card [CARD] ok");
        assert_eq!(redact("card 4111-1111-1111-1111 ok"), "card [CARD] ok");
        assert_eq!(redact("card 4111111111111111 ok"), "card [CARD] ok");
    }

    #[test]
    fn ssn_patterns_are_redacted() {
        assert_eq!(redact("ssn 123-45-6789."), "ssn [SSN].");
    }

    #[test]
    fn short_numbers_survive() {
        assert_eq!(redact("order 12345 shipped"), "order 12345 shipped");
    }

    #[test]
    fn redaction_is_idempotent() {
        let once = redact("mail me at a@b.io, card 4111111111111111, ssn 123-45-6789");
        let twice = redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn json_values_are_redacted_recursively() {
        let mut value = serde_json::json!({
            "question": "email me at x@y.com",
            "nested": {"list": ["ssn 123-45-6789", 42]},
        });
        redact_value(&mut value);
        assert_eq!(value["question"], "email me at [EMAIL]");
        assert_eq!(value["nested"]["list"][0], "ssn [SSN]");
        assert_eq!(value["nested"]["list"][1], 42);
    }
}
