//! Inbound request sanitization.
//!
//! Validates the `messages` payload shape and strips HTML markup from
//! message content while preserving code fences.

use gl_domain::config::Tuning;
use gl_domain::message::{Message, Role};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap())
}

fn code_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<code[^>]*>").unwrap())
}

fn pre_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<pre[^>]*>").unwrap())
}

/// Strip HTML/script markup while preserving code fences: `<code>` and
/// `<pre>` wrappers become backticks before the tag-stripping pass so
/// their contents survive as fenced code.
pub fn strip_markup(content: &str) -> String {
    let content = code_open_re().replace_all(content, "`");
    let content = content.replace("</code>", "`").replace("</CODE>", "`");
    let content = pre_open_re().replace_all(&content, "\n```\n");
    let content = content.replace("</pre>", "\n```\n").replace("</PRE>", "\n```\n");
    tag_re().replace_all(&content, "").into_owned()
}

/// Validate and sanitize the raw `messages` value from a chat request.
///
/// Order of checks: sequence shape, sequence length, then per-content
/// length (before per-message role/type validation), then roles and
/// content types.
pub fn sanitize_messages(raw: &Value, tuning: &Tuning) -> Result<Vec<Message>, String> {
    let items = raw
        .as_array()
        .ok_or_else(|| "messages must be an array".to_string())?;

    if items.len() > tuning.max_messages_per_request {
        return Err(format!(
            "too many messages: {} > {}",
            items.len(),
            tuning.max_messages_per_request
        ));
    }

    // Length check first: an oversized payload is rejected before any
    // per-message validation work happens on it. The limit is in
    // characters, so multibyte content is not penalized.
    for (i, item) in items.iter().enumerate() {
        let content_len = match item.get("content") {
            Some(Value::String(s)) => s.chars().count(),
            Some(other) => other.to_string().chars().count(),
            None => 0,
        };
        if content_len > tuning.max_message_length {
            return Err(format!(
                "message {i} content exceeds {} characters",
                tuning.max_message_length
            ));
        }
    }

    let mut messages = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let role = item
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("message {i} is missing a role"))?;
        let role: Role = serde_json::from_value(Value::String(role.to_string()))
            .map_err(|_| format!("message {i} has invalid role '{role}'"))?;

        let content = match item.get("content") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(format!("message {i} content must be a string")),
        };

        messages.push(Message {
            role,
            content: strip_markup(&content),
        });
    }

    if messages.is_empty() {
        return Err("messages must not be empty".to_string());
    }

    Ok(messages)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
