//! Session id validation and content-hash derivation.

use gl_domain::error::{Error, Result};
use gl_domain::message::Message;
use sha2::{Digest, Sha256};

/// Maximum accepted session id length.
const SESSION_ID_MAX_LEN: usize = 128;

/// Validate and sanitize a caller-supplied session id.
///
/// Rules: non-empty after trimming, at most 128 characters, printable
/// ASCII without whitespace. Anything else is rejected rather than
/// silently rewritten — callers that cannot supply a valid id should
/// omit it and let [`derive_session_id`] mint one.
pub fn sanitize_session_id(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("session id must not be empty"));
    }
    if trimmed.len() > SESSION_ID_MAX_LEN {
        return Err(Error::validation(format!(
            "session id exceeds {SESSION_ID_MAX_LEN} characters"
        )));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_graphic())
    {
        return Err(Error::validation(
            "session id contains non-printable or non-ASCII characters",
        ));
    }
    Ok(trimmed.to_string())
}

/// Derive a deterministic session id from the request content.
///
/// Hashing the message sequence plus a caller fingerprint means the
/// same conversation from the same caller lands in the same session,
/// while different fingerprints never collide in practice.
pub fn derive_session_id(messages: &[Message], fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update([0u8]);
    for m in messages {
        hasher.update(m.role.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(m.content.as_bytes());
        hasher.update([0u8]);
    }
    format!("sess-{}", &hex::encode(hasher.finalize())[..32])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids_pass_through_trimmed() {
        assert_eq!(sanitize_session_id("  abc-123  ").unwrap(), "abc-123");
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!(sanitize_session_id("   ").is_err());
    }

    #[test]
    fn oversized_id_is_rejected() {
        let exact = "a".repeat(128);
        assert!(sanitize_session_id(&exact).is_ok());
        let over = "a".repeat(129);
        assert!(sanitize_session_id(&over).is_err());
    }

    #[test]
    fn control_characters_are_rejected() {
        assert!(sanitize_session_id("abc\u{7}def").is_err());
        assert!(sanitize_session_id("has space").is_err());
    }

    #[test]
    fn derivation_is_deterministic() {
        let messages = vec![Message::user("hello"), Message::assistant("hi")];
        let a = derive_session_id(&messages, "client-1");
        let b = derive_session_id(&messages, "client-1");
        assert_eq!(a, b);
        assert!(a.starts_with("sess-"));
        assert!(a.len() <= SESSION_ID_MAX_LEN);
    }

    #[test]
    fn different_fingerprints_yield_different_ids() {
        let messages = vec![Message::user("hello")];
        let a = derive_session_id(&messages, "client-1");
        let b = derive_session_id(&messages, "client-2");
        assert_ne!(a, b);
    }

    #[test]
    fn different_content_yields_different_ids() {
        let a = derive_session_id(&[Message::user("hello")], "c");
        let b = derive_session_id(&[Message::user("hello!")], "c");
        assert_ne!(a, b);
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        // ("ab", "c") must not hash like ("a", "bc").
        let a = derive_session_id(&[Message::user("ab")], "c");
        let b = derive_session_id(&[Message::user("a")], "bc");
        assert_ne!(a, b);
    }
}
