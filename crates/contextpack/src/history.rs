//! Chat-history compaction.

use gl_domain::message::Message;

/// Result of compacting a message history.
#[derive(Debug, Clone)]
pub struct CompactedHistory {
    /// Latest turns kept verbatim (clamped per message).
    pub recent: Vec<Message>,
    /// How many older messages were folded away (represented by the
    /// rolling summary instead).
    pub older_count: usize,
    /// How many kept messages had their content clamped.
    pub clamped_count: usize,
}

/// Clamp content to at most `max_chars` characters.
pub fn clamp_content(content: &str, max_chars: usize) -> (String, bool) {
    // The byte offset of the first character past the limit, when one
    // exists, is a valid slice boundary.
    match content.char_indices().nth(max_chars) {
        Some((boundary, _)) => (content[..boundary].to_string(), true),
        None => (content.to_string(), false),
    }
}

/// Keep the latest `verbatim_turns` user/assistant exchanges verbatim;
/// older messages are dropped here and represented by the rolling
/// summary bullets the budgeter selects separately.
///
/// Every kept message is clamped to `max_message_length` characters
/// first, so a single oversized message cannot dominate the budget.
pub fn compact_history(
    messages: &[Message],
    verbatim_turns: usize,
    max_message_length: usize,
) -> CompactedHistory {
    let keep = verbatim_turns.saturating_mul(2);
    let split = messages.len().saturating_sub(keep);

    let mut clamped_count = 0usize;
    let recent: Vec<Message> = messages[split..]
        .iter()
        .map(|m| {
            let (content, clamped) = clamp_content(&m.content, max_message_length);
            if clamped {
                clamped_count += 1;
            }
            Message {
                role: m.role,
                content,
            }
        })
        .collect();

    CompactedHistory {
        recent,
        older_count: split,
        clamped_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gl_domain::message::Role;

    fn turn(i: usize) -> [Message; 2] {
        [
            Message::user(format!("question {i}")),
            Message::assistant(format!("answer {i}")),
        ]
    }

    #[test]
    fn short_history_is_kept_whole() {
        let messages: Vec<Message> = turn(1).into_iter().chain(turn(2)).collect();
        let compacted = compact_history(&messages, 8, 1000);
        assert_eq!(compacted.recent.len(), 4);
        assert_eq!(compacted.older_count, 0);
    }

    #[test]
    fn old_turns_are_folded_away() {
        let messages: Vec<Message> = (0..10).flat_map(turn).collect();
        let compacted = compact_history(&messages, 3, 1000);
        assert_eq!(compacted.recent.len(), 6);
        assert_eq!(compacted.older_count, 14);
        // The newest message survives.
        assert_eq!(compacted.recent.last().unwrap().content, "answer 9");
    }

    #[test]
    fn oversized_message_is_clamped() {
        let messages = vec![Message::user("x".repeat(100))];
        let compacted = compact_history(&messages, 4, 10);
        assert_eq!(compacted.recent[0].content.len(), 10);
        assert_eq!(compacted.clamped_count, 1);
    }

    #[test]
    fn clamp_counts_characters_not_bytes() {
        // 'é' is two bytes; five characters fit a five-character limit.
        let (out, clamped) = clamp_content("ééééé", 5);
        assert_eq!(out, "ééééé");
        assert!(!clamped);

        let (out, clamped) = clamp_content("ééééé", 2);
        assert!(clamped);
        assert_eq!(out, "éé");
    }

    #[test]
    fn clamp_under_limit_is_noop() {
        let (out, clamped) = clamp_content("short", 10);
        assert_eq!(out, "short");
        assert!(!clamped);
    }

    #[test]
    fn roles_are_preserved() {
        let messages: Vec<Message> = turn(1).to_vec();
        let compacted = compact_history(&messages, 8, 1000);
        assert_eq!(compacted.recent[0].role, Role::User);
        assert_eq!(compacted.recent[1].role, Role::Assistant);
    }
}
