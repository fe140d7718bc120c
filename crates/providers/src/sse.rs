//! Shared SSE streaming infrastructure for outbound adapters.
//!
//! Adapters follow the same pattern: receive a `reqwest::Response`,
//! buffer chunks, split on `\n\n`, extract `data:` payloads, and feed
//! each payload to an adapter-specific parser that returns
//! `Vec<Result<E>>` for its own event type.

use crate::util::from_reqwest;
use gl_domain::error::Result;
use gl_domain::stream::BoxStream;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are terminated by a blank line. Each event block may
/// contain `event:`, `data:`, `id:`, or `retry:` lines; only `data:`
/// lines matter here. Everything up to the last terminator is consumed
/// in one drain; a trailing partial event stays in the buffer for the
/// next chunk.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let Some(last_terminator) = buffer.rfind("\n\n") else {
        return Vec::new();
    };
    let complete: String = buffer.drain(..last_terminator + 2).collect();

    let mut payloads = Vec::new();
    for line in complete.split("\n\n").flat_map(str::lines) {
        let Some(payload) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if !payload.is_empty() {
            payloads.push(payload.to_string());
        }
    }
    payloads
}

/// Build a [`BoxStream`] of adapter events from an SSE response and a
/// parser closure.
///
/// The closure is `FnMut` because adapters keep mutable state across
/// payloads (delta accumulation, reasoning buffers). On body close the
/// remaining buffer is flushed through the parser once.
pub(crate) fn sse_response_stream<E, F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<E>>
where
    E: Send + 'static,
    F: FnMut(&str) -> Vec<Result<E>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        for event in parse_data(&data) {
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Stream ended — flush any remaining partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parse_data(&data) {
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: delta\ndata: {\"text\":\"hi\"}\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"text\":\"hi\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["payload"]);
    }

    #[test]
    fn drain_skips_empty_data_lines() {
        let mut buf = String::from("data: \n\n");
        assert!(drain_data_lines(&mut buf).is_empty());
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: chunk1");
        assert!(drain_data_lines(&mut buf).is_empty());

        buf.push_str("\n\ndata: chunk2\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["chunk1", "chunk2"]);
        assert!(buf.is_empty());
    }
}
