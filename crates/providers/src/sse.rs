//! Server-sent-events decoding for the streaming adapters.
//!
//! [`SseDecoder`] is a line-oriented incremental decoder: bytes go in,
//! complete event payloads come out, and a partially received line or
//! event survives until the next network chunk. The stream builder wraps
//! a response body around a decoder and an adapter-specific payload
//! parser.

use vx_domain::stream::{BoxStream, LlmStreamEvent};
use vx_domain::Result;

use crate::util::from_reqwest;

/// Assembles SSE events from an arbitrarily chunked byte stream.
///
/// Per the SSE framing rules: events are separated by a blank line, only
/// `data:` fields matter here (`event:`, `id:`, `retry:` and comment
/// lines are dropped), and an event's payload is its data lines joined
/// with `\n`.
#[derive(Default)]
pub(crate) struct SseDecoder {
    /// Bytes of the line currently being received.
    line: Vec<u8>,
    /// Data lines of the event currently being assembled.
    data: Vec<String>,
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk, returning the payload of every event it
    /// completed.
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut payloads = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                if let Some(payload) = self.end_line() {
                    payloads.push(payload);
                }
            } else {
                self.line.push(byte);
            }
        }
        payloads
    }

    /// Close the stream. A trailing event whose blank-line terminator
    /// never arrived still counts.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        self.feed(b"\n\n")
    }

    /// Process the buffered line; a blank line emits the pending event.
    fn end_line(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.line);
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.data).join("\n"));
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.trim();
            if !value.is_empty() {
                self.data.push(value.to_string());
            }
        }
        None
    }
}

/// Decode a streaming response through `parse_data`, one call per event
/// payload. The parser may be stateful (tool-call assembly). The
/// resulting stream always ends with a `Done` event: consumers stop at
/// the first one they see, so bodies that close without a terminator
/// still terminate cleanly.
pub(crate) fn decode_sse<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<LlmStreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<LlmStreamEvent>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut response = response;
        let mut decoder = SseDecoder::new();

        loop {
            let payloads = match response.chunk().await {
                Ok(Some(bytes)) => decoder.feed(&bytes),
                Ok(None) => {
                    for payload in decoder.finish() {
                        for event in parse_data(&payload) {
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            };
            for payload in payloads {
                for event in parse_data(&payload) {
                    yield event;
                }
            }
        }

        yield Ok(LlmStreamEvent::Done { stop_reason: None });
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(decoder: &mut SseDecoder, s: &str) -> Vec<String> {
        decoder.feed(s.as_bytes())
    }

    #[test]
    fn one_event_per_blank_line() {
        let mut d = SseDecoder::new();
        let got = feed_str(&mut d, "event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(got, vec!["{\"a\":1}"]);
    }

    #[test]
    fn several_events_in_one_chunk() {
        let mut d = SseDecoder::new();
        let got = feed_str(&mut d, "data: first\n\ndata: second\n\n");
        assert_eq!(got, vec!["first", "second"]);
    }

    #[test]
    fn bytes_split_anywhere_reassemble() {
        let wire = "data: hello\n\ndata: world\n\n";
        for cut in 0..wire.len() {
            let mut d = SseDecoder::new();
            let mut got = feed_str(&mut d, &wire[..cut]);
            got.extend(feed_str(&mut d, &wire[cut..]));
            assert_eq!(got, vec!["hello", "world"], "cut at {cut}");
        }
    }

    #[test]
    fn crlf_lines_are_handled() {
        let mut d = SseDecoder::new();
        let got = feed_str(&mut d, "data: payload\r\n\r\n");
        assert_eq!(got, vec!["payload"]);
    }

    #[test]
    fn multi_line_data_joins_with_newline() {
        let mut d = SseDecoder::new();
        let got = feed_str(&mut d, "data: line one\ndata: line two\n\n");
        assert_eq!(got, vec!["line one\nline two"]);
    }

    #[test]
    fn non_data_fields_are_dropped() {
        let mut d = SseDecoder::new();
        let got = feed_str(&mut d, ": comment\nid: 42\nretry: 5000\ndata: kept\n\n");
        assert_eq!(got, vec!["kept"]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut d = SseDecoder::new();
        assert!(feed_str(&mut d, "data: tail").is_empty());
        assert_eq!(d.finish(), vec!["tail"]);
        // Idempotent once drained.
        assert!(d.finish().is_empty());
    }

    #[test]
    fn empty_data_values_do_not_form_events() {
        let mut d = SseDecoder::new();
        assert!(feed_str(&mut d, "data: \n\n").is_empty());
        assert!(d.finish().is_empty());
    }

    #[test]
    fn done_sentinel_passes_through() {
        let mut d = SseDecoder::new();
        let got = feed_str(&mut d, "data: [DONE]\n\n");
        assert_eq!(got, vec!["[DONE]"]);
    }
}
