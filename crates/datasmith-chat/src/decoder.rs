//! # SSE Decoder
//!
//! Turns the chunked byte body of a `text/event-stream` response into `data: `
//! payloads. Handles:
//! - UTF-8 sequences split across chunk boundaries
//! - Line buffering (events split across chunks, several events per chunk)
//! - `[DONE]` sentinel detection
//! - Flushing whatever is buffered when the body ends or fails

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::trace;

use crate::error::Result;

/// One decoded `data: ` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsePayload {
    /// The raw payload text (normally a JSON object).
    Data(String),
    /// The `[DONE]` sentinel. Nothing follows it.
    Done,
}

/// Incremental decoder for a single response body.
///
/// Not restartable: once [`SsePayload::Done`] has been produced, or
/// [`SseDecoder::finish`] has been called, it yields nothing more.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of an incomplete UTF-8 sequence at the end of the last chunk.
    pending: Vec<u8>,
    /// Decoded text not yet terminated by a newline.
    buffer: String,
    done: bool,
}

impl SseDecoder {
    /// Create a decoder for a new response body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the decoder has terminated.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Feed the next chunk of the body and collect every complete payload.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SsePayload> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.decode(chunk);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return out;
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        for line in complete.split('\n') {
            self.process_line(line, &mut out);
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// Signal the end of the body, flushing any unterminated final line.
    pub fn finish(&mut self) -> Vec<SsePayload> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        if !self.pending.is_empty() {
            // A truncated sequence at end of input decodes to one replacement char.
            self.pending.clear();
            self.buffer.push(char::REPLACEMENT_CHARACTER);
        }
        let line = std::mem::take(&mut self.buffer);
        self.process_line(&line, &mut out);
        self.done = true;
        out
    }

    /// Append `chunk` to the text buffer, holding back a trailing partial codepoint.
    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    self.buffer.push_str(
                        std::str::from_utf8(&self.pending[start..valid_end]).unwrap_or_default(),
                    );
                    start = valid_end;
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start += len;
                        }
                        // Incomplete sequence at the end: wait for the next chunk.
                        None => break,
                    }
                }
            }
        }
        let _ = self.pending.drain(..start);
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<SsePayload>) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return;
        }
        let Some(data) = extract_data(line) else {
            trace!(line = %line, "Ignoring non-data SSE line");
            return;
        };
        if data.trim() == "[DONE]" {
            self.done = true;
            out.push(SsePayload::Done);
        } else if !data.trim().is_empty() {
            out.push(SsePayload::Data(data.to_string()));
        }
    }
}

/// Extract the payload of a `data:` field line.
fn extract_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
}

/// Decode a body stream into payloads.
///
/// When the body fails, everything buffered so far is flushed and yielded
/// before the error; the stream ends after the error or after `[DONE]`.
pub fn decode_stream<S>(body: S) -> impl Stream<Item = Result<SsePayload>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin,
{
    struct DecodeState<S> {
        body: S,
        decoder: SseDecoder,
        queue: VecDeque<SsePayload>,
        failure: Option<crate::error::ChatError>,
        ended: bool,
    }

    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        queue: VecDeque::new(),
        failure: None,
        ended: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(payload) = state.queue.pop_front() {
                return Some((Ok(payload), state));
            }
            if let Some(err) = state.failure.take() {
                state.ended = true;
                return Some((Err(err), state));
            }
            if state.ended || state.decoder.is_done() {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.queue.extend(state.decoder.feed(&chunk)),
                Some(Err(err)) => {
                    state.queue.extend(state.decoder.finish());
                    state.failure = Some(err);
                }
                None => {
                    state.queue.extend(state.decoder.finish());
                    state.ended = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChatError, TransportKind};

    fn data(s: &str) -> SsePayload {
        SsePayload::Data(s.to_string())
    }

    #[test]
    fn single_chunk_single_event() {
        let mut decoder = SseDecoder::new();
        let out = decoder.feed(b"data: {\"event\":\"ping\"}\n\n");
        assert_eq!(out, vec![data("{\"event\":\"ping\"}")]);
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let out = decoder.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(out, vec![data("{\"a\":1}"), data("{\"b\":2}")]);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"par").is_empty());
        assert_eq!(decoder.feed(b"tial\":true}\n"), vec![data("{\"partial\":true}")]);
    }

    #[test]
    fn multibyte_codepoint_split_across_chunks() {
        let text = "data: {\"answer\":\"你好\"}\n".as_bytes();
        // Split inside the three-byte encoding of the first character.
        let split = text.iter().position(|&b| b >= 0x80).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&text[..split]).is_empty());
        assert_eq!(decoder.feed(&text[split..]), vec![data("{\"answer\":\"你好\"}")]);
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = SseDecoder::new();
        let out = decoder.feed(b"data: a\xffb\n");
        assert_eq!(out, vec![data("a\u{FFFD}b")]);
    }

    #[test]
    fn done_sentinel_terminates_decoder() {
        let mut decoder = SseDecoder::new();
        let out = decoder.feed(b"data: {\"x\":1}\n\ndata: [DONE]\n\ndata: {\"late\":1}\n");
        assert_eq!(out, vec![data("{\"x\":1}"), SsePayload::Done]);
        assert!(decoder.is_done());
        assert!(decoder.feed(b"data: {\"y\":2}\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn ignores_comments_blank_and_other_fields() {
        let mut decoder = SseDecoder::new();
        let out = decoder.feed(b": keep-alive\n\nevent: message\nid: 7\n\ndata:{\"v\":1}\r\n\r\n");
        assert_eq!(out, vec![data("{\"v\":1}")]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"trailing\":true}").is_empty());
        assert_eq!(decoder.finish(), vec![data("{\"trailing\":true}")]);
        assert!(decoder.is_done());
    }

    #[test]
    fn finish_replaces_truncated_codepoint() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: ok\xe4\xbd").is_empty());
        assert_eq!(decoder.finish(), vec![data("ok\u{FFFD}")]);
    }

    #[tokio::test]
    async fn stream_flushes_buffer_before_error() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n\ndata: {\"b\"")),
            Ok(Bytes::from_static(b":2}")),
            Err(ChatError::transport(TransportKind::ConnectionReset, "reset by peer")),
            Ok(Bytes::from_static(b"data: {\"never\":1}\n")),
        ];
        let items: Vec<Result<SsePayload>> =
            decode_stream(futures::stream::iter(chunks)).collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok(data("{\"a\":1}")));
        assert_eq!(items[1], Ok(data("{\"b\":2}")));
        assert!(matches!(
            items[2],
            Err(ChatError::Transport {
                kind: TransportKind::ConnectionReset,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn stream_stops_at_done() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
            Ok(Bytes::from_static(b"data: {\"b\":2}\n")),
        ];
        let items: Vec<Result<SsePayload>> =
            decode_stream(futures::stream::iter(chunks)).collect().await;
        assert_eq!(items, vec![Ok(data("{\"a\":1}")), Ok(SsePayload::Done)]);
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let chunks: Vec<Result<Bytes>> = vec![];
        let items: Vec<Result<SsePayload>> =
            decode_stream(futures::stream::iter(chunks)).collect().await;
        assert!(items.is_empty());
    }
}
