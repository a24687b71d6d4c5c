//! Server-sent-event line decoding.
//!
//! A response body arrives as arbitrary byte chunks. [`LineBuffer`] splits
//! them on `\n` while carrying a partial trailing line over to the next read;
//! splitting happens on bytes, before UTF-8 decoding, so a multi-byte
//! character cut in half by the transport is reassembled intact.
//! [`payloads`] lifts that into a lazy stream of `data:` payloads that stops
//! at the end of the body, on the first transport error, or when the
//! cancellation token fires.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};

/// Raw response body: a sequence of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Decoded `data:` payloads, in arrival order.
pub type PayloadStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

const DATA_MARKER: &str = "data:";

/// Accumulates body bytes and hands back complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line it finishes.
    /// Line terminators (`\n`, `\r\n`) are stripped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // earlier bytes were already scanned and hold no terminator
        let scanned = self.pending.len();
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        for (offset, _) in self.pending[scanned..].iter().enumerate().filter(|(_, b)| **b == b'\n') {
            let end = scanned + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Flush an unterminated final line once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }

    /// Bytes still waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Extract the trimmed payload of a `data:` line.
///
/// Returns `None` for blank lines, comments, `event:`/`id:` fields and data
/// lines with an empty payload.
pub fn data_payload(line: &str) -> Option<&str> {
    let payload = line.trim_start().strip_prefix(DATA_MARKER)?.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

struct PayloadState {
    body: ByteStream,
    lines: LineBuffer,
    ready: VecDeque<String>,
    cancel: CancellationToken,
    exhausted: bool,
    terminated: bool,
}

impl PayloadState {
    fn enqueue(&mut self, line: &str) {
        if let Some(payload) = data_payload(line) {
            self.ready.push_back(payload.to_string());
        }
    }
}

/// Turn a response body into a stream of `data:` payloads.
///
/// The token is checked before every yielded payload and raced against every
/// body read; once it fires the stream yields a single [`ChatError::Aborted`]
/// and ends. A transport error is yielded once and also ends the stream.
pub fn payloads(body: ByteStream, cancel: CancellationToken) -> PayloadStream {
    let state = PayloadState {
        body,
        lines: LineBuffer::new(),
        ready: VecDeque::new(),
        cancel,
        exhausted: false,
        terminated: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if st.terminated {
                return None;
            }
            if st.cancel.is_cancelled() {
                st.terminated = true;
                st.ready.clear();
                return Some((Err(ChatError::Aborted), st));
            }
            if let Some(payload) = st.ready.pop_front() {
                return Some((Ok(payload), st));
            }
            if st.exhausted {
                return None;
            }

            let read = tokio::select! {
                biased;
                _ = st.cancel.cancelled() => None,
                chunk = st.body.next() => Some(chunk),
            };

            match read {
                // cancelled while waiting; reported at the top of the loop
                None => continue,
                Some(Some(Ok(bytes))) => {
                    for line in st.lines.push(&bytes) {
                        st.enqueue(&line);
                    }
                }
                Some(Some(Err(e))) => {
                    st.terminated = true;
                    st.ready.clear();
                    return Some((Err(e), st));
                }
                Some(None) => {
                    if let Some(line) = st.lines.finish() {
                        st.enqueue(&line);
                    }
                    st.exhausted = true;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(chunks.into_iter().map(|c| Ok(c.to_vec()))))
    }

    async fn collect(stream: PayloadStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn test_line_buffer_single_chunk_many_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"data: a\ndata: b\n");
        assert_eq!(lines, vec!["data: a", "data: b"]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_line_buffer_large_chunk_keeps_order_and_tail() {
        let mut chunk = Vec::new();
        for i in 0..10_000 {
            chunk.extend_from_slice(format!("data: {i}\n").as_bytes());
        }
        chunk.extend_from_slice(b"data: tail");
        let mut buf = LineBuffer::new();
        let lines = buf.push(&chunk);
        assert_eq!(lines.len(), 10_000);
        assert_eq!(lines[0], "data: 0");
        assert_eq!(lines[9_999], "data: 9999");
        assert_eq!(buf.pending_len(), "data: tail".len());
        assert_eq!(buf.push(b"\n"), vec!["data: tail".to_string()]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_line_buffer_carries_fragment() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"ans").is_empty());
        assert_eq!(buf.pending_len(), 11);
        let lines = buf.push(b"wer\":1}\n");
        assert_eq!(lines, vec!["data: {\"answer\":1}"]);
    }

    #[test]
    fn test_line_buffer_strips_crlf() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"data: x\r\n\r\n"), vec!["data: x", ""]);
    }

    #[test]
    fn test_line_buffer_multibyte_split_across_reads() {
        let text = "data: 产量\n".as_bytes();
        // cut inside the first three-byte character
        let (a, b) = text.split_at(7);
        let mut buf = LineBuffer::new();
        assert!(buf.push(a).is_empty());
        assert_eq!(buf.push(b), vec!["data: 产量"]);
    }

    #[test]
    fn test_line_buffer_finish_flushes_tail() {
        let mut buf = LineBuffer::new();
        buf.push(b"data: tail");
        assert_eq!(buf.finish().as_deref(), Some("data: tail"));
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_data_payload_variants() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:{\"a\":1}  "), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:   "), None);
        assert_eq!(data_payload(""), None);
        assert_eq!(data_payload("event: ping"), None);
        assert_eq!(data_payload(": keep-alive"), None);
    }

    #[tokio::test]
    async fn test_payloads_across_chunk_boundaries() {
        let stream = payloads(
            body(vec![b"data: one\n\nda", b"ta: two\n", b"event: x\ndata: three"]),
            CancellationToken::new(),
        );
        let got: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(got, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_payloads_cancelled_before_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let got = collect(payloads(body(vec![b"data: one\n"]), cancel)).await;
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0], Err(ChatError::Aborted)));
    }

    #[tokio::test]
    async fn test_payloads_cancel_unblocks_pending_read() {
        let cancel = CancellationToken::new();
        let pending: ByteStream = Box::pin(
            stream::iter(vec![Ok(b"data: first\n".to_vec())]).chain(stream::pending()),
        );
        let mut stream = payloads(pending, cancel.clone());
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");

        let trigger = cancel.clone();
        tokio::spawn(async move { trigger.cancel() });
        assert!(matches!(stream.next().await, Some(Err(ChatError::Aborted))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_payloads_transport_error_ends_stream() {
        let failing: ByteStream = Box::pin(stream::iter(vec![
            Ok(b"data: ok\n".to_vec()),
            Err(ChatError::Protocol("connection reset".into())),
            Ok(b"data: never\n".to_vec()),
        ]));
        let got = collect(payloads(failing, CancellationToken::new())).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].as_ref().unwrap(), "ok");
        assert!(got[1].is_err());
    }
}
