//! Server-Sent Events parsing for streamed chat completions.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;

use crate::traits::BackendError;

/// Turns a chunked byte stream into the payloads of its `data:` lines.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across chunks decode correctly. The stream ends at the
/// `[DONE]` marker. A body that ends before `[DONE]` yields a final
/// [`BackendError::Decode`], so a cut-off reply is never taken as complete.
pub struct SseStreamParser<S> {
    inner: S,
    buffer: Vec<u8>,
    done: bool,
    body_ended: bool,
}

impl<S, B> SseStreamParser<S>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: Vec::new(),
            done: false,
            body_ended: false,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Payload of a `data:` line; `None` for comments, blanks, and other fields.
    pub fn parse_sse_data(line: &str) -> Option<&str> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            return None;
        }
        trimmed
            .strip_prefix("data:")
            .map(str::trim_start)
    }

    pub fn is_done_marker(data: &str) -> bool {
        data.trim() == "[DONE]"
    }

    /// Classify one line: `Some(Some(data))` to emit, `Some(None)` at
    /// `[DONE]`, `None` to skip.
    fn classify(line: &str) -> Option<Option<String>> {
        let data = Self::parse_sse_data(line)?;
        if Self::is_done_marker(data) {
            Some(None)
        } else {
            Some(Some(data.to_string()))
        }
    }
}

impl<S, B> Stream for SseStreamParser<S>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<String, BackendError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }
            if self.body_ended {
                self.done = true;
                return Poll::Ready(Some(Err(BackendError::Decode(
                    "stream ended before [DONE]".to_string(),
                ))));
            }

            if let Some(line) = self.next_line() {
                match Self::classify(&line) {
                    Some(Some(data)) => return Poll::Ready(Some(Ok(data))),
                    Some(None) => self.done = true,
                    None => {}
                }
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(chunk.as_ref());
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(BackendError::from(e))));
                }
                Poll::Ready(None) => {
                    self.body_ended = true;
                    let rest = std::mem::take(&mut self.buffer);
                    if rest.is_empty() {
                        continue;
                    }
                    // Last line had no trailing newline.
                    let line = String::from_utf8_lossy(&rest).into_owned();
                    match Self::classify(&line) {
                        Some(Some(data)) => return Poll::Ready(Some(Ok(data))),
                        Some(None) => {
                            self.done = true;
                            return Poll::Ready(None);
                        }
                        None => {}
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
