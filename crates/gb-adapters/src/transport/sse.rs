//! Server-sent events over a chunked HTTP body.

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Incremental decoder yielding the `data:` payload of each complete event.
///
/// Chunks may split anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            if let Some(data) = data_of(&String::from_utf8_lossy(&block)) {
                frames.push(data);
            }
        }
        frames
    }
}

/// Joins the `data:` lines of one event block; comments and other fields are ignored.
fn data_of(block: &str) -> Option<String> {
    let lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Why a driven stream stopped without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server finished the body.
    Closed,
    /// The frame handler asked to stop.
    Declined,
}

/// Feeds every frame of `stream` to `on_frame` in order.
///
/// Fails with the transport error if the body breaks. There is no reconnect.
pub async fn drive<F, Fut>(mut stream: ByteStream, mut on_frame: F) -> Result<StreamEnd>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut decoder = SseDecoder::new();
    while let Some(chunk) = stream.next().await {
        for frame in decoder.push(&chunk?) {
            if !on_frame(frame).await {
                return Ok(StreamEnd::Declined);
            }
        }
    }
    Ok(StreamEnd::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use futures_util::stream;
    use gb_core::GameKind;

    #[test]
    fn test_frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: logLine\ndata: {\"msg\":").is_empty());
        let frames = decoder.push(b"\"a\"}\n\ndata: second\r\n\r\n: keepalive\n\n");
        assert_eq!(frames, [r#"{"msg":"a"}"#, "second"]);
    }

    #[test]
    fn test_multi_line_data_is_joined() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b"data: one\ndata: two\n\n"), ["one\ntwo"]);
    }

    #[tokio::test]
    async fn test_drive_stops_on_transport_error() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err(AdapterError::transport(GameKind::SevenDaysToDie, "reset")),
            Ok(Bytes::from_static(b"data: b\n\n")),
        ];
        let mut seen = Vec::new();
        let result = drive(Box::pin(stream::iter(chunks)), |frame| {
            seen.push(frame);
            async { true }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(seen, ["a"]);
    }

    #[tokio::test]
    async fn test_drive_stops_when_handler_declines() -> anyhow::Result<()> {
        let body = Bytes::from_static(b"data: a\n\ndata: b\n\n");
        let mut count = 0;
        let end = drive(Box::pin(stream::iter(vec![Ok(body)])), |_| {
            count += 1;
            async { false }
        })
        .await?;
        assert_eq!(end, StreamEnd::Declined);
        assert_eq!(count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_drive_reports_body_closed() -> anyhow::Result<()> {
        let body = Bytes::from_static(b"data: a\n\ndata: partial");
        let mut seen = Vec::new();
        let end = drive(Box::pin(stream::iter(vec![Ok(body)])), |frame| {
            seen.push(frame);
            async { true }
        })
        .await?;
        assert_eq!(end, StreamEnd::Closed);
        assert_eq!(seen, ["a"]);
        Ok(())
    }
}
