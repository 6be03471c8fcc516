use async_stream::try_stream;
use tokio_stream::{Stream, StreamExt};

use crate::Result;

/// Split a chunked HTTP body into complete, non-empty lines.
///
/// Splitting happens on raw bytes; `\n` never occurs inside a multi-byte
/// UTF-8 sequence, so a chunk boundary cannot corrupt a character.
pub(crate) fn response_lines(resp: reqwest::Response) -> impl Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut body = Box::pin(resp.bytes_stream());
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            buf.extend_from_slice(&chunk);
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if !line.is_empty() {
                    yield line;
                }
            }
        }
        let rest = String::from_utf8_lossy(&buf).trim().to_string();
        if !rest.is_empty() {
            yield rest;
        }
    }
}

/// Payload of an SSE `data:` line, if `line` is one.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_data_strips_prefix() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data("event: message_start"), None);
    }
}
