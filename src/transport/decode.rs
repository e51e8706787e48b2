//! Streaming decoders (Bytes -> JSON Value)
//!
//! These decode framing only (SSE, NDJSON); each driver interprets the decoded
//! events itself.

use crate::{BoxStream, Error};
use bytes::{Buf, Bytes, BytesMut};
use futures::{stream, StreamExt};
use serde_json::Value;

const SSE_DONE: &str = "[DONE]";

/// Decode a Server-Sent Events body into the JSON payloads of its `data:` lines.
///
/// Frames are split on blank lines. `event:`/`id:` lines and comments are skipped,
/// and the stream ends at `[DONE]` or EOF. Bytes stay buffered until a whole frame
/// has arrived, so a UTF-8 sequence split across chunks decodes intact.
pub fn sse_values(input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
    let stream = stream::unfold(
        (input, BytesMut::new(), false),
        |(mut input, mut buf, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(frame) = take_sse_frame(&mut buf) {
                    match parse_sse_frame(&frame) {
                        SseFrame::Done => return None,
                        SseFrame::Data(v) => return Some((Ok(v), (input, buf, false))),
                        SseFrame::Skip => continue,
                    }
                }

                match input.next().await {
                    Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                    Some(Err(e)) => return Some((Err(e), (input, buf, true))),
                    None => {
                        // EOF: the last frame may lack its trailing blank line.
                        return match parse_sse_frame(&buf) {
                            SseFrame::Data(v) => Some((Ok(v), (input, BytesMut::new(), true))),
                            _ => None,
                        };
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

/// Split off the bytes before the first blank line (`\n\n` or `\r\n\r\n`),
/// consuming the blank line itself.
fn take_sse_frame(buf: &mut BytesMut) -> Option<BytesMut> {
    let mut start = 0;
    while let Some(pos) = buf[start..].iter().position(|&b| b == b'\n') {
        let line = &buf[start..start + pos];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            let frame = buf.split_to(start);
            buf.advance(pos + 1);
            return Some(frame);
        }
        start += pos + 1;
    }
    None
}

enum SseFrame {
    Data(Value),
    Done,
    Skip,
}

fn parse_sse_frame(frame: &[u8]) -> SseFrame {
    let Ok(frame) = std::str::from_utf8(frame) else {
        return SseFrame::Skip;
    };
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data.is_empty() {
        return SseFrame::Skip;
    }
    let payload = data.join("\n");
    if payload.trim() == SSE_DONE {
        return SseFrame::Done;
    }
    match serde_json::from_str(payload.trim()) {
        Ok(v) => SseFrame::Data(v),
        Err(_) => SseFrame::Skip,
    }
}

/// NDJSON / JSONL decoder (one JSON object per line).
pub fn ndjson_values(input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
    let stream = stream::unfold(
        (input, BytesMut::new()),
        |(mut input, mut buf)| async move {
            loop {
                if let Some(idx) = buf.iter().position(|&b| b == b'\n') {
                    let line = buf.split_to(idx + 1);
                    if is_blank(&line) {
                        continue;
                    }
                    return Some((parse_line(&line), (input, buf)));
                }

                match input.next().await {
                    Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                    Some(Err(e)) => return Some((Err(e), (input, buf))),
                    None => {
                        if is_blank(&buf) {
                            return None;
                        }
                        return Some((parse_line(&buf), (input, BytesMut::new())));
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn parse_line(line: &[u8]) -> crate::Result<Value> {
    serde_json::from_slice(line).map_err(Error::Serialization)
}
