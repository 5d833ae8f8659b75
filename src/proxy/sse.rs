//! Server-Sent Events parsing for backend responses
//!
//! The backend may answer a POST with `text/event-stream`. Each event's
//! `data:` lines carry one JSON-RPC message; those messages are forwarded
//! to the bridge's outbound channel as they complete.
//!
//! - `event: ping` and `data: [PING]` events are dropped.
//! - Events with no data are dropped.
//! - `\r\n` line endings are accepted.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

/// One parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field
    pub event: Option<String>,
    /// `id:` field
    pub id: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

impl SseEvent {
    /// Whether the event is a keep-alive that carries no message.
    pub fn is_ping(&self) -> bool {
        self.event
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("ping"))
            || self.data.eq_ignore_ascii_case("[ping]")
    }
}

/// Parses the text between two blank lines into an event.
pub fn parse_event(block: &str) -> SseEvent {
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    event.data = data_lines.join("\n");
    event
}

/// Reads an SSE body to its end and forwards each message payload.
///
/// `inspect` sees every payload before it is forwarded. Returns the number
/// of messages forwarded. A read error ends the stream early; whatever was
/// complete before it has already been forwarded.
pub async fn forward_sse_stream<S, F>(
    byte_stream: S,
    tx: &mpsc::UnboundedSender<String>,
    mut inspect: F,
) -> usize
where
    S: Stream<Item = reqwest::Result<Bytes>>,
    F: FnMut(&str),
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut forwarded = 0;

    tokio::pin!(byte_stream);
    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "Backend event stream ended with an error");
                break;
            }
        };
        buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        while let Some(pos) = find_event_boundary(&buffer) {
            let block: Vec<u8> = buffer.drain(..pos + 2).collect();
            forwarded += forward_block(&block[..pos], tx, &mut inspect);
        }
    }

    if !buffer.is_empty() {
        forwarded += forward_block(&buffer, tx, &mut inspect);
    }
    forwarded
}

fn find_event_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn forward_block<F: FnMut(&str)>(
    block: &[u8],
    tx: &mpsc::UnboundedSender<String>,
    inspect: &mut F,
) -> usize {
    let Ok(text) = std::str::from_utf8(block) else {
        tracing::warn!("Dropping backend event that is not valid UTF-8");
        return 0;
    };
    let event = parse_event(text);
    if event.is_ping() || event.data.is_empty() {
        return 0;
    }
    inspect(&event.data);
    match tx.send(event.data) {
        Ok(()) => 1,
        Err(_) => 0,
    }
}
