use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Response;
use std::pin::Pin;
use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};
use thiserror::Error;

const EVENT_DELIMITER: &str = "\n\n";
const FIELD_SEPARATOR: char = ':';

/// Possible errors that can occur while parsing SSE events
#[derive(Error, Debug)]
pub enum EventError {
    #[error("failed to parse retry value: {0}")]
    RetryParse(std::num::ParseIntError),
    #[error("invalid event format: event contains no data")]
    InvalidFormat,
}

impl From<std::num::ParseIntError> for EventError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::RetryParse(err)
    }
}

/// Represents a Server-Sent Event (SSE) with its associated fields.
///
/// Each event can contain:
/// - An optional ID
/// - An optional event type
/// - The event data (required)
/// - An optional retry timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Unique identifier for the event
    pub id: Option<String>,
    /// Type of the event (defaults to "message" in SSE spec)
    pub event_type: Option<String>,
    /// The event payload
    pub data: String,
    /// Reconnection time in case of connection failure
    pub retry: Option<Duration>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event {{ id: {:?}, event_type: {:?}, data: {}, retry: {:?} }}",
            self.id, self.event_type, self.data, self.retry
        )
    }
}

impl Event {
    /// Creates a new empty Event.
    pub const fn new() -> Self {
        Self {
            id: None,
            event_type: None,
            data: String::new(),
            retry: None,
        }
    }

    /// Parses an SSE event from a string slice.
    ///
    /// Returns `Err(EventError::InvalidFormat)` for blocks without any `data`
    /// field, which covers keep-alive comments.
    pub fn parse(input: &str) -> Result<Self, EventError> {
        let mut event = Self::new();
        let mut data_lines = Vec::new();

        for line in input.lines() {
            if line.is_empty() || line.starts_with(FIELD_SEPARATOR) {
                continue;
            }

            let (field, value) = match line.split_once(FIELD_SEPARATOR) {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "id" => event.id = Some(value.to_string()),
                "event" => event.event_type = Some(value.to_string()),
                "data" => data_lines.push(value),
                "retry" => {
                    let ms = value.parse::<u64>()?;
                    event.retry = Some(Duration::from_millis(ms));
                }
                _ => {} // Ignore unknown fields as per SSE spec
            }
        }

        if data_lines.is_empty() {
            return Err(EventError::InvalidFormat);
        }

        event.data = data_lines.join("\n");
        Ok(event)
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, reqwest::Error>> + Send>>;

/// Extension trait for converting a Response into a Stream of SSE Events.
pub trait EventSourceExt {
    /// Converts the response body into a Stream of Events.
    fn events(self) -> EventStream;
}

impl EventSourceExt for Response {
    fn events(self) -> EventStream {
        parse_events(self.bytes_stream())
    }
}

/// Splits a raw byte stream into SSE events.
///
/// Bytes are buffered until a blank line closes an event, so multi-byte
/// characters split across network reads are decoded intact.
pub fn parse_events<S>(mut stream: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    Box::pin(try_stream! {
        let mut pending: Vec<u8> = Vec::with_capacity(1024);
        let mut buffer = String::with_capacity(1024);

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);

            // Only decode up to the last complete line
            if let Some(line_end) = pending.iter().rposition(|b| *b == b'\n') {
                let complete: Vec<u8> = pending.drain(..=line_end).collect();
                buffer.push_str(&String::from_utf8_lossy(&complete).replace("\r\n", "\n"));
            }

            // Process complete events
            while let Some(event_end) = buffer.find(EVENT_DELIMITER) {
                let event_str = &buffer[..event_end];
                if let Ok(event) = Event::parse(event_str) {
                    yield event;
                }
                buffer.drain(..event_end + EVENT_DELIMITER.len());
            }
        }

        // Process any remaining data in the buffer
        buffer.push_str(&String::from_utf8_lossy(&pending));
        if !buffer.trim().is_empty() {
            if let Ok(event) = Event::parse(&buffer) {
                yield event;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(
        parts: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p))))
    }

    #[test]
    fn test_event_parse_empty() {
        assert!(matches!(Event::parse(""), Err(EventError::InvalidFormat)));
    }

    #[test]
    fn test_event_parse_no_data() {
        assert!(matches!(
            Event::parse("id: 123\nevent: test\n"),
            Err(EventError::InvalidFormat)
        ));
    }

    #[test]
    fn test_event_parse_comment_only() {
        assert!(matches!(
            Event::parse(": keep-alive\n"),
            Err(EventError::InvalidFormat)
        ));
    }

    #[test]
    fn test_event_parse_simple() {
        let event = Event::parse("data: hello\n\n").unwrap();
        assert_eq!(event.data, "hello");
        assert_eq!(event.event_type, None);
        assert!(event.id.is_none());
    }

    #[test]
    fn test_event_parse_complex() {
        let input = "id: 123\nevent: endpoint\ndata: line1\ndata: line2\nretry: 5000\n\n";
        let event = Event::parse(input).unwrap();
        assert_eq!(event.id, Some("123".to_string()));
        assert_eq!(event.event_type.as_deref(), Some("endpoint"));
        assert_eq!(event.data, "line1\nline2");
        assert_eq!(event.retry, Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_event_parse_keeps_colons_in_data() {
        let event = Event::parse("data: {\"a\":1}").unwrap();
        assert_eq!(event.data, "{\"a\":1}");
    }

    #[test]
    fn test_event_parse_invalid_retry() {
        let input = "retry: invalid\ndata: test\n\n";
        assert!(matches!(
            Event::parse(input),
            Err(EventError::RetryParse(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_events_across_split_reads() {
        let stream = byte_stream(vec![
            b"event: endpoint\r\ndata: /messages?session=1\r\n\r\nda",
            b"ta: {\"caf\xc3",
            b"\xa9\":true}\n\n",
            b"data: [DONE]",
        ]);

        let events: Vec<Event> = parse_events(stream)
            .map(|e| e.expect("event"))
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type.as_deref(), Some("endpoint"));
        assert_eq!(events[0].data, "/messages?session=1");
        assert_eq!(events[1].data, "{\"café\":true}");
        assert_eq!(events[2].data, "[DONE]");
    }
}
