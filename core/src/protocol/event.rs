use crate::protocol::message::MeterMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Read};

/// Normalized reading handed to the event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerEvent {
    pub timestamp: DateTime<Utc>,
    pub endpoint_id: u32,
    pub meter_type: String,
    pub consumption: u64,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl MeterMessage {
    pub fn to_event(&self, timestamp: DateTime<Utc>) -> PowerEvent {
        PowerEvent {
            timestamp,
            endpoint_id: self.endpoint_id(),
            meter_type: self.msg_type().to_string(),
            consumption: self.consumption(),
            fields: self.fields(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("writing event: {0}")]
    Io(#[from] io::Error),
    #[error("encoding event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Downstream persistence for normalized events.
pub trait EventSink: Send {
    fn add_event(&mut self, event: &PowerEvent) -> Result<(), SinkError>;
}

#[derive(thiserror::Error, Debug)]
pub enum StreamError<E> {
    #[error("decoding event stream: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("handling event: {0}")]
    Handler(E),
}

/// Feeds every event of a concatenated JSON stream to `handler`.
///
/// Stops at the first malformed event or the first handler error.
pub fn parse_event_stream<R, F, E>(reader: R, mut handler: F) -> Result<(), StreamError<E>>
where
    R: Read,
    F: FnMut(PowerEvent) -> Result<(), E>,
{
    let stream = serde_json::Deserializer::from_reader(reader).into_iter::<PowerEvent>();
    for event in stream {
        handler(event?).map_err(StreamError::Handler)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ScmPlus;
    use chrono::TimeZone;

    const EVENTS: &str = include_str!("../../testdata/events.json");

    #[test]
    fn parse_event_stream_reads_every_event() {
        let mut events = Vec::new();
        parse_event_stream(EVENTS.as_bytes(), |evt| {
            events.push(evt);
            Ok::<_, ()>(())
        })
        .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].meter_type, "scm");
        assert_eq!(events[1].consumption, 88110);
    }

    #[test]
    fn parse_event_stream_stops_on_handler_error() {
        let mut seen = 0;
        let result = parse_event_stream(EVENTS.as_bytes(), |_| {
            seen += 1;
            Err("store offline")
        });

        assert!(matches!(result, Err(StreamError::Handler("store offline"))));
        assert_eq!(seen, 1);
    }

    #[test]
    fn parse_event_stream_rejects_garbage() {
        let result = parse_event_stream(&b"{\"timestamp\": 3}"[..], |_| Ok::<_, ()>(()));
        assert!(matches!(result, Err(StreamError::Decode(_))));
    }

    #[test]
    fn to_event_normalizes_scm_plus() {
        let msg = MeterMessage::ScmPlus(ScmPlus {
            frame_sync: 0x16A3,
            protocol_id: 0x1E,
            endpoint_type: 0xAB,
            endpoint_id: 70_000_001,
            consumption: 42,
            tamper: 0,
            packet_crc: 0x9911,
        });
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let event = msg.to_event(timestamp);

        assert_eq!(event.meter_type, "scm+");
        assert_eq!(event.endpoint_id, 70_000_001);
        assert_eq!(event.consumption, 42);
        assert_eq!(event.fields["packetcrc"], serde_json::json!(0x9911));
        assert_eq!(event.timestamp, timestamp);
    }
}
