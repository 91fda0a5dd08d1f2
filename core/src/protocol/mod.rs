pub mod decoder;
pub mod event;
pub mod message;

pub use decoder::{
    Decoder, Messages, ParserFactory, ParserRegistry, ProtocolDecoder, ProtocolParams,
    ProtocolParser,
};
pub use event::{parse_event_stream, EventSink, PowerEvent, SinkError, StreamError};
pub use message::{Fingerprint, Idm, MeterMessage, NetIdm, Scm, ScmPlus, R900};
