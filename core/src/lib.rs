//! Ingestion core for the Rust power meter monitor.
//!
//! A radio front-end streams raw I/Q samples; the pipeline cuts them into
//! pooled sample blocks, decodes meter transmissions, drops detections
//! repeated across adjacent blocks and offers unique messages to a consumer,
//! dropping any it does not accept within a bounded wait.

pub mod prelude;
pub mod processing;
pub mod protocol;
pub mod telemetry;
pub mod transport;

pub use prelude::{DecoderConfig, DecoderError, PipelineError, PipelineResult};
pub use processing::{consumer_channel, Handoff, Meter};
pub use protocol::{Decoder, MeterMessage, PowerEvent};
pub use telemetry::{MeterStatus, StatusTracker};
