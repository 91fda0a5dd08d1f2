use serde::{Deserialize, Serialize};
use std::io;

/// Receiver and buffer geometry negotiated by an allocated decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub center_freq: u32,
    pub sample_rate: u32,
    pub symbol_length: usize,
    /// Longest registered packet, in samples.
    pub packet_length: usize,
    /// Size of one sample block in bytes (interleaved I/Q).
    pub block_size: usize,
    /// Bytes of the previous block kept in front of the next one.
    pub history_length: usize,
}

/// Startup failures of the decoder capability.
#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("no protocols registered")]
    NoProtocols,
    #[error("incompatible protocols: {0}")]
    IncompatibleProtocols(String),
    #[error("invalid symbol length: {0}")]
    InvalidSymbolLength(usize),
    #[error("decoder not allocated")]
    NotAllocated,
}

/// Errors that end (or prevent) block ingestion.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("connecting to radio front-end: {0}")]
    Connection(#[source] io::Error),
    #[error("configuring radio front-end: {0}")]
    Handshake(#[source] io::Error),
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error("reading sample block: {0}")]
    Read(#[source] io::Error),
    #[error("closing radio front-end: {0}")]
    Close(#[source] io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
