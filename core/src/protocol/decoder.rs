use crate::prelude::{DecoderConfig, DecoderError};
use crate::protocol::message::MeterMessage;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Radio parameters a protocol needs from the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    pub center_freq: u32,
    /// Symbols per second.
    pub data_rate: u32,
    pub symbol_length: usize,
    /// Whole packet, preamble included, in symbols.
    pub packet_symbols: usize,
}

/// Extracts one protocol's messages from a window of raw I/Q bytes.
pub trait ProtocolParser: Send {
    fn name(&self) -> &str;
    fn params(&self) -> ProtocolParams;
    fn parse(&mut self, window: &[u8], out: &mut Vec<MeterMessage>);
}

/// Lazy, finite message sequence produced for one block.
pub type Messages<'a> = Box<dyn Iterator<Item = MeterMessage> + Send + 'a>;

/// Opaque decoding capability driven by the pipeline.
pub trait Decoder: Send {
    fn config(&self) -> &DecoderConfig;
    fn decode<'a>(&'a mut self, block: &'a [u8]) -> Messages<'a>;
}

pub type ParserFactory = fn(usize) -> Box<dyn ProtocolParser>;

/// Protocol name to parser constructor lookup.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    factories: BTreeMap<String, ParserFactory>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, factory: ParserFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn new_parser(
        &self,
        name: &str,
        symbol_length: usize,
    ) -> Result<Box<dyn ProtocolParser>, DecoderError> {
        if symbol_length == 0 {
            return Err(DecoderError::InvalidSymbolLength(symbol_length));
        }
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DecoderError::UnknownProtocol(name.to_string()))?;
        Ok(factory(symbol_length))
    }
}

/// Runs every registered parser over each block plus the tail of the previous one.
pub struct ProtocolDecoder {
    registry: Arc<ParserRegistry>,
    parsers: Vec<Box<dyn ProtocolParser>>,
    config: DecoderConfig,
    allocated: bool,
    window: Vec<u8>,
}

impl ProtocolDecoder {
    pub fn new(registry: Arc<ParserRegistry>) -> Self {
        Self {
            registry,
            parsers: Vec::new(),
            config: DecoderConfig::default(),
            allocated: false,
            window: Vec::new(),
        }
    }

    pub fn register_protocol(
        &mut self,
        name: &str,
        symbol_length: usize,
    ) -> Result<(), DecoderError> {
        let parser = self.registry.new_parser(name, symbol_length)?;
        self.parsers.push(parser);
        self.allocated = false;
        Ok(())
    }

    /// Sizes the decode window and derives the receiver configuration.
    pub fn allocate(&mut self) -> Result<DecoderConfig, DecoderError> {
        let first = self.parsers.first().ok_or(DecoderError::NoProtocols)?.params();
        let rate = sample_rate(&first)?;

        let mut packet_length = 0;
        for parser in &self.parsers {
            let params = parser.params();
            let needed = sample_rate(&params)?;
            if needed != rate {
                return Err(DecoderError::IncompatibleProtocols(format!(
                    "{} needs {} samples/s, {} needs {}",
                    parser.name(),
                    needed,
                    self.parsers[0].name(),
                    rate
                )));
            }
            if params.center_freq != first.center_freq {
                warn!(
                    "{} prefers {} Hz, tuning to {} Hz",
                    parser.name(),
                    params.center_freq,
                    first.center_freq
                );
            }
            packet_length = packet_length.max(params.packet_symbols * params.symbol_length);
        }

        let block_samples = packet_length.max(1).next_power_of_two();
        let config = DecoderConfig {
            center_freq: first.center_freq,
            sample_rate: rate,
            symbol_length: first.symbol_length,
            packet_length,
            block_size: block_samples * 2,
            history_length: packet_length * 2,
        };

        self.window = vec![0; config.history_length + config.block_size];
        self.config = config;
        self.allocated = true;
        info!(
            "decoder allocated: protocols={:?} center_freq={} sample_rate={} block_size={}",
            self.parsers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            config.center_freq,
            config.sample_rate,
            config.block_size
        );
        Ok(config)
    }

    /// Configuration produced by [`ProtocolDecoder::allocate`].
    pub fn allocated(&self) -> Result<&DecoderConfig, DecoderError> {
        if self.allocated {
            Ok(&self.config)
        } else {
            Err(DecoderError::NotAllocated)
        }
    }

    fn slide_window(&mut self, block: &[u8]) {
        let len = self.window.len();
        let keep = len.saturating_sub(block.len());
        self.window.copy_within(len - keep.., 0);
        self.window.truncate(keep);
        self.window.extend_from_slice(block);
    }
}

fn sample_rate(params: &ProtocolParams) -> Result<u32, DecoderError> {
    u32::try_from(params.symbol_length)
        .ok()
        .and_then(|len| len.checked_mul(params.data_rate))
        .ok_or(DecoderError::InvalidSymbolLength(params.symbol_length))
}

impl Decoder for ProtocolDecoder {
    fn config(&self) -> &DecoderConfig {
        &self.config
    }

    fn decode<'a>(&'a mut self, block: &'a [u8]) -> Messages<'a> {
        if !self.allocated {
            return Box::new(std::iter::empty());
        }
        self.slide_window(block);
        let window = &self.window[..];
        Box::new(self.parsers.iter_mut().flat_map(move |parser| {
            let mut found = Vec::new();
            parser.parse(window, &mut found);
            found.into_iter()
        }))
    }
}
