//! In-memory transport and decoder doubles.

use crate::prelude::DecoderConfig;
use crate::processing::dispatcher::Handoff;
use crate::protocol::{Decoder, Messages, MeterMessage, Scm};
use crate::transport::RadioTransport;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const BLOCK_SIZE: usize = 8;

pub enum Step {
    Block(Vec<u8>),
    Fail(io::ErrorKind),
}

/// Plays back a fixed script of reads, then idles or reports EOF.
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    idle_when_done: bool,
    pub reads: Arc<AtomicUsize>,
    pub tuning: Arc<Mutex<Vec<(&'static str, u32)>>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            idle_when_done: true,
            reads: Arc::new(AtomicUsize::new(0)),
            tuning: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn eof_when_done(mut self) -> Self {
        self.idle_when_done = false;
        self
    }
}

/// Block whose non-zero bytes become endpoint ids.
pub fn block_of(ids: &[u8]) -> Step {
    let mut bytes = vec![0; BLOCK_SIZE];
    bytes[..ids.len()].copy_from_slice(ids);
    Step::Block(bytes)
}

#[async_trait]
impl RadioTransport for ScriptedTransport {
    fn set_deadline(&mut self, _deadline: Instant) {}

    async fn read_full(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self.steps.pop_front() {
            Some(Step::Block(bytes)) => {
                buf.copy_from_slice(&bytes[..buf.len()]);
                self.reads.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
            None if self.idle_when_done => std::future::pending().await,
            None => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
        }
    }

    async fn set_center_freq(&mut self, hz: u32) -> io::Result<()> {
        self.tuning.lock().unwrap().push(("center_freq", hz));
        Ok(())
    }

    async fn set_sample_rate(&mut self, hz: u32) -> io::Result<()> {
        self.tuning.lock().unwrap().push(("sample_rate", hz));
        Ok(())
    }

    async fn set_gain_mode(&mut self, manual: bool) -> io::Result<()> {
        self.tuning.lock().unwrap().push(("gain_mode", u32::from(manual)));
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Emits one SCM message per non-zero byte, in block order.
pub struct ByteDecoder {
    config: DecoderConfig,
}

impl ByteDecoder {
    pub fn new() -> Self {
        Self {
            config: DecoderConfig {
                center_freq: 912_600_155,
                sample_rate: 2_359_296,
                block_size: BLOCK_SIZE,
                ..Default::default()
            },
        }
    }
}

impl Decoder for ByteDecoder {
    fn config(&self) -> &DecoderConfig {
        &self.config
    }

    fn decode<'a>(&'a mut self, block: &'a [u8]) -> Messages<'a> {
        Box::new(block.iter().filter(|&&b| b != 0).map(|&b| scm(b.into())))
    }
}

pub fn scm(id: u32) -> MeterMessage {
    MeterMessage::Scm(Scm {
        id,
        ert_type: 12,
        tamper_phy: 0,
        tamper_enc: 0,
        consumption: id * 100,
        checksum: 0x5A5A,
    })
}

/// Accepts every offer as soon as it arrives; yields the endpoint ids once the channel closes.
pub fn accept_all(mut rx: mpsc::Receiver<Handoff>) -> JoinHandle<Vec<u32>> {
    tokio::spawn(async move {
        let mut ids = Vec::new();
        while let Some(handoff) = rx.recv().await {
            if let Some(msg) = handoff.accept() {
                ids.push(msg.endpoint_id());
            }
        }
        ids
    })
}
