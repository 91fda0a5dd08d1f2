use crate::prelude::{DecoderConfig, DecoderError, PipelineResult};
use crate::processing::buffer_pool::BlockPool;
use crate::processing::dispatcher::{Dispatcher, Handoff};
use crate::processing::receiver::Receiver;
use crate::processing::state::{PipelineState, StateCell};
use crate::processing::worker::{DecodeWorker, SharedBlocks};
use crate::protocol::Decoder;
use crate::telemetry::StatusTracker;
use crate::transport::{RadioTransport, RtlTcp};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Complete ingestion pipeline: one reader plus one worker per decoder.
pub struct Meter<T> {
    receiver: Receiver<T>,
    decoders: Vec<Box<dyn Decoder>>,
    pool: Arc<BlockPool>,
    status: Arc<StatusTracker>,
    state: Arc<StateCell>,
    stop: CancellationToken,
    delivery_timeout: Option<Duration>,
}

/// Radio settings from the first decoder; every decoder must be allocated.
fn radio_config(decoders: &[Box<dyn Decoder>]) -> Result<DecoderConfig, DecoderError> {
    let first = decoders.first().ok_or(DecoderError::NoProtocols)?;
    if decoders.iter().any(|d| d.config().block_size == 0) {
        return Err(DecoderError::NotAllocated);
    }
    Ok(*first.config())
}

impl Meter<RtlTcp> {
    /// Connects to `rtl_tcp` and tunes it for the first decoder.
    pub async fn connect(address: &str, decoders: Vec<Box<dyn Decoder>>) -> PipelineResult<Self> {
        let config = radio_config(&decoders)?;
        let receiver = Receiver::connect(address, config).await?;
        Ok(Self::assemble(receiver, decoders))
    }
}

impl<T: RadioTransport> Meter<T> {
    /// Builds a pipeline over an already connected transport.
    pub async fn with_transport(transport: T, decoders: Vec<Box<dyn Decoder>>) -> PipelineResult<Self> {
        let config = radio_config(&decoders)?;
        let receiver = Receiver::configure(transport, config).await?;
        Ok(Self::assemble(receiver, decoders))
    }

    fn assemble(receiver: Receiver<T>, decoders: Vec<Box<dyn Decoder>>) -> Self {
        let block_size = decoders
            .iter()
            .map(|d| d.config().block_size)
            .max()
            .unwrap_or_default();
        let state = Arc::new(StateCell::new());
        state.transition(PipelineState::Connected);

        Self {
            receiver,
            decoders,
            pool: Arc::new(BlockPool::new(block_size)),
            status: Arc::new(StatusTracker::new()),
            state,
            stop: CancellationToken::new(),
            delivery_timeout: None,
        }
    }

    /// Overrides the consumer delivery budget.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }

    pub fn status(&self) -> Arc<StatusTracker> {
        self.status.clone()
    }

    pub fn state(&self) -> Arc<StateCell> {
        self.state.clone()
    }

    pub fn pool(&self) -> Arc<BlockPool> {
        self.pool.clone()
    }

    /// Token that stops the pipeline when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Runs until stopped or until the radio link fails.
    ///
    /// Unique messages are offered on `consumer` (see
    /// [`consumer_channel`](crate::processing::consumer_channel)); the channel
    /// closes once every worker has exited.
    pub async fn run(mut self, consumer: mpsc::Sender<Handoff>) -> PipelineResult<()> {
        self.status.start();
        let stop = self.stop.child_token();

        let mut dispatcher = Dispatcher::new(consumer, self.status.clone());
        if let Some(timeout) = self.delivery_timeout {
            dispatcher = dispatcher.with_timeout(timeout);
        }

        let (block_tx, block_rx) = mpsc::channel(1);
        let blocks: SharedBlocks = Arc::new(Mutex::new(block_rx));
        let workers: Vec<_> = self
            .decoders
            .drain(..)
            .enumerate()
            .map(|(id, decoder)| {
                let worker = DecodeWorker::new(id, decoder, dispatcher.clone(), self.pool.clone());
                tokio::spawn(worker.run(blocks.clone(), stop.clone()))
            })
            .collect();
        drop(dispatcher);
        info!(
            "pipeline running with {} decode workers, {} byte blocks at {} samples/s",
            workers.len(),
            self.pool.block_size(),
            self.receiver.config().sample_rate
        );

        let result = self
            .receiver
            .read_loop(&self.pool, &block_tx, &stop, &self.state)
            .await;

        self.state.transition(PipelineState::Stopping);
        stop.cancel();
        drop(block_tx);
        for worker in workers {
            if let Err(err) = worker.await {
                error!("decode worker failed: {}", err);
            }
        }

        let mut queued = blocks.lock().await;
        while let Ok(block) = queued.try_recv() {
            self.pool.release(block);
        }
        drop(queued);

        let closed = self.receiver.close().await;
        self.state.transition(PipelineState::Closed);
        info!("pipeline closed: {:?}", self.status.snapshot());
        result.and(closed)
    }
}
