use crate::processing::buffer_pool::{BlockPool, SampleBlock};
use crate::processing::dedup::DedupFilter;
use crate::processing::dispatcher::{DispatchOutcome, Dispatcher};
use crate::protocol::{Decoder, Messages};
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Block channel shared by every worker; whichever worker locks it first takes the next block.
pub type SharedBlocks = Arc<Mutex<mpsc::Receiver<SampleBlock>>>;

/// Per-block tally, mostly for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockReport {
    pub decoded: usize,
    pub duplicates: usize,
    pub delivered: usize,
    pub dropped: usize,
}

/// Decodes blocks and dispatches the unique messages they contain.
pub struct DecodeWorker {
    id: usize,
    decoder: Box<dyn Decoder>,
    dedup: DedupFilter,
    dispatcher: Dispatcher,
    pool: Arc<BlockPool>,
}

impl DecodeWorker {
    pub fn new(
        id: usize,
        decoder: Box<dyn Decoder>,
        dispatcher: Dispatcher,
        pool: Arc<BlockPool>,
    ) -> Self {
        Self {
            id,
            decoder,
            dedup: DedupFilter::new(),
            dispatcher,
            pool,
        }
    }

    /// Lazily decodes the messages detectable in `block`.
    pub fn process<'a>(&'a mut self, block: &'a SampleBlock) -> Messages<'a> {
        self.decoder.decode(block)
    }

    /// Drains one block through dedup and dispatch, then returns it to the pool.
    ///
    /// Returns `None` when the stop signal interrupted the drain.
    pub async fn handle_block(
        &mut self,
        block: SampleBlock,
        stop: &CancellationToken,
    ) -> Option<BlockReport> {
        let mut report = BlockReport::default();
        let mut interrupted = false;
        {
            let Self {
                decoder,
                dedup,
                dispatcher,
                ..
            } = self;
            let mut messages = decoder.decode(&block);
            while let Some(msg) = messages.next() {
                if stop.is_cancelled() {
                    interrupted = true;
                    break;
                }
                report.decoded += 1;
                if !dedup.admit(msg.fingerprint()) {
                    report.duplicates += 1;
                    continue;
                }
                match dispatcher.forward(msg, stop).await {
                    DispatchOutcome::Delivered => report.delivered += 1,
                    DispatchOutcome::TimedOut | DispatchOutcome::Disconnected => {
                        report.dropped += 1
                    }
                    DispatchOutcome::Cancelled => {
                        interrupted = true;
                        break;
                    }
                }
            }
        }
        self.pool.release(block);

        if interrupted {
            return None;
        }
        self.dedup.end_cycle();
        Some(report)
    }

    /// Consumes blocks until the stop signal fires or the block channel closes.
    pub async fn run(mut self, blocks: SharedBlocks, stop: CancellationToken) {
        info!("decode worker {} started", self.id);
        loop {
            let next = {
                let mut rx = blocks.lock().await;
                tokio::select! {
                    _ = stop.cancelled() => None,
                    block = rx.recv() => block,
                }
            };
            let Some(block) = next else {
                break;
            };
            match self.handle_block(block, &stop).await {
                Some(report) if report.decoded > 0 => {
                    debug!("worker {} block: {:?}", self.id, report)
                }
                Some(_) => {}
                None => break,
            }
        }
        info!("decode worker {} stopped", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::dispatcher::{consumer_channel, Handoff};
    use crate::processing::testing::{accept_all, ByteDecoder};
    use crate::telemetry::StatusTracker;

    fn block(pool: &BlockPool, ids: &[u8]) -> SampleBlock {
        let mut block = pool.acquire();
        block.fill(0);
        block[..ids.len()].copy_from_slice(ids);
        block
    }

    fn worker(pool: Arc<BlockPool>) -> (DecodeWorker, mpsc::Receiver<Handoff>) {
        let (tx, rx) = consumer_channel();
        let dispatcher = Dispatcher::new(tx, Arc::new(StatusTracker::new()));
        let worker = DecodeWorker::new(0, Box::new(ByteDecoder::new()), dispatcher, pool);
        (worker, rx)
    }

    #[tokio::test]
    async fn process_yields_messages_in_decoder_order() {
        let pool = Arc::new(BlockPool::new(8));
        let (mut worker, _rx) = worker(pool.clone());
        let b = block(&pool, &[3, 1, 2]);
        let ids: Vec<u32> = worker.process(&b).map(|m| m.endpoint_id()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn handle_block_suppresses_adjacent_repeats_and_recycles() {
        let pool = Arc::new(BlockPool::new(8));
        let (mut worker, rx) = worker(pool.clone());
        let consumer = accept_all(rx);
        let stop = CancellationToken::new();

        let first = worker.handle_block(block(&pool, &[5, 6]), &stop).await.unwrap();
        assert_eq!(first.delivered, 2);
        assert_eq!(pool.idle(), 1);

        let second = worker.handle_block(block(&pool, &[6, 7]), &stop).await.unwrap();
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.delivered, 1);

        drop(worker);
        assert_eq!(consumer.await.unwrap(), vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn stopped_worker_still_returns_block() {
        let pool = Arc::new(BlockPool::new(8));
        let (mut worker, _rx) = worker(pool.clone());
        let stop = CancellationToken::new();
        stop.cancel();

        assert!(worker.handle_block(block(&pool, &[1]), &stop).await.is_none());
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn run_exits_when_block_channel_closes() {
        let pool = Arc::new(BlockPool::new(8));
        let (worker, mut rx) = worker(pool.clone());
        let (tx, blocks) = mpsc::channel(1);
        let blocks = Arc::new(Mutex::new(blocks));
        let handle = tokio::spawn(worker.run(blocks, CancellationToken::new()));

        tx.send(block(&pool, &[9])).await.unwrap();
        let handoff = rx.recv().await.unwrap();
        assert_eq!(handoff.accept().unwrap().endpoint_id(), 9);
        drop(tx);
        handle.await.unwrap();
    }
}
