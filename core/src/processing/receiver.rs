use crate::prelude::{DecoderConfig, PipelineError, PipelineResult};
use crate::processing::buffer_pool::{BlockPool, SampleBlock};
use crate::processing::state::{PipelineState, StateCell};
use crate::transport::{is_transient, RadioTransport, RtlTcp};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Rolling deadline applied before every block read.
pub const READ_DEADLINE: Duration = Duration::from_secs(5);

/// Owns the radio connection and turns it into full sample blocks.
pub struct Receiver<T> {
    transport: T,
    config: DecoderConfig,
}

impl Receiver<RtlTcp> {
    pub async fn connect(address: &str, config: DecoderConfig) -> PipelineResult<Self> {
        info!("connecting to rtl_tcp at {}", address);
        let transport = RtlTcp::connect(address)
            .await
            .map_err(PipelineError::Connection)?;
        Self::configure(transport, config).await
    }
}

impl<T: RadioTransport> Receiver<T> {
    /// Tunes an already connected transport for `config`.
    pub async fn configure(mut transport: T, config: DecoderConfig) -> PipelineResult<Self> {
        transport
            .set_center_freq(config.center_freq)
            .await
            .map_err(PipelineError::Handshake)?;
        transport
            .set_sample_rate(config.sample_rate)
            .await
            .map_err(PipelineError::Handshake)?;
        transport
            .set_gain_mode(false)
            .await
            .map_err(PipelineError::Handshake)?;
        info!(
            "radio tuned: center_freq={} sample_rate={}",
            config.center_freq, config.sample_rate
        );
        Ok(Self { transport, config })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Reads blocks into `out` until stopped (`Ok`) or the link fails (`Err`).
    pub async fn read_loop(
        &mut self,
        pool: &BlockPool,
        out: &mpsc::Sender<SampleBlock>,
        stop: &CancellationToken,
        state: &StateCell,
    ) -> PipelineResult<()> {
        loop {
            if stop.is_cancelled() {
                return Ok(());
            }

            self.transport.set_deadline(Instant::now() + READ_DEADLINE);
            let mut block = pool.acquire();
            let read = tokio::select! {
                _ = stop.cancelled() => None,
                result = self.transport.read_full(&mut block) => Some(result),
            };

            match read {
                None => {
                    pool.release(block);
                    return Ok(());
                }
                Some(Err(err)) if is_transient(&err) => {
                    pool.release(block);
                    debug!("transient read error, retrying: {}", err);
                    continue;
                }
                Some(Err(err)) => {
                    pool.release(block);
                    warn!("fatal read error: {}", err);
                    state.transition(PipelineState::Stopping);
                    return Err(PipelineError::Read(err));
                }
                Some(Ok(())) => {}
            }

            state.transition(PipelineState::Running);

            let permit = tokio::select! {
                _ = stop.cancelled() => None,
                permit = out.reserve() => permit.ok(),
            };
            match permit {
                Some(permit) => permit.send(block),
                None => {
                    pool.release(block);
                    return Ok(());
                }
            }
        }
    }

    pub async fn close(&mut self) -> PipelineResult<()> {
        self.transport.close().await.map_err(PipelineError::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::testing::{block_of, ByteDecoder, ScriptedTransport, Step, BLOCK_SIZE};
    use crate::protocol::Decoder;
    use std::io;
    use std::sync::Arc;

    async fn receiver(transport: ScriptedTransport) -> Receiver<ScriptedTransport> {
        let config = *ByteDecoder::new().config();
        Receiver::configure(transport, config).await.unwrap()
    }

    fn connected() -> Arc<StateCell> {
        let state = Arc::new(StateCell::new());
        state.transition(PipelineState::Connected);
        state
    }

    #[tokio::test]
    async fn configure_tunes_radio_from_decoder() {
        let transport = ScriptedTransport::new(Vec::new());
        let tuning = transport.tuning.clone();
        receiver(transport).await;

        assert_eq!(
            *tuning.lock().unwrap(),
            vec![
                ("center_freq", 912_600_155),
                ("sample_rate", 2_359_296),
                ("gain_mode", 0)
            ]
        );
    }

    #[tokio::test]
    async fn transient_error_is_retried() {
        let transport = ScriptedTransport::new(vec![
            block_of(&[1]),
            Step::Fail(io::ErrorKind::TimedOut),
            block_of(&[2]),
        ]);
        let mut receiver = receiver(transport).await;
        let pool = Arc::new(BlockPool::new(BLOCK_SIZE));
        let state = connected();
        let stop = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(4);

        let reader = {
            let (pool, state, stop) = (pool.clone(), state.clone(), stop.clone());
            tokio::spawn(async move { receiver.read_loop(&pool, &tx, &stop, &state).await })
        };

        assert_eq!(rx.recv().await.unwrap()[0], 1);
        assert_eq!(rx.recv().await.unwrap()[0], 2);
        assert_eq!(state.get(), PipelineState::Running);
        assert!(!reader.is_finished());

        stop.cancel();
        assert!(reader.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn fatal_error_stops_and_recycles_block() {
        let transport = ScriptedTransport::new(vec![Step::Fail(io::ErrorKind::ConnectionReset)]);
        let mut receiver = receiver(transport).await;
        let pool = BlockPool::new(BLOCK_SIZE);
        let state = connected();
        let (tx, _rx) = mpsc::channel(1);

        let result = receiver
            .read_loop(&pool, &tx, &CancellationToken::new(), &state)
            .await;

        assert!(matches!(result, Err(PipelineError::Read(err)) if err.kind() == io::ErrorKind::ConnectionReset));
        assert_eq!(pool.idle(), 1);
        assert_eq!(state.get(), PipelineState::Stopping);
    }

    #[tokio::test]
    async fn eof_is_fatal() {
        let transport = ScriptedTransport::new(vec![block_of(&[7])]).eof_when_done();
        let mut receiver = receiver(transport).await;
        let pool = BlockPool::new(BLOCK_SIZE);
        let state = connected();
        let (tx, mut rx) = mpsc::channel(2);

        let result = receiver
            .read_loop(&pool, &tx, &CancellationToken::new(), &state)
            .await;

        assert!(matches!(result, Err(PipelineError::Read(_))));
        assert_eq!(rx.recv().await.unwrap()[0], 7);
    }

    #[tokio::test]
    async fn stop_signal_ends_loop_without_error() {
        let mut receiver = receiver(ScriptedTransport::new(Vec::new())).await;
        let pool = BlockPool::new(BLOCK_SIZE);
        let stop = CancellationToken::new();
        stop.cancel();
        let (tx, _rx) = mpsc::channel(1);

        let result = receiver.read_loop(&pool, &tx, &stop, &connected()).await;
        assert!(result.is_ok());
    }
}
