//! Stand-in `rtl_tcp` server streaming generated samples.

use crate::generator::profile::{BlockGenerator, GeneratorConfig};
use log::{debug, info, warn};
use powermoncore::transport::DongleInfo;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const DEFAULT_SAMPLE_RATE: u32 = 2_048_000;
const SET_SAMPLE_RATE: u8 = 0x02;

const SIMULATED_DONGLE: DongleInfo = DongleInfo {
    tuner_type: 5,
    gain_count: 29,
};

pub struct SimulatedDongle {
    listener: TcpListener,
    config: GeneratorConfig,
}

impl SimulatedDongle {
    pub async fn bind(addr: &str, config: GeneratorConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until `shutdown` fires; each client gets its own stream.
    pub async fn serve(self, shutdown: CancellationToken) -> io::Result<()> {
        info!("simulated rtl_tcp listening on {}", self.local_addr()?);
        loop {
            let (socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = self.listener.accept() => accepted?,
            };
            info!("simulated rtl_tcp client {}", peer);

            let mut config = self.config.clone();
            config.seed = config.seed.wrapping_add(u64::from(peer.port()));
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = stream_samples(socket, config, shutdown).await {
                    debug!("simulated client {} gone: {}", peer, err);
                }
            });
        }
    }
}

async fn stream_samples(
    socket: TcpStream,
    config: GeneratorConfig,
    shutdown: CancellationToken,
) -> io::Result<()> {
    socket.set_nodelay(true)?;
    let (reader, mut writer) = socket.into_split();
    writer.write_all(&SIMULATED_DONGLE.encode()).await?;

    let (rate_tx, rate_rx) = watch::channel(DEFAULT_SAMPLE_RATE);
    let commands = tokio::spawn(read_commands(reader, rate_tx));

    let mut generator = BlockGenerator::new(config.clone());
    let mut chunk = vec![0u8; config.chunk_size.max(2)];
    let result = loop {
        let period = chunk_period(chunk.len(), *rate_rx.borrow());
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            _ = tokio::time::sleep(period) => {}
        }

        if let Some(endpoint) = generator.fill(&mut chunk) {
            debug!("simulated meter {} transmitted", endpoint);
        }
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            written = writer.write_all(&chunk) => {
                if let Err(err) = written {
                    break Err(err);
                }
            }
        }
    };

    commands.abort();
    result
}

/// Tracks tuning commands; only the sample rate affects the stream.
async fn read_commands(mut reader: OwnedReadHalf, rate: watch::Sender<u32>) {
    let mut command = [0u8; 5];
    while reader.read_exact(&mut command).await.is_ok() {
        let param = u32::from_be_bytes([command[1], command[2], command[3], command[4]]);
        debug!("simulated rtl_tcp command {:#04x} param {}", command[0], param);
        if command[0] == SET_SAMPLE_RATE {
            if param == 0 {
                warn!("ignoring zero sample rate");
                continue;
            }
            rate.send_replace(param);
        }
    }
}

/// Real time covered by `bytes` of interleaved 8-bit I/Q at `sample_rate`.
fn chunk_period(bytes: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64((bytes / 2) as f64 / f64::from(sample_rate.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::frame::FrameParser;
    use powermoncore::protocol::ProtocolParser;
    use powermoncore::transport::{RadioTransport, RtlTcp};

    #[test]
    fn chunk_period_follows_sample_rate() {
        assert_eq!(chunk_period(4_096_000, 2_048_000), Duration::from_secs(1));
        assert_eq!(chunk_period(2_048, 1_024_000), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn client_receives_header_and_decodable_samples() {
        let dongle = SimulatedDongle::bind(
            "127.0.0.1:0",
            GeneratorConfig {
                chunk_size: 1024,
                transmit_probability: 1.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let addr = dongle.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(dongle.serve(shutdown.clone()));

        let mut client = RtlTcp::connect(addr).await.unwrap();
        assert_eq!(client.info(), SIMULATED_DONGLE);
        client.set_sample_rate(2_359_296).await.unwrap();

        let mut block = vec![0u8; 1024];
        client.read_full(&mut block).await.unwrap();
        let mut found = Vec::new();
        FrameParser::new(72).parse(&block, &mut found);
        assert!(!found.is_empty());

        shutdown.cancel();
        assert!(server.await.unwrap().is_ok());
    }
}
