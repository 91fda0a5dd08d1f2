use crate::generator::frame;
use crate::generator::server::SimulatedDongle;
use crate::status::server::StatusServer;
use crate::workflow::config::MonitorConfig;
use crate::workflow::frontend::EmbeddedFrontend;
use anyhow::Context;
use chrono::Utc;
use log::{error, info, warn};
use powermoncore::protocol::{Decoder, EventSink, ParserRegistry, ProtocolDecoder};
use powermoncore::{consumer_channel, Meter, MeterStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct Runner {
    config: MonitorConfig,
    registry: Arc<ParserRegistry>,
}

impl Runner {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            registry: Arc::new(frame::registry()),
        }
    }

    /// One allocated decoder per worker.
    pub fn build_decoders(&self) -> anyhow::Result<Vec<Box<dyn Decoder>>> {
        (0..self.config.workers)
            .map(|_| {
                let mut decoder = ProtocolDecoder::new(self.registry.clone());
                for name in &self.config.protocols {
                    decoder
                        .register_protocol(name, self.config.symbol_length)
                        .with_context(|| {
                            let known: Vec<_> = self.registry.names().collect();
                            format!("registering protocol {} (known: {})", name, known.join(", "))
                        })?;
                }
                decoder.allocate().context("allocating decoder")?;
                Ok(Box::new(decoder) as Box<dyn Decoder>)
            })
            .collect()
    }

    /// Runs the monitor until `shutdown` fires or the radio link fails.
    pub async fn execute(
        &self,
        sink: Box<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<MeterStatus> {
        let decoders = self.build_decoders()?;
        let services = CancellationToken::new();
        let mut address = self.config.rtl_tcp_address();

        let frontend = if self.config.embed_rtltcp {
            let frontend =
                EmbeddedFrontend::spawn(&self.config.rtl_tcp_host, self.config.rtl_tcp_port)
                    .await?;
            Some(frontend)
        } else {
            None
        };

        let simulator = if self.config.simulate {
            let dongle = SimulatedDongle::bind(&address, self.config.generator.clone())
                .await
                .with_context(|| format!("binding simulated rtl_tcp on {}", address))?;
            address = dongle.local_addr()?.to_string();
            Some(tokio::spawn(dongle.serve(services.clone())))
        } else {
            None
        };

        let result = self
            .run_meter(&address, decoders, sink, &shutdown, &services)
            .await;

        services.cancel();
        if let Some(simulator) = simulator {
            match simulator.await {
                Ok(Err(err)) => warn!("simulated rtl_tcp failed: {}", err),
                Err(err) => error!("simulated rtl_tcp task failed: {}", err),
                Ok(Ok(())) => {}
            }
        }
        if let Some(frontend) = frontend {
            frontend.shutdown().await;
        }
        result
    }

    async fn run_meter(
        &self,
        address: &str,
        decoders: Vec<Box<dyn Decoder>>,
        mut sink: Box<dyn EventSink>,
        shutdown: &CancellationToken,
        services: &CancellationToken,
    ) -> anyhow::Result<MeterStatus> {
        let status_server = StatusServer::bind(self.config.status_addr).await?;
        let meter = Meter::connect(address, decoders)
            .await
            .with_context(|| format!("connecting to rtl_tcp at {}", address))?;
        let status = meter.status();
        let status_task = tokio::spawn(status_server.run(
            status.clone(),
            meter.state(),
            services.clone(),
        ));

        let stop_forward = {
            let (shutdown, stop) = (shutdown.clone(), meter.cancellation_token());
            tokio::spawn(async move {
                shutdown.cancelled().await;
                info!("shutdown requested");
                stop.cancel();
            })
        };

        let (tx, mut rx) = consumer_channel();
        let consumer = tokio::task::spawn_blocking(move || {
            let mut written = 0u64;
            while let Some(handoff) = rx.blocking_recv() {
                let Some(message) = handoff.accept() else {
                    continue;
                };
                let event = message.to_event(Utc::now());
                match sink.add_event(&event) {
                    Ok(()) => written += 1,
                    Err(err) => error!(
                        "dropping {} event from {}: {}",
                        event.meter_type, event.endpoint_id, err
                    ),
                }
            }
            written
        });

        let result = meter.run(tx).await;
        stop_forward.abort();
        match consumer.await {
            Ok(written) => info!("{} events written", written),
            Err(err) => error!("event consumer failed: {}", err),
        }
        services.cancel();
        if let Err(err) = status_task.await {
            error!("status endpoint task failed: {}", err);
        }

        result.context("meter pipeline")?;
        Ok(status.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::profile::GeneratorConfig;
    use crate::sink::json_lines::JsonLinesSink;
    use powermoncore::protocol::parse_event_stream;
    use std::collections::HashSet;
    use std::fs::{self, File};
    use std::net::SocketAddr;
    use std::time::Duration;

    fn simulated(workers: usize) -> MonitorConfig {
        MonitorConfig {
            rtl_tcp_port: 0,
            status_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            workers,
            simulate: true,
            generator: GeneratorConfig {
                transmit_probability: 1.0,
                seed: 3,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn decoders_follow_worker_count() {
        let runner = Runner::new(simulated(3));
        let decoders = runner.build_decoders().unwrap();
        assert_eq!(decoders.len(), 3);
        assert!(decoders.iter().all(|d| d.config().block_size == 32_768));
        assert!(decoders.iter().all(|d| d.config().sample_rate == 72 * 32_768));
    }

    #[test]
    fn unknown_protocol_fails_before_connecting() {
        let runner = Runner::new(MonitorConfig {
            protocols: vec!["scm".into()],
            ..simulated(1)
        });
        let err = runner.build_decoders().err().unwrap();
        let message = format!("{:#}", err);
        assert!(message.contains("unknown protocol: scm"));
        assert!(message.contains("known: frame"));
    }

    #[tokio::test]
    async fn connection_refused_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let runner = Runner::new(MonitorConfig {
            rtl_tcp_port: port,
            simulate: false,
            ..simulated(1)
        });
        let sink = Box::new(JsonLinesSink::new(Vec::new()));
        let err = runner
            .execute(sink, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("connecting to rtl_tcp"));
    }

    #[tokio::test]
    async fn simulated_run_writes_each_transmission_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = Box::new(JsonLinesSink::create(&path).unwrap());
        let shutdown = CancellationToken::new();

        let runner = Runner::new(simulated(1));
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { runner.execute(sink, shutdown).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while fs::read_to_string(&path).unwrap_or_default().lines().count() < 5
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        shutdown.cancel();
        let status = run.await.unwrap().unwrap();

        let mut seen = HashSet::new();
        parse_event_stream(File::open(&path).unwrap(), |event| {
            assert!(
                seen.insert((event.endpoint_id, event.consumption)),
                "duplicate event {:?}",
                event
            );
            Ok::<_, ()>(())
        })
        .unwrap();
        assert!(seen.len() >= 5);
        assert_eq!(status.processed, seen.len() as u64);
        assert_eq!(status.failed, 0);
    }
}
