use anyhow::Context;
use clap::Parser;
use log::{error, info};
use powermoncore::protocol::EventSink;
use sink::json_lines::JsonLinesSink;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use workflow::config::MonitorConfig;
use workflow::runner::Runner;

mod generator;
mod sink;
mod status;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Utility meter monitor fed by an rtl_tcp radio")]
struct Args {
    /// Load the monitor config from YAML instead of the flags below
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "RTL_TCP_HOST", default_value = "127.0.0.1")]
    rtl_tcp_host: String,
    #[arg(long, env = "RTL_TCP_PORT", default_value_t = 1234)]
    rtl_tcp_port: u16,
    /// Spawn rtl_tcp as a child process before connecting
    #[arg(long, env = "EMBED_RTLTCP", default_value_t = false)]
    embed_rtltcp: bool,
    /// Comma separated protocol names to decode
    #[arg(long, value_delimiter = ',', default_value = "frame")]
    protocols: Vec<String>,
    #[arg(long, default_value_t = 72)]
    symbol_length: usize,
    #[arg(long, default_value_t = 1)]
    workers: usize,
    #[arg(long, default_value = "0.0.0.0:8080")]
    status_addr: SocketAddr,
    /// Append events as JSON lines to this file instead of stdout
    #[arg(long)]
    events: Option<PathBuf>,
    /// Serve generated samples on the radio address instead of using a dongle
    #[arg(long, default_value_t = false)]
    simulate: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = if let Some(path) = &args.config {
        MonitorConfig::load(path)?
    } else {
        let config = MonitorConfig::from_args(&args);
        config.validate().context("validating command line")?;
        config
    };

    let sink: Box<dyn EventSink> = match &config.events {
        Some(path) => Box::new(
            JsonLinesSink::create(path)
                .with_context(|| format!("opening event file {}", path.display()))?,
        ),
        None => Box::new(JsonLinesSink::stdout()),
    };

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating monitor runtime")?;

    runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        let interrupt = shutdown.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received");
                    interrupt.cancel();
                }
                Err(err) => error!("listening for Ctrl+C: {}", err),
            }
        });

        info!(
            "powermon {} reading {} with protocols {:?}",
            env!("CARGO_PKG_VERSION"),
            config.rtl_tcp_address(),
            config.protocols
        );
        let status = Runner::new(config).execute(sink, shutdown).await?;
        info!(
            "stopped after {}s: {} messages processed, {} failed",
            status.uptime.as_secs(),
            status.processed,
            status.failed
        );
        Ok(())
    })
}
