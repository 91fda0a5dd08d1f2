use crate::generator::frame::PROTOCOL_NAME;
use crate::generator::profile::GeneratorConfig;
use crate::Args;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub rtl_tcp_host: String,
    pub rtl_tcp_port: u16,
    /// Spawn `rtl_tcp` as a child process before connecting.
    pub embed_rtltcp: bool,
    pub protocols: Vec<String>,
    pub symbol_length: usize,
    /// Decode workers, each with its own decoder instance.
    pub workers: usize,
    pub status_addr: SocketAddr,
    /// JSON-lines event file; stdout when unset.
    pub events: Option<PathBuf>,
    /// Serve generated samples on the radio address instead of a real dongle.
    pub simulate: bool,
    pub generator: GeneratorConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rtl_tcp_host: "127.0.0.1".to_string(),
            rtl_tcp_port: 1234,
            embed_rtltcp: false,
            protocols: vec![PROTOCOL_NAME.to_string()],
            symbol_length: 72,
            workers: 1,
            status_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            events: None,
            simulate: false,
            generator: GeneratorConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading monitor config {}", path_ref.display()))?;
        let config: MonitorConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing monitor config {}", path_ref.display()))?;
        config
            .validate()
            .with_context(|| format!("validating monitor config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(args: &Args) -> Self {
        Self {
            rtl_tcp_host: args.rtl_tcp_host.clone(),
            rtl_tcp_port: args.rtl_tcp_port,
            embed_rtltcp: args.embed_rtltcp,
            protocols: args.protocols.clone(),
            symbol_length: args.symbol_length,
            workers: args.workers,
            status_addr: args.status_addr,
            events: args.events.clone(),
            simulate: args.simulate,
            generator: GeneratorConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.protocols.is_empty() {
            bail!("at least one protocol is required");
        }
        if self.symbol_length == 0 {
            bail!("symbol_length must be positive");
        }
        if self.workers == 0 {
            bail!("workers must be positive");
        }
        if self.embed_rtltcp && self.simulate {
            bail!("embed_rtltcp and simulate both claim the radio address");
        }
        Ok(())
    }

    pub fn rtl_tcp_address(&self) -> String {
        format!("{}:{}", self.rtl_tcp_host, self.rtl_tcp_port)
    }
}
