//! Optional `rtl_tcp` child process.

use anyhow::Context;
use log::{info, warn};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Time `rtl_tcp` gets to open the dongle before the first connect.
pub const STARTUP_GRACE: Duration = Duration::from_secs(5);

pub struct EmbeddedFrontend {
    child: Child,
}

impl EmbeddedFrontend {
    pub async fn spawn(host: &str, port: u16) -> anyhow::Result<Self> {
        Self::spawn_program("rtl_tcp", host, port, STARTUP_GRACE).await
    }

    pub async fn spawn_program(
        program: &str,
        host: &str,
        port: u16,
        grace: Duration,
    ) -> anyhow::Result<Self> {
        let port = port.to_string();
        let child = Command::new(program)
            .args(["-a", host, "-p", port.as_str()])
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {} -a {} -p {}", program, host, port))?;
        info!(
            "started {} (pid {:?}), waiting {:?} for it to come up",
            program,
            child.id(),
            grace
        );
        tokio::time::sleep(grace).await;
        Ok(Self { child })
    }

    /// Kills the child and reaps it.
    pub async fn shutdown(mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => warn!("embedded rtl_tcp already exited: {}", status),
            _ => {
                if let Err(err) = self.child.kill().await {
                    warn!("stopping embedded rtl_tcp: {}", err);
                } else {
                    info!("embedded rtl_tcp stopped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let err = EmbeddedFrontend::spawn_program(
            "powermon-no-such-rtl-tcp",
            "127.0.0.1",
            1234,
            Duration::ZERO,
        )
        .await
        .err()
        .unwrap();
        assert!(format!("{:#}", err).contains("powermon-no-such-rtl-tcp"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_child_shuts_down_quietly() {
        let frontend = EmbeddedFrontend::spawn_program("true", "127.0.0.1", 1234, Duration::ZERO)
            .await
            .unwrap();
        frontend.shutdown().await;
    }
}
