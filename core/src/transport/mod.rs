//! Byte-stream connection to the radio front-end.

pub mod rtl_tcp;

use async_trait::async_trait;
use std::io;
use tokio::time::Instant;

pub use rtl_tcp::{DongleInfo, RtlTcp};

/// Duplex sample stream plus tuning commands.
#[async_trait]
pub trait RadioTransport: Send {
    /// Deadline applied to every following `read_full` until reset.
    fn set_deadline(&mut self, deadline: Instant);

    /// Fills `buf` completely or fails; a partial read is never reported as success.
    async fn read_full(&mut self, buf: &mut [u8]) -> io::Result<()>;

    async fn set_center_freq(&mut self, hz: u32) -> io::Result<()>;

    async fn set_sample_rate(&mut self, hz: u32) -> io::Result<()>;

    /// Selects automatic (`false`) or manual (`true`) tuner gain.
    async fn set_gain_mode(&mut self, manual: bool) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;
}

/// Read failures worth retrying on the same connection.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
