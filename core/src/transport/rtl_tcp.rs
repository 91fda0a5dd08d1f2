use crate::transport::RadioTransport;
use async_trait::async_trait;
use log::{debug, info};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::{timeout_at, Instant};

const MAGIC: &[u8; 4] = b"RTL0";

const CMD_CENTER_FREQ: u8 = 0x01;
const CMD_SAMPLE_RATE: u8 = 0x02;
const CMD_GAIN_MODE: u8 = 0x03;

/// Header announced by `rtl_tcp` right after accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DongleInfo {
    pub tuner_type: u32,
    pub gain_count: u32,
}

impl DongleInfo {
    pub fn decode(header: &[u8; 12]) -> io::Result<Self> {
        if &header[..4] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected dongle magic {:?}", &header[..4]),
            ));
        }
        Ok(Self {
            tuner_type: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            gain_count: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
        })
    }

    pub fn encode(&self) -> [u8; 12] {
        let mut header = [0u8; 12];
        header[..4].copy_from_slice(MAGIC);
        header[4..8].copy_from_slice(&self.tuner_type.to_be_bytes());
        header[8..].copy_from_slice(&self.gain_count.to_be_bytes());
        header
    }

    pub fn tuner_name(&self) -> &'static str {
        match self.tuner_type {
            1 => "E4000",
            2 => "FC0012",
            3 => "FC0013",
            4 => "FC2580",
            5 => "R820T",
            6 => "R828D",
            _ => "unknown",
        }
    }
}

/// Client side of the `rtl_tcp` protocol.
pub struct RtlTcp {
    stream: TcpStream,
    info: DongleInfo,
    deadline: Option<Instant>,
}

impl RtlTcp {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let mut header = [0u8; 12];
        stream.read_exact(&mut header).await?;
        let info = DongleInfo::decode(&header)?;
        info!(
            "rtl_tcp dongle: tuner {} with {} gain settings",
            info.tuner_name(),
            info.gain_count
        );

        Ok(Self {
            stream,
            info,
            deadline: None,
        })
    }

    pub fn info(&self) -> DongleInfo {
        self.info
    }

    async fn command(&mut self, cmd: u8, param: u32) -> io::Result<()> {
        let mut frame = [0u8; 5];
        frame[0] = cmd;
        frame[1..].copy_from_slice(&param.to_be_bytes());
        debug!("rtl_tcp command {:#04x} param {}", cmd, param);
        self.stream.write_all(&frame).await
    }
}

#[async_trait]
impl RadioTransport for RtlTcp {
    fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    async fn read_full(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let read = self.stream.read_exact(buf);
        match self.deadline {
            Some(deadline) => match timeout_at(deadline, read).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "sample read deadline exceeded",
                )),
            },
            None => read.await.map(|_| ()),
        }
    }

    async fn set_center_freq(&mut self, hz: u32) -> io::Result<()> {
        self.command(CMD_CENTER_FREQ, hz).await
    }

    async fn set_sample_rate(&mut self, hz: u32) -> io::Result<()> {
        self.command(CMD_SAMPLE_RATE, hz).await
    }

    async fn set_gain_mode(&mut self, manual: bool) -> io::Result<()> {
        self.command(CMD_GAIN_MODE, u32::from(manual)).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
