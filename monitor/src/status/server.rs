use anyhow::Context as _;
use futures_util::stream;
use log::{info, warn};
use powermoncore::processing::{PipelineState, StateCell};
use powermoncore::telemetry::{MeterStatus, StatusTracker};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use warp::http::{HeaderMap, StatusCode};
use warp::{Filter, Rejection, Reply};

/// Largest request header block accepted, counted as `name: value\r\n` lines.
pub const MAX_HEADER_BYTES: usize = 256;
/// Lifetime of one client connection, request and response included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    status: MeterStatus,
    state: PipelineState,
}

#[derive(Debug)]
struct HeadersTooLarge;

impl warp::reject::Reject for HeadersTooLarge {}

fn header_bytes(headers: &HeaderMap) -> usize {
    headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum()
}

fn within_header_limit() -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::headers_cloned()
        .and_then(|headers: HeaderMap| async move {
            if header_bytes(&headers) > MAX_HEADER_BYTES {
                Err(warp::reject::custom(HeadersTooLarge))
            } else {
                Ok(())
            }
        })
        .untuple_one()
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code = if err.find::<HeadersTooLarge>().is_some() {
        StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        StatusCode::BAD_REQUEST
    };
    let reason = code.canonical_reason().unwrap_or("error");
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": reason })),
        code,
    ))
}

/// `GET /status`: counters plus pipeline state as JSON.
pub fn routes(
    status: Arc<StatusTracker>,
    state: Arc<StateCell>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let status_filter = warp::any().map(move || status.clone());
    let state_filter = warp::any().map(move || state.clone());

    within_header_limit()
        .and(warp::path("status"))
        .and(warp::path::end())
        .and(warp::get())
        .and(status_filter)
        .and(state_filter)
        .map(|status: Arc<StatusTracker>, state: Arc<StateCell>| {
            warp::reply::json(&StatusReport {
                status: status.snapshot(),
                state: state.get(),
            })
        })
        .recover(handle_rejection)
}

/// Bound status listener; every connection gets a fixed time budget.
pub struct StatusServer {
    listener: TcpListener,
    request_timeout: Duration,
}

impl StatusServer {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding status endpoint {}", addr))?;
        Ok(Self {
            listener,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves [`routes`] until `shutdown` fires.
    pub async fn run(
        self,
        status: Arc<StatusTracker>,
        state: Arc<StateCell>,
        shutdown: CancellationToken,
    ) {
        if let Ok(addr) = self.local_addr() {
            info!("status endpoint on http://{}/status", addr);
        }
        let limit = self.request_timeout;
        let incoming = stream::unfold(self.listener, move |listener| async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => {
                        let conn = TimedConnection::new(socket, limit);
                        return Some((Ok::<_, io::Error>(conn), listener));
                    }
                    Err(err) => {
                        warn!("status endpoint accept failed: {}", err);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });

        warp::serve(routes(status, state))
            .serve_incoming_with_graceful_shutdown(Box::pin(incoming), async move {
                shutdown.cancelled().await
            })
            .await;
    }
}

/// TCP stream that fails every read and write once its deadline passes.
struct TimedConnection {
    inner: TcpStream,
    deadline: Pin<Box<Sleep>>,
}

impl TimedConnection {
    fn new(inner: TcpStream, limit: Duration) -> Self {
        Self {
            inner,
            deadline: Box::pin(tokio::time::sleep(limit)),
        }
    }

    fn expired(&mut self, cx: &mut Context<'_>) -> bool {
        self.deadline.as_mut().poll(cx).is_ready()
    }
}

fn request_timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "status request exceeded its time limit")
}

impl AsyncRead for TimedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.expired(cx) {
            return Poll::Ready(Err(request_timed_out()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TimedConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.expired(cx) {
            return Poll::Ready(Err(request_timed_out()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
