//! TCP server for the door side of the protocol.
//!
//! Every accepted connection gets its own task. The task reads frames with
//! [`JsonCodec`] and hands each one to a [`FrameHandler`], writing back
//! exactly one response per frame, in order.
//!
//! # Architecture
//!
//! ```text
//! Widget A ┐
//!          │
//! Widget B ├──> TcpServer ──(task per connection)──> FrameHandler
//!          │        │
//! Widget C ┘        └──> JsonCodec (automatic framing)
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use bytes::Bytes;
//! use latchkey_network::{FrameHandler, TcpServer, TcpServerConfig};
//! use latchkey_protocol::Response;
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! struct AlwaysDeny;
//!
//! impl FrameHandler for AlwaysDeny {
//!     async fn handle(&self, _frame: Bytes, _peer: SocketAddr) -> Response {
//!         Response::failure()
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = TcpServer::bind(TcpServerConfig::default()).await?;
//! server.run(Arc::new(AlwaysDeny)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! A frame that is not valid JSON is still passed to the handler, which
//! answers it; the connection stays open. A frame above the size limit or an
//! I/O error closes that connection only.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use latchkey_core::constants::{DEFAULT_SERVER_PORT, MAX_FRAME_SIZE};
use latchkey_protocol::{JsonCodec, Response};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

/// Produces the response to one inbound frame.
///
/// The handler sees raw frame bytes rather than a parsed request so that it
/// can answer malformed input too.
pub trait FrameHandler: Send + Sync + 'static {
    fn handle(&self, frame: Bytes, peer: SocketAddr) -> impl Future<Output = Response> + Send;
}

/// Listening address and limits of the door server.
///
/// ```
/// use latchkey_network::TcpServerConfig;
///
/// let config = TcpServerConfig {
///     bind_addr: "127.0.0.1:9500".parse().unwrap(),
///     ..TcpServerConfig::default()
/// };
/// assert_eq!(config.max_connections, 100);
/// ```
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    pub bind_addr: SocketAddr,
    /// Widgets served at once; further connections are dropped on accept.
    pub max_connections: usize,
    /// A request larger than this closes its connection.
    pub max_frame_size: usize,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_SERVER_PORT)),
            max_connections: 100,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum TcpServerError {
    #[error("cannot listen on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// One accepted widget connection.
struct Connection {
    framed: Framed<TcpStream, JsonCodec>,
    addr: SocketAddr,
    accepted_at: DateTime<Utc>,
}

impl Connection {
    /// Answer frames until the peer leaves or the stream breaks.
    async fn serve<H: FrameHandler>(mut self, handler: Arc<H>) {
        let mut handled = 0u64;

        loop {
            match self.framed.next().await {
                Some(Ok(frame)) => {
                    trace!(peer = %self.addr, size = frame.len(), "Received frame");
                    let response = handler.handle(frame, self.addr).await;
                    if let Err(e) = self.framed.send(&response).await {
                        warn!(peer = %self.addr, error = %e, "Failed to send response");
                        break;
                    }
                    handled += 1;
                }
                Some(Err(e)) => {
                    warn!(peer = %self.addr, error = %e, "Closing connection after stream error");
                    break;
                }
                None => break,
            }
        }

        let uptime = Utc::now() - self.accepted_at;
        info!(
            peer = %self.addr,
            requests = handled,
            uptime_ms = uptime.num_milliseconds(),
            "Connection closed"
        );
    }
}

/// Decrements the live connection count when a connection task ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The door server's listener.
///
/// [`bind`](Self::bind) first, then [`run`](Self::run) or
/// [`serve`](Self::serve). Every accepted widget gets its own task, so a
/// slow or silent widget never holds up the others.
pub struct TcpServer {
    listener: TcpListener,
    config: TcpServerConfig,
    /// Live connection tasks.
    active: Arc<AtomicUsize>,
}

impl TcpServer {
    /// Open the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the address is in use or not permitted.
    pub async fn bind(config: TcpServerConfig) -> Result<Self, TcpServerError> {
        let addr = config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TcpServerError::BindFailed { addr, source })?;

        info!(
            addr = %listener.local_addr().unwrap_or(addr),
            max_connections = config.max_connections,
            "Door server listening"
        );

        Ok(Self {
            listener,
            config,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address the server is actually bound to (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TcpServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Serve forever.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener itself fails.
    pub async fn run<H: FrameHandler>(self, handler: Arc<H>) -> Result<(), TcpServerError> {
        self.serve(handler, std::future::pending()).await
    }

    /// Serve until `shutdown` completes.
    ///
    /// Stops accepting when `shutdown` resolves; connections already
    /// accepted keep running until their peers disconnect.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener itself fails.
    pub async fn serve<H, F>(self, handler: Arc<H>, shutdown: F) -> Result<(), TcpServerError>
    where
        H: FrameHandler,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, addr) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "Transient accept error");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "Listener failed");
                        return Err(e.into());
                    }
                },
                () = &mut shutdown => {
                    info!("Door server stopped accepting connections");
                    return Ok(());
                }
            };

            let current = self.active.load(Ordering::SeqCst);
            if current >= self.config.max_connections {
                error!(
                    peer = %addr,
                    limit = self.config.max_connections,
                    "Too many widgets connected, dropping new connection"
                );
                drop(stream);
                continue;
            }

            if let Err(e) = stream.set_nodelay(true) {
                warn!(peer = %addr, error = %e, "Could not disable Nagle");
            }

            self.active.fetch_add(1, Ordering::SeqCst);
            let slot = ConnectionSlot(Arc::clone(&self.active));
            info!(peer = %addr, active = current + 1, "Widget connected");

            let connection = Connection {
                framed: Framed::new(
                    stream,
                    JsonCodec::with_max_frame_size(self.config.max_frame_size),
                ),
                addr,
                accepted_at: Utc::now(),
            };
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let _slot = slot;
                connection.serve(handler).await;
            });
            debug!(peer = %addr, "Spawned connection task");
        }
    }
}

/// Accept errors caused by one bad connection or momentary resource
/// exhaustion, after which the listener is still usable.
fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    ) || e.raw_os_error() == Some(24) // EMFILE
}
