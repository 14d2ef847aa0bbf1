//! TCP client for the widget side of the door protocol.
//!
//! A thin transport: one connection, JSON framing via [`JsonCodec`], and
//! timeouts on every I/O step. Retry and reconnect decisions live one layer
//! up, in [`SessionChannel`](crate::SessionChannel).
//!
//! # Example Usage
//!
//! ```no_run
//! use latchkey_network::{TcpClient, TcpClientConfig};
//! use latchkey_protocol::Response;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = TcpClient::new(TcpClientConfig::new("127.0.0.1:9500".parse()?));
//! client.connect().await?;
//!
//! client
//!     .send(serde_json::json!({"type": "register_device",
//!         "device_id": "abc", "device_key": "12345"}))
//!     .await?;
//! let response = Response::parse(&client.recv().await?)?;
//! println!("success: {}", response.success);
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Timeout Handling
//!
//! - Connect and send are bounded by `timeout` (default 3000ms).
//! - Receive is bounded by `response_timeout` when set; by default the client
//!   waits for the server as long as the connection stays up.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use latchkey_core::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_WIDGET_SERVER_ADDR};
use latchkey_protocol::JsonCodec;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

/// Where and how patiently a [`TcpClient`] talks to the door server.
///
/// ```
/// use latchkey_network::TcpClientConfig;
/// use std::time::Duration;
///
/// let config = TcpClientConfig::new("127.0.0.1:9500".parse().unwrap())
///     .with_timeout(Duration::from_millis(500))
///     .with_response_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.response_timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    pub server_addr: SocketAddr,
    /// Bound on connect and on each send.
    pub timeout: Duration,
    /// Bound on waiting for an answer. `None` waits while the socket lives.
    pub response_timeout: Option<Duration>,
}

impl TcpClientConfig {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_WIDGET_SERVER_ADDR
                .parse()
                .unwrap_or(SocketAddr::from((Ipv4Addr::LOCALHOST, 5000))),
            timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            response_timeout: None,
        }
    }
}

/// Transport failures seen by the widget.
#[derive(Debug, Error)]
pub enum TcpClientError {
    #[error("no open connection to the door server")]
    NotConnected,

    #[error("door server did not accept the connection within {0}ms")]
    ConnectionTimeout(u64),

    #[error("no answer from the door server within {0}ms")]
    ReadTimeout(u64),

    #[error("request not written within {0}ms")]
    WriteTimeout(u64),

    /// The peer closed the socket.
    #[error("door server went away: {0}")]
    ConnectionLost(String),

    /// Encoding failed or the stream held something that is not JSON.
    #[error("framing failure: {0}")]
    Protocol(#[from] latchkey_core::Error),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// One widget connection to the door server.
///
/// Starts disconnected. [`connect`](Self::connect) opens the socket,
/// [`send`](Self::send) and [`recv`](Self::recv) move one JSON value each,
/// and [`close`](Self::close) shuts the socket down. Nothing here retries.
pub struct TcpClient {
    server_addr: SocketAddr,
    framed: Option<Framed<TcpStream, JsonCodec>>,
    timeout: Duration,
    response_timeout: Option<Duration>,
}

impl TcpClient {
    /// ```
    /// use latchkey_network::{TcpClient, TcpClientConfig};
    ///
    /// let client = TcpClient::new(TcpClientConfig::default());
    /// assert!(!client.is_connected());
    /// ```
    pub fn new(config: TcpClientConfig) -> Self {
        Self {
            server_addr: config.server_addr,
            framed: None,
            timeout: config.timeout,
            response_timeout: config.response_timeout,
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Open the socket, replacing any previous one.
    ///
    /// Nagle is disabled: requests are single small writes that wait for an
    /// answer.
    ///
    /// # Errors
    ///
    /// `ConnectionTimeout` when `timeout` elapses, `Io` when refused.
    pub async fn connect(&mut self) -> Result<(), TcpClientError> {
        trace!(server = %self.server_addr, "Dialing door server");

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.server_addr))
            .await
            .map_err(|_| TcpClientError::ConnectionTimeout(millis(self.timeout)))?
            .inspect_err(|e| debug!(server = %self.server_addr, error = %e, "Dial failed"))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Could not disable Nagle");
        }

        info!(server = %self.server_addr, "Connected");
        self.framed = Some(Framed::new(stream, JsonCodec::new()));
        Ok(())
    }

    /// Write one JSON value.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `WriteTimeout`, `Protocol` if `message` does not
    /// serialize, `Io` if the socket fails.
    pub async fn send<T: Serialize>(&mut self, message: T) -> Result<(), TcpClientError> {
        let framed = self.framed.as_mut().ok_or(TcpClientError::NotConnected)?;

        match tokio::time::timeout(self.timeout, framed.send(message)).await {
            Err(_) => Err(TcpClientError::WriteTimeout(millis(self.timeout))),
            Ok(Err(latchkey_core::Error::Io(e))) => Err(TcpClientError::Io(e)),
            Ok(Err(e)) => Err(TcpClientError::Protocol(e)),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Read the next JSON value as raw bytes.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `ReadTimeout` when a response timeout is configured,
    /// `ConnectionLost` at end of stream, `Protocol`/`Io` from the codec.
    pub async fn recv(&mut self) -> Result<Bytes, TcpClientError> {
        let framed = self.framed.as_mut().ok_or(TcpClientError::NotConnected)?;

        let next = match self.response_timeout {
            None => framed.next().await,
            Some(limit) => tokio::time::timeout(limit, framed.next())
                .await
                .map_err(|_| TcpClientError::ReadTimeout(millis(limit)))?,
        };

        match next {
            None => Err(TcpClientError::ConnectionLost(
                "end of stream before an answer".to_string(),
            )),
            Some(Err(latchkey_core::Error::Io(e))) => Err(TcpClientError::Io(e)),
            Some(Err(e)) => Err(TcpClientError::Protocol(e)),
            Some(Ok(frame)) => {
                trace!(bytes = frame.len(), "Answer received");
                Ok(frame)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    /// Flush and shut down the socket, if any.
    ///
    /// Safe to call repeatedly. Each step gets 500ms; failures are logged
    /// and the socket is dropped anyway, so this always returns `Ok`.
    pub async fn close(&mut self) -> Result<(), TcpClientError> {
        let Some(mut framed) = self.framed.take() else {
            return Ok(());
        };
        let grace = Duration::from_millis(500);

        // The sink item type is irrelevant to flushing.
        match tokio::time::timeout(grace, SinkExt::<()>::flush(&mut framed)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Flush on close failed"),
            Err(_) => debug!("Flush on close timed out"),
        }

        let mut stream = framed.into_inner();
        match tokio::time::timeout(grace, stream.shutdown()).await {
            Ok(Ok(())) => debug!(server = %self.server_addr, "Disconnected"),
            Ok(Err(e)) => debug!(error = %e, "Shutdown on close failed"),
            Err(_) => debug!("Shutdown on close timed out"),
        }
        Ok(())
    }
}
