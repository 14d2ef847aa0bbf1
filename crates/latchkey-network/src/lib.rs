//! Network communication layer for Latchkey
//!
//! This crate provides the TCP transport between widgets and the door server,
//! plus the widget's remote log sink. All framing goes through
//! [`JsonCodec`](latchkey_protocol::JsonCodec).
//!
//! # Components
//!
//! - **TcpServer**: accepts widget connections and answers every request
//!   through a [`FrameHandler`]
//! - **TcpClient**: single connection to the door server, with timeouts
//! - **SessionChannel**: self-healing client session that reconnects and
//!   retries until a request gets an answer
//! - **LogBroadcaster**: fans log lines out to every `nc` listener
//!
//! # Example
//!
//! ```no_run
//! use latchkey_core::{DeviceId, DeviceKey, Pin};
//! use latchkey_network::{RetryPolicy, SessionChannel, TcpClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TcpClientConfig::new("192.168.7.1:5000".parse()?);
//! let mut session = SessionChannel::new(
//!     client,
//!     RetryPolicy::default(),
//!     DeviceId::from("b827eb000001"),
//!     DeviceKey::from("12345"),
//! );
//!
//! if session.open_door(Pin::from("123456")).await {
//!     println!("door open");
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod log_sink;
mod server;
mod session;

pub use client::{TcpClient, TcpClientConfig, TcpClientError};
pub use log_sink::{LogBroadcaster, LogPublisher, LogSinkConfig};
pub use server::{FrameHandler, TcpServer, TcpServerConfig, TcpServerError};
pub use session::{RetryPolicy, SessionChannel, SessionError};
