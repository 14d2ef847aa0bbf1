//! Remote log sink.
//!
//! The widget has no console in the field. Instead it listens on a TCP port
//! and copies every log line to whoever is connected:
//!
//! ```text
//! $ nc 192.168.7.2 6000
//! 2026-10-16T09:12:44Z  INFO latchkey_keypad: Door open successful
//! ```
//!
//! Publishing never blocks and never fails. Lines wait in a bounded queue;
//! when it is full (listeners stalling) new lines are discarded. Listeners
//! only receive lines published after they connect; a listener whose write
//! fails or stalls is dropped.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use latchkey_core::constants::DEFAULT_LOG_PORT;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tracing_subscriber::fmt::MakeWriter;

use crate::server::TcpServerError;

/// Per-listener write deadline.
const LISTENER_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lines held while the dispatch task is busy.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Configuration for the log sink.
#[derive(Debug, Clone)]
pub struct LogSinkConfig {
    pub bind_addr: SocketAddr,
    /// Lines queued for dispatch before further lines are discarded.
    pub queue_capacity: usize,
}

impl LogSinkConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_LOG_PORT)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

type Listeners = Arc<Mutex<Vec<(SocketAddr, TcpStream)>>>;

/// Broadcasts text lines to every connected TCP listener.
///
/// Runs two tasks: one accepts listeners, the other writes queued lines to
/// them. Both stop when the broadcaster is dropped.
///
/// # Example
///
/// ```no_run
/// use latchkey_network::{LogBroadcaster, LogSinkConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = LogBroadcaster::bind(LogSinkConfig::default()).await?;
/// sink.publish("INFO: widget started");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LogBroadcaster {
    publisher: LogPublisher,
    local_addr: SocketAddr,
    listeners: Listeners,
    accept_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

impl LogBroadcaster {
    /// Bind the listening socket and start the accept and dispatch tasks.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the port cannot be bound.
    pub async fn bind(config: LogSinkConfig) -> Result<Self, TcpServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| TcpServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let listeners: Listeners = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        let accept_task = tokio::spawn(accept_listeners(listener, Arc::clone(&listeners)));
        let dispatch_task = tokio::spawn(dispatch_lines(rx, Arc::clone(&listeners)));

        Ok(Self {
            publisher: LogPublisher { tx },
            local_addr,
            listeners,
            accept_task,
            dispatch_task,
        })
    }

    /// Queue `text` for every current listener. A trailing newline is added
    /// if missing.
    pub fn publish(&self, text: impl Into<String>) {
        self.publisher.publish(text);
    }

    /// Cloneable handle that publishes to this broadcaster.
    pub fn publisher(&self) -> LogPublisher {
        self.publisher.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected listeners.
    pub async fn listener_count(&self) -> usize {
        self.listeners.lock().await.len()
    }
}

impl Drop for LogBroadcaster {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.dispatch_task.abort();
    }
}

async fn accept_listeners(listener: TcpListener, listeners: Listeners) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(listener = %addr, "Log listener connected");
                listeners.lock().await.push((addr, stream));
            }
            Err(e) => {
                warn!(error = %e, "Log sink accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn dispatch_lines(mut rx: mpsc::Receiver<String>, listeners: Listeners) {
    while let Some(line) = rx.recv().await {
        let mut listeners = listeners.lock().await;
        let mut alive = Vec::with_capacity(listeners.len());

        for (addr, mut stream) in listeners.drain(..) {
            match tokio::time::timeout(LISTENER_WRITE_TIMEOUT, stream.write_all(line.as_bytes()))
                .await
            {
                Ok(Ok(())) => alive.push((addr, stream)),
                Ok(Err(e)) => debug!(listener = %addr, error = %e, "Dropping log listener"),
                Err(_) => debug!(listener = %addr, "Dropping stalled log listener"),
            }
        }

        *listeners = alive;
    }
}

/// Cheap handle for publishing to a [`LogBroadcaster`].
///
/// Also a [`MakeWriter`], so a `tracing_subscriber` fmt layer can write
/// straight into the sink:
///
/// ```no_run
/// use latchkey_network::{LogBroadcaster, LogSinkConfig};
/// use tracing_subscriber::prelude::*;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = LogBroadcaster::bind(LogSinkConfig::default()).await?;
/// tracing_subscriber::registry()
///     .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(sink.publisher()))
///     .init();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LogPublisher {
    tx: mpsc::Sender<String>,
}

impl LogPublisher {
    /// Queue one line. Silently dropped when the queue is full or the
    /// broadcaster is gone.
    pub fn publish(&self, text: impl Into<String>) {
        let mut line = text.into();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        // No tracing here: this runs inside the subscriber's writer.
        let _ = self.tx.try_send(line);
    }
}

impl io::Write for LogPublisher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.publish(String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogPublisher {
    type Writer = LogPublisher;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
