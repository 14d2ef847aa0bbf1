//! Self-healing widget session.
//!
//! The widget keeps one connection to the door server. Every operation first
//! makes sure that connection exists (reconnecting with a fixed backoff),
//! then sends the request and waits for the answer. If the transport fails
//! mid-exchange the connection is dropped and the same request is sent again
//! on a fresh one. A response that arrives but cannot be understood is a
//! final answer: the request is not repeated.

use std::time::Duration;

use bytes::Bytes;
use latchkey_core::constants::DEFAULT_RECONNECT_BACKOFF_SECS;
use latchkey_core::{DeviceId, DeviceKey, Pin};
use latchkey_protocol::{Operation, Request, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{TcpClient, TcpClientConfig, TcpClientError};

/// How the session retries after transport failures.
///
/// ```
/// use latchkey_network::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_backoff(Duration::from_secs(2))
///     .with_max_attempts(5);
/// assert_eq!(policy.max_attempts, Some(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after a failed connect before the next attempt.
    pub backoff: Duration,

    /// Failed attempts tolerated per call; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(DEFAULT_RECONNECT_BACKOFF_SECS),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    fn exhausted(&self, failed_attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| failed_attempts >= max)
    }
}

/// Errors surfaced by [`SessionChannel::call`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The retry budget ran out before any response arrived
    #[error("Gave up after {attempts} failed attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: TcpClientError,
    },

    /// The server answered with something that is not a valid response, or
    /// the request could not be encoded
    #[error("Protocol anomaly: {0}")]
    ProtocolAnomaly(#[source] latchkey_core::Error),
}

/// Why a round trip failed.
enum ExchangeError {
    /// The request itself cannot be put on the wire.
    Encode(latchkey_core::Error),
    /// The answer's framing is broken; the rest of the stream is unusable.
    Malformed(latchkey_core::Error),
    /// The connection broke; worth retrying on a new one.
    Transport(TcpClientError),
}

/// The widget's connection to the door server.
///
/// Calls are strictly sequential (`&mut self`): one request, one response.
pub struct SessionChannel {
    client: TcpClient,
    retry: RetryPolicy,
    device_id: DeviceId,
    device_key: DeviceKey,
}

impl SessionChannel {
    /// Create a session. No connection is made until the first call.
    pub fn new(
        client: TcpClientConfig,
        retry: RetryPolicy,
        device_id: DeviceId,
        device_key: DeviceKey,
    ) -> Self {
        Self {
            client: TcpClient::new(client),
            retry,
            device_id,
            device_key,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Send `operation` with this widget's credentials and wait for the
    /// server's answer.
    ///
    /// # Errors
    ///
    /// - `RetriesExhausted` if a retry cap is configured and reached
    /// - `ProtocolAnomaly` if the answer is not a valid response
    pub async fn call(&mut self, operation: Operation) -> Result<Response, SessionError> {
        let request = operation.into_request(self.device_id.clone(), self.device_key.clone());
        let mut failed_attempts = 0u32;

        let frame = loop {
            if !self.client.is_connected() {
                if let Err(e) = self.client.connect().await {
                    failed_attempts += 1;
                    warn!(
                        server = %self.client.server_addr(),
                        error = %e,
                        "Failed to connect to server. Retrying in {} seconds...",
                        self.retry.backoff.as_secs_f32()
                    );
                    if self.retry.exhausted(failed_attempts) {
                        return Err(SessionError::RetriesExhausted {
                            attempts: failed_attempts,
                            last_error: e,
                        });
                    }
                    tokio::time::sleep(self.retry.backoff).await;
                    continue;
                }
            }

            match self.exchange(&request).await {
                Ok(frame) => break frame,
                Err(ExchangeError::Encode(e)) => return Err(SessionError::ProtocolAnomaly(e)),
                Err(ExchangeError::Malformed(e)) => {
                    warn!(error = %e, "Unreadable answer from server, not resending");
                    let _ = self.client.close().await;
                    return Err(SessionError::ProtocolAnomaly(e));
                }
                Err(ExchangeError::Transport(e)) => {
                    failed_attempts += 1;
                    warn!(error = %e, "Lost connection to server, resending on a new connection");
                    let _ = self.client.close().await;
                    if self.retry.exhausted(failed_attempts) {
                        return Err(SessionError::RetriesExhausted {
                            attempts: failed_attempts,
                            last_error: e,
                        });
                    }
                }
            }
        };

        let response = Response::parse(&frame).map_err(SessionError::ProtocolAnomaly)?;
        if let Some(payload) = &response.unlock_payload {
            info!("Got unlock payload \"{}\"", payload);
        }
        Ok(response)
    }

    /// One request/response round trip on the current connection.
    async fn exchange(&mut self, request: &Request) -> Result<Bytes, ExchangeError> {
        match self.client.send(request).await {
            Ok(()) => {}
            Err(TcpClientError::Protocol(e)) => return Err(ExchangeError::Encode(e)),
            Err(e) => return Err(ExchangeError::Transport(e)),
        }
        debug!(kind = request.kind(), "Request sent");
        match self.client.recv().await {
            Ok(frame) => Ok(frame),
            Err(TcpClientError::Protocol(e)) => Err(ExchangeError::Malformed(e)),
            Err(e) => Err(ExchangeError::Transport(e)),
        }
    }

    async fn succeeded(&mut self, operation: Operation) -> bool {
        let action = operation.describe();
        match self.call(operation).await {
            Ok(response) => response.success,
            Err(e) => {
                warn!(error = %e, "{} request failed", action);
                false
            }
        }
    }

    /// Ask to be enrolled.
    pub async fn register(&mut self) -> bool {
        self.succeeded(Operation::Register).await
    }

    pub async fn open_door(&mut self, pin: Pin) -> bool {
        self.succeeded(Operation::OpenDoor { pin }).await
    }

    /// Change the PIN, proving the current one.
    pub async fn change_pin(&mut self, current_pin: Pin, new_pin: Pin) -> bool {
        self.succeeded(Operation::ChangePin {
            current_pin,
            new_pin,
        })
        .await
    }

    /// Change the PIN with the master secret.
    pub async fn change_pin_master(&mut self, master_pin: Pin, new_pin: Pin) -> bool {
        self.succeeded(Operation::ChangePinMaster {
            master_pin,
            new_pin,
        })
        .await
    }

    /// Close the connection, if any.
    pub async fn close(&mut self) {
        let _ = self.client.close().await;
    }
}
