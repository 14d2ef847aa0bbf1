//! Door server request handling.
//!
//! One inbound frame in, one [`Response`] out. The flow mirrors the order in
//! which trust is established:
//!
//! 1. Parse the frame (malformed → `{"success":0}`)
//! 2. Registration requests are logged as pending and always acknowledged
//! 3. Everything else must present a matching `device_id`/`device_key`
//! 4. Dispatch on the request kind
//!
//! Nothing in here returns an error to the connection loop: every failure
//! becomes `{"success":0}`, and the connection stays open.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use latchkey_core::constants::DEFAULT_MASTER_PIN;
use latchkey_core::{DeviceId, DeviceKey, Pin};
use latchkey_network::FrameHandler;
use latchkey_protocol::{Request, Response};
use tracing::{debug, error, info, warn};

use crate::models::PendingRegistration;
use crate::pending::PendingLog;
use crate::registry::{DeviceRegistry, PinCheck};
use crate::store::DeviceStore;

/// Handler configuration.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Global secret that authorizes a PIN reset without the current PIN.
    pub master_pin: Pin,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            master_pin: Pin::from(DEFAULT_MASTER_PIN),
        }
    }
}

/// Answers widget requests against a [`DeviceRegistry`] and a [`PendingLog`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use latchkey_core::{DeviceId, DeviceKey, Pin};
/// use latchkey_registry::{
///     Device, DeviceRegistry, HandlerConfig, MemoryPendingLog, MemoryStore, RequestHandler,
/// };
///
/// # async fn example() -> latchkey_registry::StorageResult<()> {
/// let store = MemoryStore::new(vec![
///     Device::new(DeviceId::from("abc"), DeviceKey::from("12345"), Pin::from("123456"))
///         .with_unlock_payload("<theflag>"),
/// ]);
/// let handler = RequestHandler::new(
///     Arc::new(DeviceRegistry::load(store).await?),
///     Arc::new(MemoryPendingLog::new()),
///     HandlerConfig::default(),
/// );
///
/// let response = handler
///     .handle(
///         br#"{"type":"open_door","device_id":"abc","device_key":"12345","pin":"123456"}"#,
///         None,
///     )
///     .await;
/// assert!(response.success);
/// assert_eq!(response.unlock_payload.as_deref(), Some("<theflag>"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RequestHandler<S, P> {
    registry: Arc<DeviceRegistry<S>>,
    pending: Arc<P>,
    config: HandlerConfig,
}

impl<S: DeviceStore, P: PendingLog> RequestHandler<S, P> {
    pub fn new(registry: Arc<DeviceRegistry<S>>, pending: Arc<P>, config: HandlerConfig) -> Self {
        Self {
            registry,
            pending,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry<S>> {
        &self.registry
    }

    /// Produce the answer to one raw request.
    ///
    /// `peer` is only used for logging and for the pending log entry.
    pub async fn handle(&self, payload: &[u8], peer: Option<SocketAddr>) -> Response {
        let request = match Request::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = ?peer, error = %e, "Rejecting malformed request");
                return Response::failure();
            }
        };
        debug!(peer = ?peer, kind = request.kind(), device_id = %request.device_id(), "Request");

        if let Request::Register {
            device_key,
            device_id,
        } = request
        {
            return self.register(device_key, device_id, peer).await;
        }

        if !self
            .registry
            .verify_key(request.device_id(), request.device_key())
            .await
        {
            warn!(
                peer = ?peer,
                device_id = %request.device_id(),
                kind = request.kind(),
                "Access denied: unknown device or bad device key"
            );
            return Response::failure();
        }

        match request {
            Request::OpenDoor { device_id, pin, .. } => self.open_door(&device_id, &pin).await,
            Request::MasterChangePin {
                device_id,
                master_pin,
                new_pin,
                ..
            } => self.master_change_pin(&device_id, &master_pin, new_pin).await,
            Request::TenantChangePin {
                device_id,
                current_pin,
                new_pin,
                ..
            } => {
                self.tenant_change_pin(&device_id, &current_pin, new_pin)
                    .await
            }
            Request::Unknown {
                kind, device_id, ..
            } => {
                warn!(device_id = %device_id, kind = %kind, "Unknown request kind");
                Response::failure()
            }
            // Handled before authentication.
            Request::Register { .. } => Response::failure(),
        }
    }

    async fn register(
        &self,
        device_key: DeviceKey,
        device_id: DeviceId,
        peer: Option<SocketAddr>,
    ) -> Response {
        let mut registration = PendingRegistration::new(device_key, device_id);
        if let Some(peer) = peer {
            registration = registration.with_peer(peer);
        }
        let device_id = registration.device_id.clone();

        match self.pending.record(registration).await {
            Ok(()) => info!(device_id = %device_id, "Registration request recorded"),
            Err(e) => error!(
                device_id = %device_id,
                error = %e,
                "Failed to record registration request"
            ),
        }
        Response::success()
    }

    async fn open_door(&self, device_id: &DeviceId, pin: &Pin) -> Response {
        match self.registry.verify_pin(device_id, pin).await {
            PinCheck::Match(payload) => {
                info!(device_id = %device_id, "Door opened");
                Response::unlocked(payload)
            }
            PinCheck::Mismatch => {
                warn!(device_id = %device_id, "Door open refused: wrong PIN");
                Response::failure()
            }
        }
    }

    async fn master_change_pin(
        &self,
        device_id: &DeviceId,
        master_pin: &Pin,
        new_pin: Pin,
    ) -> Response {
        if *master_pin != self.config.master_pin {
            warn!(device_id = %device_id, "PIN change refused: wrong master secret");
            return Response::failure();
        }
        self.change_pin(device_id, new_pin).await
    }

    async fn tenant_change_pin(
        &self,
        device_id: &DeviceId,
        current_pin: &Pin,
        new_pin: Pin,
    ) -> Response {
        match self.registry.change_pin_if(device_id, current_pin, new_pin).await {
            Ok(true) => Response::success(),
            Ok(false) => {
                warn!(device_id = %device_id, "PIN change refused: wrong current PIN");
                Response::failure()
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to persist PIN change");
                Response::failure()
            }
        }
    }

    async fn change_pin(&self, device_id: &DeviceId, new_pin: Pin) -> Response {
        match self.registry.update_pin(device_id, new_pin).await {
            Ok(true) => Response::success(),
            Ok(false) => Response::failure(),
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to persist PIN change");
                Response::failure()
            }
        }
    }
}

impl<S, P> FrameHandler for RequestHandler<S, P>
where
    S: DeviceStore + 'static,
    P: PendingLog + 'static,
{
    async fn handle(&self, frame: Bytes, peer: SocketAddr) -> Response {
        RequestHandler::handle(self, &frame, Some(peer)).await
    }
}
