//! Persisted records.
//!
//! Field names match the JSON-lines files the door server has always
//! written (`device_id`, `device_key`, `pin`, `flag`), so existing files load
//! unchanged.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use latchkey_core::constants::{DEFAULT_PIN, DEFAULT_UNLOCK_PAYLOAD};
use latchkey_core::{DeviceId, DeviceKey, Pin};
use serde::{Deserialize, Serialize};

/// An enrolled widget.
///
/// # Examples
///
/// ```
/// use latchkey_registry::models::Device;
///
/// let device: Device = serde_json::from_str(
///     r#"{"device_id": "b827eb000001", "device_key": "12345", "pin": "123456", "flag": "<theflag>"}"#,
/// ).unwrap();
///
/// assert_eq!(device.device_id.as_str(), "b827eb000001");
/// assert_eq!(device.unlock_payload.as_deref(), Some("<theflag>"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub device_key: DeviceKey,
    pub pin: Pin,

    /// Released on a successful door open.
    #[serde(rename = "flag", default)]
    pub unlock_payload: Option<String>,
}

impl Device {
    pub fn new(device_id: DeviceId, device_key: DeviceKey, pin: Pin) -> Self {
        Self {
            device_id,
            device_key,
            pin,
            unlock_payload: None,
        }
    }

    pub fn with_unlock_payload(mut self, payload: impl Into<String>) -> Self {
        self.unlock_payload = Some(payload.into());
        self
    }
}

/// A registration request awaiting manual promotion into the registry.
///
/// Carries the default PIN and unlock payload, so an operator can move the
/// line into the registry file as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRegistration {
    pub device_id: DeviceId,
    pub device_key: DeviceKey,
    pub pin: Pin,

    #[serde(rename = "flag")]
    pub unlock_payload: String,

    pub requested_at: DateTime<Utc>,

    /// Remote address the request came from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

impl PendingRegistration {
    pub fn new(device_key: DeviceKey, device_id: DeviceId) -> Self {
        Self {
            device_id,
            device_key,
            pin: Pin::from(DEFAULT_PIN),
            unlock_payload: DEFAULT_UNLOCK_PAYLOAD.to_string(),
            requested_at: Utc::now(),
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer.to_string());
        self
    }
}

impl From<PendingRegistration> for Device {
    fn from(pending: PendingRegistration) -> Self {
        Device::new(pending.device_id, pending.device_key, pending.pin)
            .with_unlock_payload(pending.unlock_payload)
    }
}
