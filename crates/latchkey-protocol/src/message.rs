//! Request and response messages.
//!
//! # Wire Format
//!
//! Every request is a JSON object carrying a `type` tag:
//!
//! ```text
//! {"type": "register_device", "device_id": "...", "device_key": "..."}
//! {"type": "open_door", "device_id": "...", "device_key": "...", "pin": "123456"}
//! {"type": "tenant_change_password", ..., "current_pin": "...", "new_pin": "..."}
//! {"type": "master_change_password", ..., "master_pin": "...", "new_pin": "..."}
//! ```
//!
//! Responses carry `success` as `0`/`1`, plus `flag` (the unlock payload)
//! only on a successful door open:
//!
//! ```text
//! {"success": 1, "flag": "<theflag>"}
//! {"success": 0}
//! ```

use latchkey_core::constants::{
    TYPE_MASTER_CHANGE_PASSWORD, TYPE_OPEN_DOOR, TYPE_REGISTER_DEVICE,
    TYPE_TENANT_CHANGE_PASSWORD,
};
use latchkey_core::{DeviceId, DeviceKey, Error, Pin, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request sent by a widget to the door server.
///
/// All kinds except [`Request::Register`] are authenticated with the
/// `device_id`/`device_key` pair before anything else happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Ask to be enrolled. Produces a pending entry only.
    #[serde(rename = "register_device")]
    Register {
        device_key: DeviceKey,
        device_id: DeviceId,
    },

    #[serde(rename = "open_door")]
    OpenDoor {
        device_id: DeviceId,
        device_key: DeviceKey,
        pin: Pin,
    },

    /// PIN change proven by the current PIN.
    #[serde(rename = "tenant_change_password")]
    TenantChangePin {
        device_id: DeviceId,
        device_key: DeviceKey,
        current_pin: Pin,
        new_pin: Pin,
    },

    /// PIN change proven by the global master secret.
    #[serde(rename = "master_change_password")]
    MasterChangePin {
        device_id: DeviceId,
        device_key: DeviceKey,
        master_pin: Pin,
        new_pin: Pin,
    },

    /// Well-formed request whose `type` the server does not know.
    ///
    /// Still authenticated, then always refused.
    #[serde(skip)]
    Unknown {
        kind: String,
        device_id: DeviceId,
        device_key: DeviceKey,
    },
}

impl Request {
    /// Parse a raw JSON frame.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `Error::MalformedRequest` if the payload is not a JSON object, the
    ///   `type` tag is not a string, or a known kind has bad/missing fields
    /// - `Error::MissingField` if `type` is absent, or an unknown kind lacks
    ///   the credentials needed to authenticate it
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::MalformedRequest(e.to_string()))?;

        let Value::Object(map) = &value else {
            return Err(Error::MalformedRequest(
                "request is not a JSON object".to_string(),
            ));
        };

        let kind = match map.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => {
                return Err(Error::MalformedRequest(
                    "`type` must be a string".to_string(),
                ));
            }
            None => return Err(Error::MissingField("type".to_string())),
        };

        match kind.as_str() {
            TYPE_REGISTER_DEVICE
            | TYPE_OPEN_DOOR
            | TYPE_TENANT_CHANGE_PASSWORD
            | TYPE_MASTER_CHANGE_PASSWORD => {
                serde_json::from_value(value).map_err(|e| Error::MalformedRequest(e.to_string()))
            }
            _ => Ok(Request::Unknown {
                device_id: DeviceId::new(required_str(map, "device_id")?),
                device_key: DeviceKey::new(required_str(map, "device_key")?),
                kind,
            }),
        }
    }

    /// Wire tag of this request.
    pub fn kind(&self) -> &str {
        match self {
            Request::Register { .. } => TYPE_REGISTER_DEVICE,
            Request::OpenDoor { .. } => TYPE_OPEN_DOOR,
            Request::TenantChangePin { .. } => TYPE_TENANT_CHANGE_PASSWORD,
            Request::MasterChangePin { .. } => TYPE_MASTER_CHANGE_PASSWORD,
            Request::Unknown { kind, .. } => kind,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        match self {
            Request::Register { device_id, .. }
            | Request::OpenDoor { device_id, .. }
            | Request::TenantChangePin { device_id, .. }
            | Request::MasterChangePin { device_id, .. }
            | Request::Unknown { device_id, .. } => device_id,
        }
    }

    pub fn device_key(&self) -> &DeviceKey {
        match self {
            Request::Register { device_key, .. }
            | Request::OpenDoor { device_key, .. }
            | Request::TenantChangePin { device_key, .. }
            | Request::MasterChangePin { device_key, .. }
            | Request::Unknown { device_key, .. } => device_key,
        }
    }

    /// Returns `true` for registration, the only unauthenticated kind.
    pub fn is_register(&self) -> bool {
        matches!(self, Request::Register { .. })
    }
}

fn required_str(map: &Map<String, Value>, name: &str) -> Result<String> {
    match map.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(Error::MalformedRequest(format!("`{name}` must be a string"))),
        None => Err(Error::MissingField(name.to_string())),
    }
}

/// Operation requested by the keypad, before credentials are attached.
///
/// The session channel turns an `Operation` into a [`Request`] by adding the
/// widget's device ID and shared key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Register,
    OpenDoor { pin: Pin },
    ChangePin { current_pin: Pin, new_pin: Pin },
    ChangePinMaster { master_pin: Pin, new_pin: Pin },
}

impl Operation {
    /// Attach credentials, producing the request sent on the wire.
    pub fn into_request(self, device_id: DeviceId, device_key: DeviceKey) -> Request {
        match self {
            Operation::Register => Request::Register {
                device_key,
                device_id,
            },
            Operation::OpenDoor { pin } => Request::OpenDoor {
                device_id,
                device_key,
                pin,
            },
            Operation::ChangePin {
                current_pin,
                new_pin,
            } => Request::TenantChangePin {
                device_id,
                device_key,
                current_pin,
                new_pin,
            },
            Operation::ChangePinMaster {
                master_pin,
                new_pin,
            } => Request::MasterChangePin {
                device_id,
                device_key,
                master_pin,
                new_pin,
            },
        }
    }

    /// Short human-readable name used in log lines.
    pub fn describe(&self) -> &'static str {
        match self {
            Operation::Register => "Registration",
            Operation::OpenDoor { .. } => "Door open",
            Operation::ChangePin { .. } | Operation::ChangePinMaster { .. } => "Password change",
        }
    }
}

/// Server answer to exactly one [`Request`].
///
/// `unlock_payload` is only ever present alongside `success == true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(with = "success_flag")]
    pub success: bool,

    #[serde(rename = "flag", default, skip_serializing_if = "Option::is_none")]
    pub unlock_payload: Option<String>,
}

impl Response {
    /// Build a response, discarding any payload on failure.
    pub fn new(success: bool, unlock_payload: Option<String>) -> Self {
        Self {
            success,
            unlock_payload: unlock_payload.filter(|_| success),
        }
    }

    pub fn success() -> Self {
        Self::new(true, None)
    }

    pub fn failure() -> Self {
        Self::new(false, None)
    }

    /// Successful door open releasing the device's payload.
    pub fn unlocked(unlock_payload: Option<String>) -> Self {
        Self::new(true, unlock_payload)
    }

    /// Parse a raw JSON frame received by the widget.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedResponse` if the frame is not JSON or lacks a
    /// usable `success` field.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let response: Response = serde_json::from_slice(payload)
            .map_err(|e| Error::MalformedResponse(e.to_string()))?;
        Ok(Self::new(response.success, response.unlock_payload))
    }
}

/// `success` is written as `0`/`1` and read from either an integer or a bool.
mod success_flag {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Flag::deserialize(deserializer) {
            Ok(Flag::Bool(b)) => Ok(b),
            Ok(Flag::Int(i)) => Ok(i != 0),
            Err(_) => Err(de::Error::custom("`success` must be 0/1 or a boolean")),
        }
    }
}
