use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Stable hardware identifier of a widget.
///
/// Any string is accepted; registry lookups are exact matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device ID from any string.
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    /// Get the device ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        DeviceId::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        DeviceId(id)
    }
}

/// Shared secret proving a widget's identity.
///
/// # Security
/// Comparison runs in constant time and `Debug` never prints the value.
#[derive(Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(key: impl Into<String>) -> Self {
        DeviceKey(key.into())
    }

    /// Expose the raw key, e.g. for serialization into a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl PartialEq for DeviceKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("DeviceKey(<redacted>)")
    }
}

impl From<&str> for DeviceKey {
    fn from(key: &str) -> Self {
        DeviceKey::new(key)
    }
}

/// User-facing unlock code.
///
/// PINs are opaque strings compared exactly; the keypad produces six digit
/// tenant PINs and eight digit master PINs, but the server does not enforce
/// a format.
///
/// # Security
/// Comparison runs in constant time to avoid leaking how many leading
/// characters matched.
#[derive(Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pin(String);

impl Pin {
    pub fn new(pin: impl Into<String>) -> Self {
        Pin(pin.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Pin {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Pin({})", "*".repeat(self.0.chars().count()))
    }
}

impl From<&str> for Pin {
    fn from(pin: &str) -> Self {
        Pin::new(pin)
    }
}
