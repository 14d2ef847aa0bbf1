//! Keypad driver errors.

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Failure of the keypad or its indicator.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// The key source is gone and will not produce keys again.
    #[error("{device} disconnected")]
    Disconnected { device: String },

    /// Driver I/O failure.
    #[error("Keypad I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// `true` when retrying the device is pointless.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}
