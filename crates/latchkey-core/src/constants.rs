//! Core constants for the Latchkey door protocol.
//!
//! This module defines the protocol-level constants shared by the door server,
//! the widget client and the keypad state machine. Defaults for network
//! addresses and credentials live here so both binaries agree on them.
//!
//! # Keypad Grammar
//!
//! The widget accumulates key presses until a terminator is entered:
//!
//! | Sequence | Length | Meaning |
//! |----------|--------|---------|
//! | `*#*#*#*#` | 8 | Register this device |
//! | `PPPPPP#` | 7 | Open door with tenant PIN |
//! | `PPPPPP*NNNNNN#` | 14 | Tenant PIN change |
//! | `MMMMMMMM*NNNNNN#` | 16 | Master PIN change |
//!
//! # Usage
//!
//! ```
//! use latchkey_core::constants::*;
//!
//! assert_eq!(KEY_TERMINATOR, '#');
//! assert_eq!(KEYPAD_BUFFER_MAX, 16);
//! assert_eq!(DEFAULT_SERVER_PORT, 9500);
//! ```

// ============================================================================
// Keypad Grammar
// ============================================================================

/// Key that terminates an entry.
pub const KEY_TERMINATOR: char = '#';

/// Key that separates the two halves of a PIN change entry.
pub const KEY_SEPARATOR: char = '*';

/// Hard upper bound on buffered key presses.
///
/// Exceeding it resets the buffer and reports an overflow.
pub const KEYPAD_BUFFER_MAX: usize = 16;

/// Length of a tenant PIN entered on the keypad.
pub const TENANT_PIN_LENGTH: usize = 6;

/// Length of the master PIN entered on the keypad.
pub const MASTER_PIN_LENGTH: usize = 8;

/// Full key sequence that requests device registration.
pub const REGISTER_SEQUENCE: &str = "*#*#*#*#";

/// Prefixes of [`REGISTER_SEQUENCE`] at which `#` does not terminate input.
pub const CONTINUATION_SEQUENCES: [&str; 3] = ["*#", "*#*#", "*#*#*#"];

// ============================================================================
// Wire Protocol
// ============================================================================

/// Default maximum size of a single JSON frame (64 KB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Wire tag for registration requests.
pub const TYPE_REGISTER_DEVICE: &str = "register_device";

/// Wire tag for door-open requests.
pub const TYPE_OPEN_DOOR: &str = "open_door";

/// Wire tag for tenant PIN changes.
pub const TYPE_TENANT_CHANGE_PASSWORD: &str = "tenant_change_password";

/// Wire tag for master PIN changes.
pub const TYPE_MASTER_CHANGE_PASSWORD: &str = "master_change_password";

// ============================================================================
// Server Defaults
// ============================================================================

/// Default TCP port for the door server.
pub const DEFAULT_SERVER_PORT: u16 = 9500;

/// Default master secret, overridable through configuration.
pub const DEFAULT_MASTER_PIN: &str = "12345678";

/// PIN assigned to every pending registration.
pub const DEFAULT_PIN: &str = "123456";

/// Unlock payload assigned to every pending registration.
pub const DEFAULT_UNLOCK_PAYLOAD: &str = "<theflag>";

/// Default file holding enrolled devices.
pub const DEFAULT_REGISTRY_FILE: &str = "registered-widgets.txt";

/// Default file receiving pending registrations.
pub const DEFAULT_PENDING_FILE: &str = "requested-widgets.txt";

/// Lines of the registry file starting with this marker are skipped.
pub const COMMENT_MARKER: char = '#';

// ============================================================================
// Widget Defaults
// ============================================================================

/// Door server address the widget connects to.
pub const DEFAULT_WIDGET_SERVER_ADDR: &str = "192.168.7.1:5000";

/// TCP port on which the widget broadcasts its log lines.
pub const DEFAULT_LOG_PORT: u16 = 6000;

/// Shared device key sent by the widget.
pub const DEFAULT_DEVICE_KEY: &str = "12345";

/// Delay between reconnect attempts, in seconds.
pub const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 10;

/// Connect timeout, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Idle delay between keypad polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Duration of the steady success indication, in milliseconds.
pub const SUCCESS_INDICATION_MS: u64 = 3000;

/// Duration of each on/off phase of the failure indication, in milliseconds.
pub const FAILURE_PULSE_MS: u64 = 300;

/// Number of pulses in the failure indication.
pub const FAILURE_PULSE_COUNT: u32 = 3;
