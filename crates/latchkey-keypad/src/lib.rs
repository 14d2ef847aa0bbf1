//! Keypad front end of the Latchkey widget.
//!
//! [`KeypadBuffer`] is the pure input state machine: it turns a stream of
//! polled keys into recognized commands, invalid entries and overflows.
//! [`KeypadController`] wires it between a
//! [`KeypadDevice`](latchkey_hardware::KeypadDevice) and a [`DoorClient`],
//! and reports each result on the status indicator.
//!
//! # Example
//!
//! ```no_run
//! use latchkey_core::{DeviceId, DeviceKey};
//! use latchkey_hardware::ConsoleKeypad;
//! use latchkey_keypad::{KeypadConfig, KeypadController};
//! use latchkey_network::{RetryPolicy, SessionChannel, TcpClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SessionChannel::new(
//!     TcpClientConfig::default(),
//!     RetryPolicy::default(),
//!     DeviceId::from("b827eb000001"),
//!     DeviceKey::from("12345"),
//! );
//! let mut controller =
//!     KeypadController::new(ConsoleKeypad::stdin(), session, KeypadConfig::default());
//! controller.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod controller;

pub use buffer::{InputOutcome, KeypadBuffer, KeypadCommand};
pub use controller::{DoorClient, KeypadConfig, KeypadController};
