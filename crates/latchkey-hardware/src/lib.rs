//! Keypad and indicator abstraction for the Latchkey widget.
//!
//! The widget's only peripheral is a keypad with a single status LED. This
//! crate defines that capability as a trait and ships two implementations:
//!
//! - [`MockKeypad`]: programmatic key injection and indicator recording, for
//!   tests;
//! - [`ConsoleKeypad`]: key presses read from stdin, for running the widget
//!   on a development machine.
//!
//! # Design Philosophy
//!
//! - **Async-first**: native `async fn` in traits (Rust 1.90 + Edition 2024).
//! - **Polling**: [`KeypadDevice::read_key`] never blocks; `Ok(None)` means
//!   no new key, matching how the keypad controller polls the hardware.
//! - **Error-aware**: all operations return [`Result<T>`][error::Result].
//!
//! # Indicator Patterns
//!
//! [`indicate_success`] holds the indicator on (3 s by default);
//! [`indicate_failure`] blinks it (three 0.3 s pulses by default). Timings are
//! carried by [`IndicatorTiming`].
//!
//! ```no_run
//! use latchkey_hardware::{IndicatorTiming, KeypadDevice, indicate_success};
//!
//! async fn welcome<K: KeypadDevice>(keypad: &mut K) -> latchkey_hardware::Result<()> {
//!     keypad.reset().await?;
//!     indicate_success(keypad, &IndicatorTiming::default()).await
//! }
//! ```
//!
//! [`KeypadDevice::read_key`]: traits::KeypadDevice::read_key

pub mod console;
pub mod error;
pub mod indicator;
pub mod mock;
pub mod traits;

// Re-export commonly used types for convenience
pub use console::ConsoleKeypad;
pub use error::{HardwareError, Result};
pub use indicator::{IndicatorTiming, indicate_failure, indicate_success};
pub use mock::{MockKeypad, MockKeypadHandle};
pub use traits::{KeypadDevice, is_keypad_key};
