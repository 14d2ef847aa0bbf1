//! Hardware device trait definitions.
//!
//! The widget talks to a single peripheral: a keypad with one status
//! indicator (LED). The trait below is the contract between the keypad state
//! machine and that peripheral, so the same state machine runs against the
//! real driver, the console stand-in, or the test mock.
//!
//! All methods use native `async fn` (Rust 1.90 + Edition 2024 RPITIT),
//! eliminating the need for the `async_trait` macro.

#![allow(async_fn_in_trait)]

use crate::error::Result;

/// Keys a keypad can produce.
pub const KEYPAD_KEYS: &str = "0123456789*#";

/// Returns `true` if `c` is a key on the keypad.
pub fn is_keypad_key(c: char) -> bool {
    KEYPAD_KEYS.contains(c)
}

/// Keypad with a single status indicator.
///
/// # Object Safety
///
/// This trait is NOT object-safe because `async fn` methods return
/// `impl Future`. Use generic type parameters:
///
/// ```no_run
/// use latchkey_hardware::traits::KeypadDevice;
/// use latchkey_hardware::error::Result;
///
/// async fn drain<K: KeypadDevice>(keypad: &mut K) -> Result<String> {
///     let mut keys = String::new();
///     while let Some(key) = keypad.read_key().await? {
///         keys.push(key);
///     }
///     Ok(keys)
/// }
/// ```
pub trait KeypadDevice: Send {
    /// Poll for the next key press.
    ///
    /// Never blocks waiting for a key: returns `Ok(None)` when no new key
    /// has been pressed since the last poll.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is disconnected or a communication
    /// error occurs.
    async fn read_key(&mut self) -> Result<Option<char>>;

    /// Switch the status indicator on or off.
    ///
    /// # Errors
    ///
    /// Returns an error if a communication error occurs.
    async fn set_indicator(&mut self, on: bool) -> Result<()>;

    /// Discard key presses buffered in the device.
    ///
    /// Called once at startup. The default does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if a communication error occurs.
    async fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}
