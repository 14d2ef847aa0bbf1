//! Mock keypad implementation for testing and development.
//!
//! Key presses are injected through a [`MockKeypadHandle`]; every indicator
//! change is recorded so tests can assert on the blink pattern.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::{HardwareError, Result, traits::KeypadDevice};

const DEVICE_NAME: &str = "mock keypad";

/// Mock keypad device for testing and development.
///
/// # Examples
///
/// ```
/// use latchkey_hardware::mock::MockKeypad;
/// use latchkey_hardware::traits::KeypadDevice;
///
/// #[tokio::main]
/// async fn main() -> latchkey_hardware::Result<()> {
///     let (mut keypad, handle) = MockKeypad::new();
///
///     handle.send_keys("12#").await?;
///
///     assert_eq!(keypad.read_key().await?, Some('1'));
///     assert_eq!(keypad.read_key().await?, Some('2'));
///     assert_eq!(keypad.read_key().await?, Some('#'));
///     assert_eq!(keypad.read_key().await?, None);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockKeypad {
    /// Channel receiver for simulated key presses
    input_rx: mpsc::Receiver<char>,

    /// Indicator changes, shared with handles and probes
    indicator: IndicatorProbe,
}

impl MockKeypad {
    /// Create a new mock keypad.
    ///
    /// Returns the keypad and a handle used to simulate key presses.
    pub fn new() -> (Self, MockKeypadHandle) {
        let (input_tx, input_rx) = mpsc::channel(64);
        let indicator = IndicatorProbe::default();

        let keypad = Self {
            input_rx,
            indicator: indicator.clone(),
        };
        let handle = MockKeypadHandle {
            input_tx,
            indicator,
        };

        (keypad, handle)
    }
}

impl KeypadDevice for MockKeypad {
    async fn read_key(&mut self) -> Result<Option<char>> {
        match self.input_rx.try_recv() {
            Ok(key) => Ok(Some(key)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(HardwareError::disconnected(DEVICE_NAME)),
        }
    }

    async fn set_indicator(&mut self, on: bool) -> Result<()> {
        self.indicator.record(on);
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        while self.input_rx.try_recv().is_ok() {}
        Ok(())
    }
}

/// Handle for controlling a mock keypad.
///
/// Dropping every handle disconnects the keypad: once the buffered keys are
/// consumed, [`KeypadDevice::read_key`] fails with `Disconnected`.
#[derive(Debug, Clone)]
pub struct MockKeypadHandle {
    /// Channel sender for simulated key presses
    input_tx: mpsc::Sender<char>,

    indicator: IndicatorProbe,
}

impl MockKeypadHandle {
    /// Simulate one key press.
    ///
    /// # Errors
    ///
    /// Returns an error if the keypad has been dropped.
    pub async fn send_key(&self, key: char) -> Result<()> {
        self.input_tx
            .send(key)
            .await
            .map_err(|_| HardwareError::disconnected(DEVICE_NAME))
    }

    /// Simulate a sequence of key presses, e.g. `"123456#"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the keypad has been dropped.
    pub async fn send_keys(&self, keys: &str) -> Result<()> {
        for key in keys.chars() {
            self.send_key(key).await?;
        }
        Ok(())
    }

    /// Observer of indicator changes that does not keep the keypad connected.
    pub fn probe(&self) -> IndicatorProbe {
        self.indicator.clone()
    }

    pub fn indicator_history(&self) -> Vec<bool> {
        self.indicator.history()
    }

    pub fn indicator_on(&self) -> bool {
        self.indicator.is_on()
    }
}

/// Record of indicator changes made by a [`MockKeypad`].
#[derive(Debug, Clone, Default)]
pub struct IndicatorProbe {
    changes: Arc<Mutex<Vec<bool>>>,
}

impl IndicatorProbe {
    fn lock(&self) -> MutexGuard<'_, Vec<bool>> {
        // Poisoning only means another test thread panicked mid-push.
        self.changes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, on: bool) {
        self.lock().push(on);
    }

    /// Every indicator change, oldest first.
    pub fn history(&self) -> Vec<bool> {
        self.lock().clone()
    }

    /// Current indicator state (off until first switched on).
    pub fn is_on(&self) -> bool {
        self.lock().last().copied().unwrap_or(false)
    }

    /// Number of times the indicator was switched on.
    pub fn pulses(&self) -> usize {
        self.lock().iter().filter(|on| **on).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
