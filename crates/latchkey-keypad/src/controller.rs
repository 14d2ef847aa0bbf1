//! Widget main loop: poll the keypad, act on complete entries, signal the
//! result on the indicator.

#![allow(async_fn_in_trait)]

use std::time::Duration;

use latchkey_core::constants::DEFAULT_POLL_INTERVAL_MS;
use latchkey_hardware::{
    IndicatorTiming, KeypadDevice, Result, indicate_failure, indicate_success,
};
use latchkey_network::SessionChannel;
use latchkey_protocol::Operation;
use tracing::{debug, info, warn};

use crate::buffer::{InputOutcome, KeypadBuffer};

/// Executes recognized operations against the door server.
///
/// [`SessionChannel`] is the production implementation; tests substitute a
/// scripted one.
pub trait DoorClient {
    /// Run `operation`, returning whether the server granted it.
    async fn submit(&mut self, operation: Operation) -> bool;
}

impl DoorClient for SessionChannel {
    async fn submit(&mut self, operation: Operation) -> bool {
        match operation {
            Operation::Register => self.register().await,
            Operation::OpenDoor { pin } => self.open_door(pin).await,
            Operation::ChangePin {
                current_pin,
                new_pin,
            } => self.change_pin(current_pin, new_pin).await,
            Operation::ChangePinMaster {
                master_pin,
                new_pin,
            } => self.change_pin_master(master_pin, new_pin).await,
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeypadConfig {
    /// Delay after a poll that produced no key.
    pub poll_interval: Duration,
    pub timing: IndicatorTiming,
}

impl Default for KeypadConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timing: IndicatorTiming::default(),
        }
    }
}

/// Drives a [`KeypadBuffer`] from a keypad and sends the resulting commands
/// through a [`DoorClient`].
///
/// Strictly sequential: while a command is in flight (including reconnect
/// waits) no keys are read, and key presses stay queued in the device.
pub struct KeypadController<K, D> {
    keypad: K,
    door: D,
    buffer: KeypadBuffer,
    config: KeypadConfig,
}

impl<K: KeypadDevice, D: DoorClient> KeypadController<K, D> {
    pub fn new(keypad: K, door: D, config: KeypadConfig) -> Self {
        Self {
            keypad,
            door,
            buffer: KeypadBuffer::new(),
            config,
        }
    }

    /// Poll once and act on the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the keypad fails to read a key or switch the
    /// indicator.
    pub async fn step(&mut self) -> Result<InputOutcome> {
        let key = self.keypad.read_key().await?;
        if key.is_none() {
            tokio::time::sleep(self.config.poll_interval).await;
            return Ok(InputOutcome::Pending);
        }

        let outcome = self.buffer.push(key);
        match &outcome {
            InputOutcome::Pending => {}
            InputOutcome::Dispatch(command) => {
                let operation = Operation::from(command.clone());
                let action = operation.describe();
                debug!(command = %command, "Entry recognized");

                if self.door.submit(operation).await {
                    info!("{} successful", action);
                    indicate_success(&mut self.keypad, &self.config.timing).await?;
                } else {
                    warn!("{} failed", action);
                    indicate_failure(&mut self.keypad, &self.config.timing).await?;
                }
            }
            InputOutcome::InvalidEntry => {
                warn!("Invalid entry");
                indicate_failure(&mut self.keypad, &self.config.timing).await?;
            }
            InputOutcome::Overflow => {
                warn!("Input too long, discarded");
                indicate_failure(&mut self.keypad, &self.config.timing).await?;
            }
        }
        Ok(outcome)
    }

    /// Discard stale key presses, then poll forever.
    ///
    /// # Errors
    ///
    /// Returns the first keypad error; the loop does not survive a
    /// disconnected device.
    pub async fn run(&mut self) -> Result<()> {
        self.keypad.reset().await?;
        self.buffer.clear();
        info!("Keypad ready");

        loop {
            self.step().await?;
        }
    }

    pub fn keypad(&self) -> &K {
        &self.keypad
    }

    pub fn door(&self) -> &D {
        &self.door
    }

    /// Keys buffered so far in the current entry.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::Pin;
    use latchkey_hardware::{HardwareError, MockKeypad, MockKeypadHandle};
    use std::collections::VecDeque;

    /// Records submitted operations and answers from a script (default: grant).
    #[derive(Default)]
    struct ScriptedDoor {
        submitted: Vec<Operation>,
        answers: VecDeque<bool>,
    }

    impl ScriptedDoor {
        fn answering(answers: &[bool]) -> Self {
            Self {
                submitted: Vec::new(),
                answers: answers.iter().copied().collect(),
            }
        }
    }

    impl DoorClient for ScriptedDoor {
        async fn submit(&mut self, operation: Operation) -> bool {
            self.submitted.push(operation);
            self.answers.pop_front().unwrap_or(true)
        }
    }

    fn controller(
        door: ScriptedDoor,
    ) -> (KeypadController<MockKeypad, ScriptedDoor>, MockKeypadHandle) {
        let (keypad, handle) = MockKeypad::new();
        let config = KeypadConfig {
            poll_interval: Duration::from_millis(100),
            timing: IndicatorTiming::instant(),
        };
        (KeypadController::new(keypad, door, config), handle)
    }

    /// Step until the buffered keys are consumed, returning the last outcome.
    async fn drain(
        controller: &mut KeypadController<MockKeypad, ScriptedDoor>,
        keys: usize,
    ) -> InputOutcome {
        let mut last = InputOutcome::Pending;
        for _ in 0..keys {
            last = controller.step().await.unwrap();
        }
        last
    }

    #[tokio::test]
    async fn test_open_door_success_lights_indicator() {
        let (mut controller, handle) = controller(ScriptedDoor::default());
        handle.send_keys("123456#").await.unwrap();

        let outcome = drain(&mut controller, 7).await;

        assert!(matches!(outcome, InputOutcome::Dispatch(_)));
        assert_eq!(
            controller.door().submitted,
            vec![Operation::OpenDoor {
                pin: Pin::from("123456")
            }]
        );
        assert_eq!(handle.indicator_history(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_denied_operation_blinks() {
        let (mut controller, handle) = controller(ScriptedDoor::answering(&[false]));
        handle.send_keys("123456*654321#").await.unwrap();

        drain(&mut controller, 14).await;

        assert_eq!(
            controller.door().submitted,
            vec![Operation::ChangePin {
                current_pin: Pin::from("123456"),
                new_pin: Pin::from("654321"),
            }]
        );
        assert_eq!(handle.probe().pulses(), 3);
        assert!(!handle.indicator_on());
    }

    #[tokio::test]
    async fn test_master_change_sends_master_operation() {
        let (mut controller, handle) = controller(ScriptedDoor::default());
        handle.send_keys("12345678*654321#").await.unwrap();

        drain(&mut controller, 16).await;

        assert_eq!(
            controller.door().submitted,
            vec![Operation::ChangePinMaster {
                master_pin: Pin::from("12345678"),
                new_pin: Pin::from("654321"),
            }]
        );
    }

    #[tokio::test]
    async fn test_register_sequence() {
        let (mut controller, handle) = controller(ScriptedDoor::default());
        handle.send_keys("*#*#*#*#").await.unwrap();

        drain(&mut controller, 8).await;

        assert_eq!(controller.door().submitted, vec![Operation::Register]);
    }

    #[tokio::test]
    async fn test_invalid_entry_blinks_without_request() {
        let (mut controller, handle) = controller(ScriptedDoor::default());
        handle.send_keys("12#").await.unwrap();

        let outcome = drain(&mut controller, 3).await;

        assert_eq!(outcome, InputOutcome::InvalidEntry);
        assert!(controller.door().submitted.is_empty());
        assert_eq!(handle.probe().pulses(), 3);
        assert_eq!(controller.buffered(), 0);
    }

    #[tokio::test]
    async fn test_overflow_blinks_and_resets() {
        let (mut controller, handle) = controller(ScriptedDoor::default());
        handle.send_keys("12345678901234567").await.unwrap();

        let outcome = drain(&mut controller, 17).await;

        assert_eq!(outcome, InputOutcome::Overflow);
        assert!(controller.door().submitted.is_empty());
        assert_eq!(handle.probe().pulses(), 3);

        handle.send_keys("123456#").await.unwrap();
        drain(&mut controller, 7).await;
        assert_eq!(controller.door().submitted.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_poll_waits_interval() {
        let (mut controller, _handle) = controller(ScriptedDoor::default());

        let start = tokio::time::Instant::now();
        assert_eq!(controller.step().await.unwrap(), InputOutcome::Pending);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(controller.buffered(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_disconnect() {
        let (mut controller, handle) = controller(ScriptedDoor::default());
        drop(handle);

        let result = controller.run().await;
        assert!(matches!(result, Err(HardwareError::Disconnected { .. })));
    }

    #[tokio::test]
    async fn test_run_discards_stale_keys() {
        let (mut controller, handle) = controller(ScriptedDoor::default());
        handle.send_keys("123456#").await.unwrap();
        drop(handle);

        // reset() drains the stale entry; the closed channel then ends the loop.
        assert!(controller.run().await.is_err());
        assert!(controller.door().submitted.is_empty());
    }
}
