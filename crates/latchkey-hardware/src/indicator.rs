//! Success and failure patterns on the status indicator.

use std::time::Duration;

use latchkey_core::constants::{FAILURE_PULSE_COUNT, FAILURE_PULSE_MS, SUCCESS_INDICATION_MS};

use crate::error::Result;
use crate::traits::KeypadDevice;

/// Timings of the indicator patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorTiming {
    /// How long the indicator stays on after a success.
    pub success: Duration,
    /// Length of each on and each off phase of a failure blink.
    pub failure_pulse: Duration,
    /// Number of blinks on failure.
    pub failure_pulses: u32,
}

impl Default for IndicatorTiming {
    fn default() -> Self {
        Self {
            success: Duration::from_millis(SUCCESS_INDICATION_MS),
            failure_pulse: Duration::from_millis(FAILURE_PULSE_MS),
            failure_pulses: FAILURE_PULSE_COUNT,
        }
    }
}

impl IndicatorTiming {
    /// Timing with every phase set to zero, for tests.
    pub fn instant() -> Self {
        Self {
            success: Duration::ZERO,
            failure_pulse: Duration::ZERO,
            failure_pulses: FAILURE_PULSE_COUNT,
        }
    }

    pub fn with_success(mut self, success: Duration) -> Self {
        self.success = success;
        self
    }

    pub fn with_failure_pulse(mut self, pulse: Duration, count: u32) -> Self {
        self.failure_pulse = pulse;
        self.failure_pulses = count;
        self
    }

    /// Total time the failure pattern takes.
    pub fn failure_duration(&self) -> Duration {
        self.failure_pulse * 2 * self.failure_pulses
    }
}

/// Steady on, then off.
///
/// # Errors
///
/// Returns an error if the device rejects an indicator change.
pub async fn indicate_success<K: KeypadDevice>(device: &mut K, timing: &IndicatorTiming) -> Result<()> {
    device.set_indicator(true).await?;
    tokio::time::sleep(timing.success).await;
    device.set_indicator(false).await
}

/// Blink `failure_pulses` times.
///
/// # Errors
///
/// Returns an error if the device rejects an indicator change.
pub async fn indicate_failure<K: KeypadDevice>(device: &mut K, timing: &IndicatorTiming) -> Result<()> {
    for _ in 0..timing.failure_pulses {
        device.set_indicator(true).await?;
        tokio::time::sleep(timing.failure_pulse).await;
        device.set_indicator(false).await?;
        tokio::time::sleep(timing.failure_pulse).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockKeypad;
    use tokio::time::Instant;

    #[test]
    fn test_default_timing() {
        let timing = IndicatorTiming::default();
        assert_eq!(timing.success, Duration::from_secs(3));
        assert_eq!(timing.failure_pulse, Duration::from_millis(300));
        assert_eq!(timing.failure_pulses, 3);
        assert_eq!(timing.failure_duration(), Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_pattern() {
        let (mut keypad, handle) = MockKeypad::new();
        let start = Instant::now();

        indicate_success(&mut keypad, &IndicatorTiming::default())
            .await
            .unwrap();

        assert_eq!(handle.indicator_history(), vec![true, false]);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(!handle.indicator_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_pattern() {
        let (mut keypad, handle) = MockKeypad::new();
        let start = Instant::now();

        indicate_failure(&mut keypad, &IndicatorTiming::default())
            .await
            .unwrap();

        assert_eq!(
            handle.indicator_history(),
            vec![true, false, true, false, true, false]
        );
        assert!(start.elapsed() >= Duration::from_millis(1800));
    }

    #[tokio::test]
    async fn test_custom_pulse_count() {
        let (mut keypad, handle) = MockKeypad::new();
        let timing = IndicatorTiming::instant().with_failure_pulse(Duration::ZERO, 1);

        indicate_failure(&mut keypad, &timing).await.unwrap();
        assert_eq!(handle.indicator_history(), vec![true, false]);
    }
}
