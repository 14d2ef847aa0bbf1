//! Keypad driven from a byte stream, normally stdin.
//!
//! Stands in for the real keypad driver on a development machine: every
//! keypad character read from the stream becomes a key press, anything else
//! (newlines, letters) is dropped. A read error is reported once by
//! [`read_key`](KeypadDevice::read_key); after it, and after end of input,
//! the keypad is disconnected. The indicator is reported through `tracing`.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::traits::{KeypadDevice, is_keypad_key};
use crate::{HardwareError, Result};

const DEVICE_NAME: &str = "console keypad";

/// Keypad fed by an async reader.
#[derive(Debug)]
pub struct ConsoleKeypad {
    keys: mpsc::UnboundedReceiver<std::io::Result<char>>,
    reader_task: JoinHandle<()>,
    indicator_on: bool,
}

impl ConsoleKeypad {
    /// Read key presses from the process's standard input.
    pub fn stdin() -> Self {
        Self::from_reader(tokio::io::stdin())
    }

    /// Read key presses from any byte stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, keys) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(pump_keys(reader, tx));

        Self {
            keys,
            reader_task,
            indicator_on: false,
        }
    }

    /// Current indicator state.
    pub fn indicator_on(&self) -> bool {
        self.indicator_on
    }
}

impl Drop for ConsoleKeypad {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn pump_keys<R>(mut reader: R, tx: mpsc::UnboundedSender<std::io::Result<char>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Keypad input closed");
                return;
            }
            Ok(n) => {
                for key in buf[..n].iter().map(|b| char::from(*b)).filter(|c| is_keypad_key(*c)) {
                    if tx.send(Ok(key)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Keypad input failed");
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

impl KeypadDevice for ConsoleKeypad {
    async fn read_key(&mut self) -> Result<Option<char>> {
        match self.keys.try_recv() {
            Ok(Ok(key)) => Ok(Some(key)),
            Ok(Err(e)) => Err(e.into()),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(HardwareError::disconnected(DEVICE_NAME)),
        }
    }

    async fn set_indicator(&mut self, on: bool) -> Result<()> {
        if on != self.indicator_on {
            info!(on, "Indicator {}", if on { "on" } else { "off" });
        }
        self.indicator_on = on;
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        while let Ok(key) = self.keys.try_recv() {
            match key {
                Ok(key) => debug!(%key, "Discarding buffered key"),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
