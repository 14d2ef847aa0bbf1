//! Keypad input state machine.
//!
//! Key presses accumulate in a buffer until `#` is pressed. At that moment
//! the whole buffer (terminator included) is matched against a fixed table:
//!
//! | Buffer | Outcome |
//! |--------|---------|
//! | `*#`, `*#*#`, `*#*#*#` | keep buffering (prefix of the register sequence) |
//! | `*#*#*#*#` | register |
//! | 7 keys | open door with `buf[0..6]` |
//! | 14 keys, `buf[6] == '*'` | tenant PIN change `buf[0..6]` → `buf[7..13]` |
//! | 16 keys, `buf[8] == '*'` | master PIN change `buf[0..8]` → `buf[9..15]` |
//! | anything else | invalid entry |
//!
//! The buffer never holds more than 16 keys. The 17th key is an overflow,
//! whatever it is, and clears the buffer.
//!
//! # Examples
//!
//! ```
//! use latchkey_keypad::{InputOutcome, KeypadBuffer, KeypadCommand};
//!
//! let mut buffer = KeypadBuffer::new();
//! let mut outcome = InputOutcome::Pending;
//! for key in "123456#".chars() {
//!     outcome = buffer.push(Some(key));
//! }
//!
//! assert!(matches!(outcome, InputOutcome::Dispatch(KeypadCommand::OpenDoor { .. })));
//! assert!(buffer.is_empty());
//! ```

use std::fmt;

use latchkey_core::Pin;
use latchkey_core::constants::{
    CONTINUATION_SEQUENCES, KEY_SEPARATOR, KEY_TERMINATOR, KEYPAD_BUFFER_MAX, MASTER_PIN_LENGTH,
    REGISTER_SEQUENCE, TENANT_PIN_LENGTH,
};
use latchkey_protocol::Operation;

/// Command recognized from a completed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeypadCommand {
    Register,
    OpenDoor { pin: Pin },
    ChangePin { current_pin: Pin, new_pin: Pin },
    ChangePinMaster { master_pin: Pin, new_pin: Pin },
}

impl From<KeypadCommand> for Operation {
    fn from(command: KeypadCommand) -> Self {
        match command {
            KeypadCommand::Register => Operation::Register,
            KeypadCommand::OpenDoor { pin } => Operation::OpenDoor { pin },
            KeypadCommand::ChangePin {
                current_pin,
                new_pin,
            } => Operation::ChangePin {
                current_pin,
                new_pin,
            },
            KeypadCommand::ChangePinMaster {
                master_pin,
                new_pin,
            } => Operation::ChangePinMaster {
                master_pin,
                new_pin,
            },
        }
    }
}

impl fmt::Display for KeypadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeypadCommand::Register => "Register",
            KeypadCommand::OpenDoor { .. } => "OpenDoor",
            KeypadCommand::ChangePin { .. } => "ChangePin",
            KeypadCommand::ChangePinMaster { .. } => "ChangePinMaster",
        };
        write!(f, "{}", name)
    }
}

/// What a single poll did to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    /// Nothing to act on yet.
    Pending,
    /// A complete entry was recognized. The buffer is now empty.
    Dispatch(KeypadCommand),
    /// `#` ended an entry that matches no command. The buffer is now empty.
    InvalidEntry,
    /// Too many keys without a valid terminator. The buffer is now empty.
    Overflow,
}

impl InputOutcome {
    /// `true` for outcomes that should be signalled as a failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, InputOutcome::InvalidEntry | InputOutcome::Overflow)
    }
}

impl fmt::Display for InputOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputOutcome::Pending => write!(f, "Pending"),
            InputOutcome::Dispatch(command) => write!(f, "Dispatch({})", command),
            InputOutcome::InvalidEntry => write!(f, "InvalidEntry"),
            InputOutcome::Overflow => write!(f, "Overflow"),
        }
    }
}

/// Accumulates key presses and recognizes complete entries.
#[derive(Debug, Default)]
pub struct KeypadBuffer {
    keys: Vec<char>,
}

impl KeypadBuffer {
    pub fn new() -> Self {
        Self {
            keys: Vec::with_capacity(KEYPAD_BUFFER_MAX),
        }
    }

    /// Feed one poll result.
    ///
    /// `None` (no key pressed) never changes the buffer.
    pub fn push(&mut self, key: Option<char>) -> InputOutcome {
        let Some(key) = key else {
            return InputOutcome::Pending;
        };

        self.keys.push(key);
        if self.keys.len() > KEYPAD_BUFFER_MAX {
            self.keys.clear();
            return InputOutcome::Overflow;
        }

        if key != KEY_TERMINATOR || self.is_continuation() {
            return InputOutcome::Pending;
        }

        let outcome = match classify(&self.keys) {
            Some(command) => InputOutcome::Dispatch(command),
            None => InputOutcome::InvalidEntry,
        };
        self.keys.clear();
        outcome
    }

    /// Number of buffered keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    fn is_continuation(&self) -> bool {
        CONTINUATION_SEQUENCES
            .iter()
            .any(|sequence| sequence.chars().eq(self.keys.iter().copied()))
    }
}

fn pin(keys: &[char]) -> Pin {
    Pin::new(keys.iter().collect::<String>())
}

/// Match a terminated entry against the command table.
fn classify(keys: &[char]) -> Option<KeypadCommand> {
    if REGISTER_SEQUENCE.chars().eq(keys.iter().copied()) {
        return Some(KeypadCommand::Register);
    }

    const OPEN_LEN: usize = TENANT_PIN_LENGTH + 1;
    const TENANT_LEN: usize = 2 * TENANT_PIN_LENGTH + 2;
    const MASTER_LEN: usize = MASTER_PIN_LENGTH + TENANT_PIN_LENGTH + 2;

    match keys.len() {
        OPEN_LEN => Some(KeypadCommand::OpenDoor {
            pin: pin(&keys[..TENANT_PIN_LENGTH]),
        }),
        TENANT_LEN if keys[TENANT_PIN_LENGTH] == KEY_SEPARATOR => Some(KeypadCommand::ChangePin {
            current_pin: pin(&keys[..TENANT_PIN_LENGTH]),
            new_pin: pin(&keys[TENANT_PIN_LENGTH + 1..TENANT_LEN - 1]),
        }),
        MASTER_LEN if keys[MASTER_PIN_LENGTH] == KEY_SEPARATOR => {
            Some(KeypadCommand::ChangePinMaster {
                master_pin: pin(&keys[..MASTER_PIN_LENGTH]),
                new_pin: pin(&keys[MASTER_PIN_LENGTH + 1..MASTER_LEN - 1]),
            })
        }
        _ => None,
    }
}
