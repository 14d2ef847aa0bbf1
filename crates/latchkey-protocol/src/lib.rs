//! Wire protocol between the widget and the door server.
//!
//! Requests and responses are single JSON objects written back to back on a
//! TCP stream. [`JsonCodec`] finds the object boundaries; [`Request`] and
//! [`Response`] give them structure.

pub mod codec;
pub mod message;

pub use codec::JsonCodec;
pub use message::{Operation, Request, Response};
