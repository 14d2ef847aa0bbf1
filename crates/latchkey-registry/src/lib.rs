//! Device registry and request handling for the Latchkey door server.
//!
//! This crate owns everything the door server knows about widgets: the set of
//! enrolled devices, the log of devices asking to be enrolled, and the logic
//! that turns one widget request into one response.
//!
//! # Architecture
//!
//! - [`DeviceRegistry`] - enrolled devices, lock-guarded, persisted through a
//!   [`DeviceStore`]
//! - [`PendingLog`] - append-only record of registration requests
//! - [`RequestHandler`] - parses a frame, authenticates, dispatches; plugs
//!   into [`latchkey_network::TcpServer`] as a [`latchkey_network::FrameHandler`]
//!
//! # Storage Format
//!
//! Both files are JSON lines, one record per line:
//!
//! ```text
//! # registered-widgets.txt
//! {"device_id":"b827eb000001","device_key":"12345","pin":"123456","flag":"<theflag>"}
//!
//! # requested-widgets.txt
//! {"device_id":"b827eb000002","device_key":"12345","pin":"123456","flag":"<theflag>",
//!  "requested_at":"2026-10-16T09:12:44Z","peer":"192.168.7.2:51234"}
//! ```
//!
//! Enrollment is manual: an operator copies a line from the pending log into
//! the registry file and restarts the server.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use latchkey_network::{TcpServer, TcpServerConfig};
//! use latchkey_registry::{
//!     DeviceRegistry, HandlerConfig, JsonLinesPendingLog, JsonLinesStore, RequestHandler,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = DeviceRegistry::load(JsonLinesStore::new("registered-widgets.txt")).await?;
//! let handler = RequestHandler::new(
//!     Arc::new(registry),
//!     Arc::new(JsonLinesPendingLog::new("requested-widgets.txt")),
//!     HandlerConfig::default(),
//! );
//!
//! TcpServer::bind(TcpServerConfig::default())
//!     .await?
//!     .run(Arc::new(handler))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security Considerations
//!
//! Device keys, PINs and the master secret are compared in constant time
//! (`subtle`, through the core types), and their `Debug` output is redacted.

pub mod error;
pub mod handler;
pub mod models;
pub mod pending;
pub mod registry;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use handler::{HandlerConfig, RequestHandler};
pub use models::{Device, PendingRegistration};
pub use pending::{JsonLinesPendingLog, MemoryPendingLog, PendingLog};
pub use registry::{DeviceRegistry, PinCheck};
pub use store::{DeviceStore, JsonLinesStore, MemoryStore, parse_devices};
