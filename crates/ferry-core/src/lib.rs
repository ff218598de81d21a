//! ferry-core library.
//!
//! Rebuilds the change history of tracker cases from a current-state record
//! plus a journal of diffs, and replays that history against a second
//! tracker.
//!
//! # Conventions
//!
//! - **Errors**: library failures are [`MigrateError`] / [`TransportError`];
//!   glue code uses `anyhow::Result` with context.
//! - **Logging**: use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).

pub mod config;
pub mod error;
pub mod history;
pub mod loader;
pub mod mapping;
pub mod model;
pub mod pipeline;
pub mod replay;
pub mod transport;

pub use error::{ErrorCode, MigrateError};
pub use transport::{Response, Transport, TransportError};
