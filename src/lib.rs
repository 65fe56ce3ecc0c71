//! pktwatch - network telemetry pipeline.
//!
//! Packets are observed on a live interface or replayed from a recording,
//! classified into compact metadata records and persisted in SQLite, where
//! a small query service reads them back.
//!
//! # Architecture
//!
//! Each stage is an HTTP service and stages only talk over HTTP:
//! - `capture`: live and replay frame sources, session control
//! - `classifier`: frame dissection and protocol labelling
//! - `forwarder`: batched and retried delivery to the next stage
//! - `storage`: schema management, writes and read queries
//! - `api`: the routers of the four services
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use pktwatch::application::{Application, Service};
//! use pktwatch::core::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = Application::new(Config::default(), Service::ALL.to_vec())?;
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod application;
pub mod capture;
pub mod classifier;
pub mod cli;
pub mod core;
pub mod forwarder;
pub mod storage;

// Re-export core types for convenience
pub use crate::application::{Application, Service};
pub use crate::core::{Config, PktwatchError, Result};
