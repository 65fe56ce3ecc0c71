//! Domain types, configuration and error handling shared by every stage.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder};
pub use error::{PktwatchError, Result};
pub use retry::{OnExhausted, Outcome, RetryPolicy};
pub use types::{FrameHints, Origin, ParsedRecord, Protocol, RawFrame, StoredRecord};
