//! Persistence for classified records.
//!
//! SQLite behind a fixed connection pool. The writer and the query service
//! each hold a handle to the same pool; the schema is brought up to date
//! once at startup.

pub mod pool;
pub mod query;
pub mod schema;
pub mod writer;

pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use query::{ProtocolSummary, QueryService, SummaryChart, Timeline};
pub use schema::{ensure_schema, SchemaReport};
pub use writer::StoreWriter;

use crate::core::config::StorageConfig;
use crate::core::Result;

/// Connect with the configured retry policy, then ensure the schema.
pub async fn open(config: &StorageConfig) -> Result<(ConnectionPool, SchemaReport)> {
    let pool = ConnectionPool::connect(config).await?;
    let report = pool.run(|conn| ensure_schema(conn)).await?;
    if !report.is_clean() {
        tracing::warn!(
            "Schema has {} failed steps, continuing with the current layout",
            report.failed.len()
        );
    }
    Ok((pool, report))
}
