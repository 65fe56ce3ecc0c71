//! Append-only record writer.

use super::pool::ConnectionPool;
use crate::core::{ParsedRecord, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

const INSERT: &str = "INSERT INTO packets
    (src_ip, dst_ip, protocol, summary, timestamp, src_port, dst_port, dns_query, source)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// Stored text form of a timestamp: RFC 3339, UTC, microseconds.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Insert one record in its own transaction and return its id.
///
/// On error the transaction is rolled back when it goes out of scope.
pub fn insert(conn: &mut Connection, record: &ParsedRecord) -> Result<i64> {
    let tx = conn.transaction()?;
    tx.execute(
        INSERT,
        params![
            record.src_ip,
            record.dst_ip,
            record.protocol.as_str(),
            record.summary,
            format_timestamp(&record.timestamp),
            record.src_port,
            record.dst_port,
            record.dns_query,
            record.origin.as_str(),
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;
    Ok(id)
}

/// Writes classified records, one commit per record.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    pool: ConnectionPool,
}

impl StoreWriter {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Persist `record`, returning the assigned id. Never retries.
    pub async fn write(&self, record: ParsedRecord) -> Result<i64> {
        let protocol = record.protocol;
        let id = self
            .pool
            .run(move |conn| insert(conn, &record))
            .await
            .map_err(|e| {
                tracing::error!("Failed to store {} record: {}", protocol, e);
                e
            })?;
        tracing::debug!("Stored {} record {}", protocol, id);
        Ok(id)
    }
}
