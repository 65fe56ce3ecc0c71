//! Read-only queries over stored records.
//!
//! Nothing here writes. Listings are newest first by id; the timeline is
//! sorted ascending by second.

use super::pool::ConnectionPool;
use crate::core::types::UNKNOWN_ADDRESS;
use crate::core::{Origin, ParsedRecord, Protocol, Result, StoredRecord};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SELECT_RECORDS: &str = "SELECT id, src_ip, dst_ip, protocol, summary, timestamp, src_port, dst_port, dns_query, source
    FROM packets";

/// Record counts per protocol label, split by origin tag.
pub type ProtocolSummary = BTreeMap<Protocol, BTreeMap<Origin, u64>>;

/// Flat per-label counts, parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryChart {
    pub labels: Vec<String>,
    pub counts: Vec<u64>,
}

/// Per-second record counts, parallel arrays sorted by time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub times: Vec<String>,
    pub counts: Vec<u64>,
}

fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        // rows written by older producers lack the offset
        Err(_) => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").map(|ts| ts.and_utc()),
    }
}

fn port(value: Option<i64>) -> Option<u16> {
    value.and_then(|v| u16::try_from(v).ok())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let protocol: Option<String> = row.get(3)?;
    let timestamp: String = row.get(5)?;
    let source: Option<String> = row.get(9)?;

    let timestamp = parse_timestamp(&timestamp)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(StoredRecord {
        id: row.get(0)?,
        record: ParsedRecord {
            src_ip: row.get::<_, Option<String>>(1)?.unwrap_or_else(|| UNKNOWN_ADDRESS.to_string()),
            dst_ip: row.get::<_, Option<String>>(2)?.unwrap_or_else(|| UNKNOWN_ADDRESS.to_string()),
            protocol: protocol
                .as_deref()
                .and_then(Protocol::from_label)
                .unwrap_or(Protocol::Unknown),
            src_port: port(row.get(6)?),
            dst_port: port(row.get(7)?),
            dns_query: row.get(8)?,
            summary: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            timestamp,
            origin: source
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        },
    })
}

/// Most recent `limit` records, optionally only those with the given origin.
pub fn recent(conn: &Connection, limit: usize, origin: Option<Origin>) -> Result<Vec<StoredRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{SELECT_RECORDS} WHERE (?1 IS NULL OR source = ?1) ORDER BY id DESC LIMIT ?2"
    ))?;
    let records = stmt
        .query_map(params![origin.map(|o| o.as_str()), limit as i64], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Most recent `limit` records with the given protocol label.
pub fn by_protocol(
    conn: &Connection,
    protocol: Protocol,
    limit: usize,
    origin: Option<Origin>,
) -> Result<Vec<StoredRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{SELECT_RECORDS} WHERE protocol = ?1 AND (?2 IS NULL OR source = ?2) ORDER BY id DESC LIMIT ?3"
    ))?;
    let records = stmt
        .query_map(
            params![protocol.as_str(), origin.map(|o| o.as_str()), limit as i64],
            row_to_record,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Counts per protocol label and origin tag.
///
/// Labels outside the fixed set (rows from older producers) count as
/// `Unknown`.
pub fn protocol_summary(conn: &Connection) -> Result<ProtocolSummary> {
    let mut stmt = conn.prepare_cached(
        "SELECT protocol, COALESCE(source, 'LIVE'), COUNT(*) FROM packets GROUP BY protocol, source",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Option<String>>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut summary = ProtocolSummary::new();
    for row in rows {
        let (protocol, source, count) = row?;
        let protocol = protocol
            .as_deref()
            .and_then(Protocol::from_label)
            .unwrap_or(Protocol::Unknown);
        let origin = source.parse().unwrap_or_default();
        *summary.entry(protocol).or_default().entry(origin).or_default() += count as u64;
    }
    Ok(summary)
}

/// Counts per protocol label, origins merged.
pub fn summary_chart(conn: &Connection) -> Result<SummaryChart> {
    let mut chart = SummaryChart::default();
    for (protocol, by_origin) in protocol_summary(conn)? {
        chart.labels.push(protocol.as_str().to_string());
        chart.counts.push(by_origin.values().sum());
    }
    Ok(chart)
}

/// Per-second histogram over the most recent `window` records, 0 for all.
pub fn timeline(conn: &Connection, window: usize) -> Result<Timeline> {
    // SQLite treats a negative LIMIT as no limit
    let limit = if window == 0 { -1 } else { window as i64 };
    let mut stmt = conn.prepare_cached(
        "SELECT substr(timestamp, 1, 19) AS bucket, COUNT(*)
         FROM (SELECT timestamp FROM packets ORDER BY id DESC LIMIT ?1)
         GROUP BY bucket ORDER BY bucket ASC",
    )?;
    let rows = stmt.query_map([limit], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

    let mut timeline = Timeline::default();
    for row in rows {
        let (time, count) = row?;
        timeline.times.push(time);
        timeline.counts.push(count as u64);
    }
    Ok(timeline)
}

/// Total number of stored records.
pub fn count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM packets", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Async facade over the queries, each on its own pooled connection.
#[derive(Debug, Clone)]
pub struct QueryService {
    pool: ConnectionPool,
    timeline_window: usize,
}

impl QueryService {
    pub fn new(pool: ConnectionPool, timeline_window: usize) -> Self {
        Self {
            pool,
            timeline_window,
        }
    }

    pub async fn recent(&self, limit: usize, origin: Option<Origin>) -> Result<Vec<StoredRecord>> {
        self.pool.run(move |conn| recent(conn, limit, origin)).await
    }

    pub async fn by_protocol(
        &self,
        protocol: Protocol,
        limit: usize,
        origin: Option<Origin>,
    ) -> Result<Vec<StoredRecord>> {
        self.pool
            .run(move |conn| by_protocol(conn, protocol, limit, origin))
            .await
    }

    pub async fn protocol_summary(&self) -> Result<ProtocolSummary> {
        self.pool.run(|conn| protocol_summary(conn)).await
    }

    pub async fn summary_chart(&self) -> Result<SummaryChart> {
        self.pool.run(|conn| summary_chart(conn)).await
    }

    pub async fn timeline(&self) -> Result<Timeline> {
        let window = self.timeline_window;
        self.pool.run(move |conn| timeline(conn, window)).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.pool.run(|conn| count(conn)).await
    }
}
