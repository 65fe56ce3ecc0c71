//! Additive schema management for the `packets` table.
//!
//! The base table is created if absent, then a fixed, ordered list of steps
//! adds the columns and indexes introduced since. Steps never drop or
//! rewrite anything, so running [`ensure_schema`] any number of times
//! against any older layout is safe.

use crate::core::{PktwatchError, Result};
use rusqlite::Connection;

/// Table holding every persisted record.
pub const TABLE: &str = "packets";

const BASE_TABLE: &str = "CREATE TABLE IF NOT EXISTS packets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    src_ip TEXT NOT NULL,
    dst_ip TEXT NOT NULL,
    protocol TEXT NOT NULL,
    summary TEXT,
    timestamp TEXT NOT NULL
)";

/// One additive migration step.
#[derive(Debug, Clone, Copy)]
enum Step {
    AddColumn {
        column: &'static str,
        definition: &'static str,
    },
    CreateIndex {
        name: &'static str,
        columns: &'static str,
    },
}

impl Step {
    fn name(&self) -> String {
        match self {
            Step::AddColumn { column, .. } => format!("add column {column}"),
            Step::CreateIndex { name, .. } => format!("create index {name}"),
        }
    }

    fn sql(&self) -> String {
        match self {
            Step::AddColumn { column, definition } => {
                format!("ALTER TABLE {TABLE} ADD COLUMN {column} {definition}")
            },
            Step::CreateIndex { name, columns } => {
                format!("CREATE INDEX IF NOT EXISTS {name} ON {TABLE} ({columns})")
            },
        }
    }
}

// Order matters: indexes reference columns added above them
const STEPS: &[Step] = &[
    Step::AddColumn {
        column: "src_port",
        definition: "INTEGER",
    },
    Step::AddColumn {
        column: "dst_port",
        definition: "INTEGER",
    },
    Step::AddColumn {
        column: "dns_query",
        definition: "TEXT",
    },
    Step::AddColumn {
        column: "source",
        definition: "TEXT DEFAULT 'LIVE'",
    },
    Step::CreateIndex {
        name: "idx_packets_protocol",
        columns: "protocol",
    },
    Step::CreateIndex {
        name: "idx_packets_source",
        columns: "source",
    },
    Step::CreateIndex {
        name: "idx_packets_timestamp",
        columns: "timestamp",
    },
];

/// What [`ensure_schema`] did, step by step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SchemaReport {
    /// True if no step failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Bring the table up to the current layout.
///
/// Only a failure to create the base table is an error. A step that finds
/// its column already present is skipped; any other step failure is logged
/// and recorded in the report.
pub fn ensure_schema(conn: &Connection) -> Result<SchemaReport> {
    conn.execute_batch(BASE_TABLE)
        .map_err(|e| PktwatchError::schema(format!("failed to create {TABLE} table: {e}")))?;

    let mut report = SchemaReport::default();
    for step in STEPS {
        let name = step.name();
        match conn.execute_batch(&step.sql()) {
            Ok(()) => {
                tracing::debug!("Schema step applied: {}", name);
                report.applied.push(name);
            },
            Err(e) if is_duplicate_column(&e) => {
                tracing::warn!("Schema step skipped: {} ({})", name, e);
                report.skipped.push(name);
            },
            Err(e) => {
                tracing::error!("Schema step failed: {}: {}", name, e);
                report.failed.push((name, e.to_string()));
            },
        }
    }

    tracing::info!(
        "Schema for '{}' is up to date ({} applied, {} skipped, {} failed)",
        TABLE,
        report.applied.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Column names of the records table, in table order.
pub fn columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({TABLE})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn is_duplicate_column(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.contains("duplicate column name"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FULL_LAYOUT: [&str; 10] = [
        "id",
        "src_ip",
        "dst_ip",
        "protocol",
        "summary",
        "timestamp",
        "src_port",
        "dst_port",
        "dns_query",
        "source",
    ];

    #[test]
    fn test_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        let report = ensure_schema(&conn).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.applied.len(), STEPS.len());
        assert_eq!(columns(&conn).unwrap(), FULL_LAYOUT);
    }

    #[test]
    fn test_second_run_skips_columns() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let report = ensure_schema(&conn).unwrap();

        assert!(report.is_clean());
        assert_eq!(
            report.skipped,
            vec!["add column src_port", "add column dst_port", "add column dns_query", "add column source"]
        );
        // CREATE INDEX IF NOT EXISTS succeeds every time
        assert_eq!(report.applied.len(), 3);
        assert_eq!(columns(&conn).unwrap(), FULL_LAYOUT);
    }

    #[test]
    fn test_upgrades_base_layout() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(BASE_TABLE).unwrap();
        conn.execute(
            "INSERT INTO packets (src_ip, dst_ip, protocol, summary, timestamp) VALUES ('a', 'b', 'TCP', '', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        ensure_schema(&conn).unwrap();

        let source: String = conn
            .query_row("SELECT source FROM packets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(source, "LIVE");
    }

    #[test]
    fn test_other_failures_are_recorded() {
        let conn = Connection::open_in_memory().unwrap();
        // A view with the table's name makes every ALTER fail without a duplicate
        conn.execute_batch("CREATE VIEW packets AS SELECT 1 AS id").unwrap();

        assert!(ensure_schema(&conn).is_ok_and(|report| !report.is_clean()));
    }
}
