//! Fixed-size SQLite connection pool.
//!
//! Connections are opened up front and handed out through an RAII guard
//! that puts them back on drop. Every request runs on the blocking thread
//! pool with its own connection.

use crate::core::config::StorageConfig;
use crate::core::{Outcome, PktwatchError, Result};
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pool counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub exhausted: u64,
    pub available: usize,
    pub capacity: usize,
}

struct Inner {
    connections: ArrayQueue<Connection>,
    path: PathBuf,
    acquire_timeout: Duration,
    acquired: AtomicU64,
    exhausted: AtomicU64,
}

/// Shared handle to the pool; cloning is cheap.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.inner.path)
            .field("available", &self.inner.connections.len())
            .field("capacity", &self.inner.connections.capacity())
            .finish()
    }
}

impl ConnectionPool {
    /// Open `size` connections to the database at `path`.
    pub fn open(path: impl AsRef<Path>, size: usize, busy_timeout: Duration) -> Result<Self> {
        if size == 0 {
            return Err(PktwatchError::config("pool_size must be greater than 0"));
        }

        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let connections = ArrayQueue::new(size);
        for _ in 0..size {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            // capacity equals size, push cannot fail
            let _ = connections.push(conn);
        }

        tracing::debug!("Opened {} connections to {}", size, path.display());

        Ok(Self {
            inner: Arc::new(Inner {
                connections,
                path,
                acquire_timeout: busy_timeout,
                acquired: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
            }),
        })
    }

    /// Open the pool described by `config`, retrying per its connect policy.
    ///
    /// The store being unreachable once the policy is exhausted is fatal,
    /// whatever the policy's exhaustion action says.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let outcome = config
            .connect_retry
            .run("database connection", || {
                let path = config.database.clone();
                let size = config.pool_size;
                let busy_timeout = config.busy_timeout;
                async move {
                    tokio::task::spawn_blocking(move || Self::open(path, size, busy_timeout)).await?
                }
            })
            .await?;

        match outcome {
            Outcome::Delivered { value, attempts } => {
                tracing::info!(
                    "Connected to database {} (attempt {})",
                    config.database.display(),
                    attempts
                );
                Ok(value)
            },
            Outcome::Dropped { attempts } => Err(PktwatchError::persist(format!(
                "database {} unreachable after {} attempts",
                config.database.display(),
                attempts
            ))),
        }
    }

    /// Take a connection, waiting up to the busy timeout for one to free up.
    ///
    /// Blocks the calling thread; call from blocking context only.
    pub fn acquire(&self) -> Result<PooledConnection> {
        let deadline = Instant::now() + self.inner.acquire_timeout;
        let backoff = Backoff::new();

        loop {
            if let Some(conn) = self.inner.connections.pop() {
                self.inner.acquired.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection {
                    conn: Some(conn),
                    pool: Arc::clone(&self.inner),
                });
            }

            if Instant::now() >= deadline {
                self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
                return Err(PktwatchError::PoolExhausted);
            }

            if backoff.is_completed() {
                std::thread::sleep(Duration::from_millis(1));
            } else {
                backoff.snooze();
            }
        }
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.acquire()?;
            f(&mut conn)
        })
        .await?
    }

    /// Get stats
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.inner.acquired.load(Ordering::Relaxed),
            exhausted: self.inner.exhausted.load(Ordering::Relaxed),
            available: self.inner.connections.len(),
            capacity: self.inner.connections.capacity(),
        }
    }
}

/// RAII wrapper that returns the connection to the pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<Inner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `drop` takes the connection out
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection taken"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection taken"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = self.pool.connections.push(conn);
        }
    }
}
