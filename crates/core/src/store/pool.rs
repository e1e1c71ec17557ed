//! A small bounded pool of read-only connections.
//!
//! The store keeps exactly one writer connection (serialized behind a
//! mutex, see `mod.rs`) and a bounded pool of read connections opened in
//! `SQLITE_OPEN_READ_ONLY` mode so concurrent readers never block on the
//! writer's transaction. Idle connections older than `max_idle_time` are
//! dropped on checkout rather than reused.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::{Error, Result};

struct Idle {
    conn: Connection,
    since: Instant,
}

struct Inner {
    idle: Vec<Idle>,
    open_count: usize,
}

/// A bounded pool of pooled read-only [`rusqlite::Connection`]s.
pub struct ReadPool {
    path: std::path::PathBuf,
    max_size: usize,
    max_idle_time: Duration,
    checkout_timeout: Duration,
    inner: Mutex<Inner>,
    available: Condvar,
}

/// A checked-out connection; returns itself to the pool on drop.
pub struct PooledConnection<'a> {
    pool: &'a ReadPool,
    conn: Option<Connection>,
}

impl std::ops::Deref for PooledConnection<'_> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl ReadPool {
    pub fn new(
        path: impl AsRef<Path>,
        max_size: usize,
        max_idle_time: Duration,
        checkout_timeout: Duration,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_size,
            max_idle_time,
            checkout_timeout,
            inner: Mutex::new(Inner {
                idle: Vec::new(),
                open_count: 0,
            }),
            available: Condvar::new(),
        }
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(conn)
    }

    /// Check out a connection, blocking up to `checkout_timeout` if the pool
    /// is at capacity and nothing is idle.
    pub fn checkout(&self) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now() + self.checkout_timeout;
        let mut guard = self.inner.lock().unwrap();

        loop {
            while let Some(idle) = guard.idle.pop() {
                if idle.since.elapsed() > self.max_idle_time {
                    guard.open_count -= 1;
                    continue;
                }
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(idle.conn),
                });
            }

            if guard.open_count < self.max_size {
                guard.open_count += 1;
                drop(guard);
                return match self.open_connection() {
                    Ok(conn) => Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    }),
                    Err(e) => {
                        let mut guard = self.inner.lock().unwrap();
                        guard.open_count -= 1;
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::PoolExhausted {
                    waited_ms: self.checkout_timeout.as_millis() as u64,
                });
            }
            let (g, timeout_result) = self
                .available
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = g;
            if timeout_result.timed_out() && guard.idle.is_empty() {
                return Err(Error::PoolExhausted {
                    waited_ms: self.checkout_timeout.as_millis() as u64,
                });
            }
        }
    }

    fn release(&self, conn: Connection) {
        let mut guard = self.inner.lock().unwrap();
        guard.idle.push(Idle {
            conn,
            since: Instant::now(),
        });
        drop(guard);
        self.available.notify_one();
    }

    pub fn active_count(&self) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.open_count - guard.idle.len()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.lock().unwrap().idle.len()
    }
}

pub(crate) type SharedReadPool = Arc<ReadPool>;
