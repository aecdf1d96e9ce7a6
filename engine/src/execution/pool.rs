//! Bounded connection pool.
//!
//! The pool holds a fixed number of connections opened at startup. Callers
//! wait on a semaphore for a slot and then take a connection from a
//! mutex-guarded free-list. The returned [`PoolGuard`] puts the connection
//! back and frees the slot when it is dropped, whether the execution
//! succeeded, failed, panicked or was cancelled.

use super::connection::{Connection, Connector, EngineFailure};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A connection owned by the pool.
struct PooledConnection {
    id: usize,
    conn: Box<dyn Connection>,
    busy: bool,
}

/// Live pool counters.
#[derive(Debug, Default)]
struct PoolCounters {
    in_use: AtomicUsize,
    acquisitions: AtomicU64,
    timeouts: AtomicU64,
    total_wait_micros: AtomicU64,
    max_wait_micros: AtomicU64,
}

/// Snapshot of pool utilization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    /// Number of connections in the pool.
    pub size: usize,
    /// Connections currently owned by executions.
    pub in_use: usize,
    /// Connections currently free.
    pub available: usize,
    /// Successful acquisitions since start.
    pub acquisitions: u64,
    /// Acquisitions that gave up after the acquire timeout.
    pub timeouts: u64,
    /// Mean time spent waiting for a slot, in milliseconds.
    pub mean_wait_ms: f64,
    /// Longest time spent waiting for a slot, in milliseconds.
    pub max_wait_ms: f64,
    /// Fraction of connections in use.
    pub utilization: f64,
}

struct PoolInner {
    free: Mutex<Vec<PooledConnection>>,
    semaphore: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Option<Duration>,
    closed: AtomicBool,
    counters: PoolCounters,
}

impl PoolInner {
    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<PooledConnection>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A fixed-size pool of engine connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.inner.size)
            .field("acquire_timeout", &self.inner.acquire_timeout)
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Opens `size` connections and builds the pool.
    ///
    /// # Errors
    ///
    /// Returns the first [`EngineFailure`] reported while connecting.
    pub async fn open(
        connector: &dyn Connector,
        size: usize,
        acquire_timeout: Option<Duration>,
    ) -> Result<Self, EngineFailure> {
        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);
        for id in 0..size {
            let conn = connector.connect().await?;
            debug!(connection_id = id, "Opened engine connection");
            connections.push(PooledConnection {
                id,
                conn,
                busy: false,
            });
        }

        info!(size, ?acquire_timeout, "Connection pool started");

        Ok(Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(connections),
                semaphore: Arc::new(Semaphore::new(size)),
                size,
                acquire_timeout,
                closed: AtomicBool::new(false),
                counters: PoolCounters::default(),
            }),
        })
    }

    /// Waits for a free connection.
    ///
    /// The wait is bounded by the acquire timeout when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`EngineFailure::PoolExhausted`] when the acquire timeout
    /// expires and [`EngineFailure::PoolClosed`] after [`close`](Self::close).
    pub async fn acquire(&self) -> Result<PoolGuard, EngineFailure> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(EngineFailure::PoolClosed);
        }

        let started = Instant::now();
        let permit_future = Arc::clone(&self.inner.semaphore).acquire_owned();
        let permit = match self.inner.acquire_timeout {
            Some(limit) => match tokio::time::timeout(limit, permit_future).await {
                Ok(permit) => permit,
                Err(_) => {
                    self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    let waited_ms = duration_millis(started.elapsed());
                    warn!(waited_ms, size = self.inner.size, "Connection pool exhausted");
                    return Err(EngineFailure::PoolExhausted { waited_ms });
                }
            },
            None => permit_future.await,
        }
        .map_err(|_| EngineFailure::PoolClosed)?;

        if self.inner.closed.load(Ordering::Acquire) {
            return Err(EngineFailure::PoolClosed);
        }

        let mut pooled = self
            .inner
            .lock_free()
            .pop()
            .ok_or_else(|| EngineFailure::Other("pool slot granted with no free connection".to_string()))?;
        debug_assert!(!pooled.busy, "connection handed out twice");
        pooled.busy = true;

        let waited = started.elapsed();
        let counters = &self.inner.counters;
        counters.in_use.fetch_add(1, Ordering::AcqRel);
        counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        let wait_micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        counters
            .total_wait_micros
            .fetch_add(wait_micros, Ordering::Relaxed);
        counters
            .max_wait_micros
            .fetch_max(wait_micros, Ordering::Relaxed);

        Ok(PoolGuard {
            pooled: Some(pooled),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
            waited,
        })
    }

    /// Number of connections in the pool.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Current utilization snapshot.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        let in_use = counters.in_use.load(Ordering::Acquire);
        let acquisitions = counters.acquisitions.load(Ordering::Relaxed);
        let total_wait = counters.total_wait_micros.load(Ordering::Relaxed);
        PoolStats {
            size: self.inner.size,
            in_use,
            available: self.inner.size.saturating_sub(in_use),
            acquisitions,
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            mean_wait_ms: if acquisitions == 0 {
                0.0
            } else {
                total_wait as f64 / acquisitions as f64 / 1000.0
            },
            max_wait_ms: counters.max_wait_micros.load(Ordering::Relaxed) as f64 / 1000.0,
            utilization: in_use as f64 / self.inner.size as f64,
        }
    }

    /// Returns true once [`close`](Self::close) has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops handing out connections, waits for in-flight executions to
    /// return theirs and closes every connection.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let slots = u32::try_from(self.inner.size).unwrap_or(u32::MAX);
        // Waiters queued ahead of us see the closed flag and hand their slot back.
        let drained = self.inner.semaphore.acquire_many(slots).await;
        self.inner.semaphore.close();

        let connections: Vec<PooledConnection> = self.inner.lock_free().drain(..).collect();
        let closed = connections.len();
        for mut pooled in connections {
            pooled.conn.close().await;
            debug!(connection_id = pooled.id, "Closed engine connection");
        }
        drop(drained);

        info!(closed, size = self.inner.size, "Connection pool stopped");
    }
}

/// Exclusive ownership of one pooled connection.
pub struct PoolGuard {
    pooled: Option<PooledConnection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
    waited: Duration,
}

impl std::fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("waited", &self.waited)
            .finish_non_exhaustive()
    }
}

impl PoolGuard {
    /// The owned connection.
    pub fn connection(&mut self) -> &mut dyn Connection {
        match self.pooled.as_mut() {
            Some(pooled) => pooled.conn.as_mut(),
            None => unreachable!("pool guard used after release"),
        }
    }

    /// Pool-local identifier of the owned connection.
    #[must_use]
    pub fn connection_id(&self) -> usize {
        self.pooled.as_ref().map_or(usize::MAX, |p| p.id)
    }

    /// How long the caller waited for this connection.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(mut pooled) = self.pooled.take() {
            pooled.busy = false;
            self.pool.lock_free().push(pooled);
            self.pool.counters.in_use.fetch_sub(1, Ordering::AcqRel);
        }
        // The connection is back on the free-list before the slot opens up.
        drop(self.permit.take());
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
