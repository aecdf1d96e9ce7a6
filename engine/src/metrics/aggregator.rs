//! Thread-safe aggregation of execution samples.

use super::sample::{duration_ms, MetricSample};
use crate::execution::{ConnectionPool, PoolStats};
use crate::query::OperationKind;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Number of failed samples listed in [`MetricsSummary::recent_errors`].
pub const RECENT_ERRORS: usize = 10;

/// Query and error counts for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    /// Executions against the table.
    pub queries: u64,
    /// Failed executions against the table.
    pub errors: u64,
}

/// Duration distribution in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationStats {
    /// Fastest execution.
    pub min: f64,
    /// Slowest execution.
    pub max: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// 50th percentile.
    pub median: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
}

/// Row count distribution over successful executions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RowStats {
    /// Smallest result.
    pub min: usize,
    /// Largest result.
    pub max: usize,
    /// Mean result size.
    pub mean: f64,
    /// Rows returned in total.
    pub total: u64,
}

/// Connection pool utilization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolUtilization {
    /// Live pool counters, when a pool is attached.
    pub live: Option<PoolStats>,
    /// Mean pool wait over retained samples, in milliseconds.
    pub mean_wait_ms: f64,
    /// Longest pool wait over retained samples, in milliseconds.
    pub max_wait_ms: f64,
}

/// Aggregated view of recorded executions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// Executions recorded since start or the last reset.
    pub total_queries: u64,
    /// Failed executions.
    pub total_errors: u64,
    /// `total_errors / total_queries`, zero when nothing was recorded.
    pub error_rate: f64,
    /// Retries beyond the first attempt, summed over executions.
    pub total_retries: u64,
    /// Executions per operation kind.
    pub operations: BTreeMap<OperationKind, u64>,
    /// Executions and failures per table.
    pub tables: BTreeMap<String, TableCounts>,
    /// Duration distribution over retained samples.
    pub durations_ms: Option<DurationStats>,
    /// Row counts over retained successful samples.
    pub row_counts: Option<RowStats>,
    /// Retained samples over the slow-query threshold, slowest first.
    pub slow_queries: Vec<MetricSample>,
    /// Most recent failed samples, newest last.
    pub recent_errors: Vec<MetricSample>,
    /// Pool utilization.
    pub pool: PoolUtilization,
    /// Samples currently retained.
    pub retained_samples: usize,
    /// Maximum samples retained.
    pub capacity: usize,
}

/// Selects samples from the retained history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Only samples for this table.
    pub table: Option<String>,
    /// Only samples of this operation kind.
    pub operation: Option<OperationKind>,
    /// Only successful (`true`) or failed (`false`) samples.
    pub success: Option<bool>,
    /// At most this many of the newest matching samples.
    pub limit: Option<usize>,
}

impl HistoryFilter {
    /// Matches every retained sample.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to one table.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Restricts to one operation kind.
    #[must_use]
    pub fn operation(mut self, operation: OperationKind) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Restricts to successes or failures.
    #[must_use]
    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    /// Keeps only the newest `limit` matches.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, sample: &MetricSample) -> bool {
        self.table.as_ref().map_or(true, |t| *t == sample.table)
            && self.operation.map_or(true, |op| op == sample.operation)
            && self.success.map_or(true, |s| s == sample.success)
    }
}

#[derive(Debug, Default)]
struct State {
    history: VecDeque<MetricSample>,
    total: u64,
    errors: u64,
    retries: u64,
    operations: BTreeMap<OperationKind, u64>,
    tables: BTreeMap<String, TableCounts>,
}

/// Collects [`MetricSample`]s from concurrent executions.
///
/// Ingestion takes a short lock and never awaits, so it is safe to call
/// from any task. History is a ring buffer: once `capacity` samples are
/// retained, the oldest is evicted for each new one. Counters are
/// cumulative and survive eviction until [`reset`](Self::reset).
#[derive(Debug)]
pub struct MetricsAggregator {
    state: Mutex<State>,
    pool: Mutex<Option<ConnectionPool>>,
    capacity: usize,
    slow_query_threshold: Duration,
    slow_query_limit: usize,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(1), 10)
    }
}

impl MetricsAggregator {
    /// Creates an aggregator retaining at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize, slow_query_threshold: Duration, slow_query_limit: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                history: VecDeque::with_capacity(capacity.min(1024)),
                ..State::default()
            }),
            pool: Mutex::new(None),
            capacity,
            slow_query_threshold,
            slow_query_limit,
        }
    }

    /// Reports live counters of `pool` in every summary.
    pub fn attach_pool(&self, pool: ConnectionPool) {
        *lock(&self.pool) = Some(pool);
    }

    /// Stops reporting live pool counters.
    pub fn detach_pool(&self) {
        *lock(&self.pool) = None;
    }

    /// Returns true if `duration` is above the slow-query threshold.
    #[must_use]
    pub fn is_slow(&self, duration: Duration) -> bool {
        duration > self.slow_query_threshold
    }

    /// Records one execution.
    pub fn ingest(&self, sample: MetricSample) {
        let slow = self.is_slow(sample.duration);
        if slow {
            warn!(
                correlation_id = %sample.correlation_id,
                table = %sample.table,
                operation = %sample.operation,
                duration_ms = duration_ms(sample.duration),
                threshold_ms = duration_ms(self.slow_query_threshold),
                "Slow query"
            );
        }

        let mut state = lock(&self.state);
        state.total += 1;
        state.retries += u64::from(sample.retries());
        *state.operations.entry(sample.operation).or_default() += 1;
        let table = state.tables.entry(sample.table.clone()).or_default();
        table.queries += 1;
        if !sample.success {
            table.errors += 1;
            state.errors += 1;
        }

        while state.history.len() >= self.capacity {
            state.history.pop_front();
        }
        state.history.push_back(sample);
    }

    /// Aggregates everything recorded so far.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn summarize(&self) -> MetricsSummary {
        let live = lock(&self.pool).as_ref().map(ConnectionPool::stats);
        let state = lock(&self.state);

        let mut durations: Vec<f64> = state
            .history
            .iter()
            .map(|s| duration_ms(s.duration))
            .collect();
        durations.sort_by(f64::total_cmp);

        let rows: Vec<usize> = state
            .history
            .iter()
            .filter(|s| s.success)
            .map(|s| s.rows)
            .collect();

        let mut slow_queries: Vec<MetricSample> = state
            .history
            .iter()
            .filter(|s| self.is_slow(s.duration))
            .cloned()
            .collect();
        slow_queries.sort_by(|a, b| b.duration.cmp(&a.duration));
        slow_queries.truncate(self.slow_query_limit);

        let mut recent_errors: Vec<MetricSample> = state
            .history
            .iter()
            .rev()
            .filter(|s| !s.success)
            .take(RECENT_ERRORS)
            .cloned()
            .collect();
        recent_errors.reverse();

        let waits: Vec<f64> = state
            .history
            .iter()
            .map(|s| duration_ms(s.pool_wait))
            .collect();

        MetricsSummary {
            total_queries: state.total,
            total_errors: state.errors,
            error_rate: if state.total == 0 {
                0.0
            } else {
                state.errors as f64 / state.total as f64
            },
            total_retries: state.retries,
            operations: state.operations.clone(),
            tables: state.tables.clone(),
            durations_ms: duration_stats(&durations),
            row_counts: row_stats(&rows),
            slow_queries,
            recent_errors,
            pool: PoolUtilization {
                live,
                mean_wait_ms: mean(&waits),
                max_wait_ms: waits.iter().copied().fold(0.0, f64::max),
            },
            retained_samples: state.history.len(),
            capacity: self.capacity,
        }
    }

    /// Retained samples matching `filter`, oldest first.
    #[must_use]
    pub fn history(&self, filter: &HistoryFilter) -> Vec<MetricSample> {
        let state = lock(&self.state);
        let mut matches: Vec<MetricSample> = state
            .history
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let skip = matches.len().saturating_sub(limit);
            matches.drain(..skip);
        }
        matches
    }

    /// Clears all samples and counters.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        *state = State::default();
    }

    /// Maximum samples retained.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Linear-interpolated percentile of sorted values; `p` in `[0, 1]`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted {
        [] => 0.0,
        [only] => *only,
        _ => {
            let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

fn duration_stats(sorted: &[f64]) -> Option<DurationStats> {
    let (first, last) = (sorted.first()?, sorted.last()?);
    Some(DurationStats {
        min: *first,
        max: *last,
        mean: mean(sorted),
        median: percentile(sorted, 0.5),
        p95: percentile(sorted, 0.95),
        p99: percentile(sorted, 0.99),
    })
}

#[allow(clippy::cast_precision_loss)]
fn row_stats(rows: &[usize]) -> Option<RowStats> {
    let min = *rows.iter().min()?;
    let max = *rows.iter().max()?;
    let total: u64 = rows.iter().map(|&r| r as u64).sum();
    Some(RowStats {
        min,
        max,
        mean: total as f64 / rows.len() as f64,
        total,
    })
}
