//! Pooled execution with classified retry.

use super::connection::{EngineFailure, QueryRows};
use super::pool::ConnectionPool;
use super::result::QueryResult;
use super::retry::RetryPolicy;
use crate::error::{CorrelationId, Error, ErrorKind};
use crate::metrics::{MetricSample, MetricsAggregator};
use crate::query::CompiledQuery;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Error code recorded for executions abandoned by their caller.
const CANCELLED: &str = "CANCELLED";

/// Runs compiled statements on pooled connections.
///
/// Each attempt acquires a connection, runs the statement on a spawned task
/// that owns the connection, and returns it when the task finishes. Between
/// attempts no connection is held. Every execution, successful or not,
/// produces exactly one [`MetricSample`].
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: ConnectionPool,
    policy: RetryPolicy,
    metrics: Arc<MetricsAggregator>,
    log_queries: bool,
}

impl QueryExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(pool: ConnectionPool, policy: RetryPolicy, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            pool,
            policy,
            metrics,
            log_queries: false,
        }
    }

    /// Logs SQL text and parameters at INFO instead of DEBUG.
    #[must_use]
    pub fn with_log_queries(mut self, log_queries: bool) -> Self {
        self.log_queries = log_queries;
        self
    }

    /// The pool this executor draws from.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `query`, retrying retryable failures per the policy.
    ///
    /// Dropping the returned future cancels the execution: a pending slot
    /// acquisition or backoff sleep stops immediately, while an attempt that
    /// is already running finishes in the background and then returns its
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] carrying the last failure, the attempt count and
    /// `correlation_id` once a fatal failure occurs or attempts run out.
    pub async fn execute(
        &self,
        query: &CompiledQuery,
        correlation_id: CorrelationId,
    ) -> Result<QueryResult, Error> {
        let mut recorder = SampleRecorder::new(&self.metrics, query, correlation_id);

        if self.log_queries {
            info!(
                correlation_id = %correlation_id,
                table = %query.table,
                operation = %query.operation,
                sql = %query.sql,
                params = ?query.params,
                "Executing query"
            );
        } else {
            debug!(
                correlation_id = %correlation_id,
                table = %query.table,
                operation = %query.operation,
                sql = %query.sql,
                "Executing query"
            );
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            recorder.attempts = attempt;

            let (outcome, waited) = self.attempt(query).await;
            recorder.pool_wait += waited;

            let failure = match outcome {
                Ok(rows) => return Ok(recorder.succeed(rows)),
                Err(failure) => failure,
            };

            if self.policy.should_retry(&failure, attempt) {
                let delay = self.policy.delay_for(attempt);
                warn!(
                    correlation_id = %correlation_id,
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %failure,
                    "Query attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            error!(
                correlation_id = %correlation_id,
                table = %query.table,
                attempts = attempt,
                code = failure.code(),
                error = %failure,
                "Query failed"
            );
            recorder.fail(failure.code());
            return Err(surface(&failure, query, attempt, correlation_id));
        }
    }

    /// Executes a batch of statements concurrently and returns their
    /// results in input order.
    ///
    /// Every statement runs as its own [`execute`](Self::execute), so no
    /// more than the pool size run at once and each is retried and sampled
    /// independently. Dropping the returned future cancels the executions
    /// that have not finished.
    pub async fn execute_many(
        &self,
        queries: Vec<(CompiledQuery, CorrelationId)>,
    ) -> Vec<Result<QueryResult, Error>> {
        let count = queries.len();
        let mut ids = Vec::with_capacity(count);
        let mut tasks = JoinSet::new();
        for (index, (query, correlation_id)) in queries.into_iter().enumerate() {
            ids.push(correlation_id);
            let executor = self.clone();
            tasks.spawn(async move { (index, executor.execute(&query, correlation_id).await) });
        }

        let mut results: Vec<Option<Result<QueryResult, Error>>> =
            std::iter::repeat_with(|| None).take(count).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(join_error) => {
                    error!(error = %join_error, "Batch execution task did not complete");
                }
            }
        }

        results
            .into_iter()
            .zip(ids)
            .map(|(result, correlation_id)| {
                result.unwrap_or_else(|| {
                    Err(Error::new(
                        ErrorKind::Query,
                        "execution task did not complete",
                        correlation_id,
                    ))
                })
            })
            .collect()
    }

    /// One attempt: acquire, dispatch, release. Returns the time spent
    /// waiting for a slot alongside the outcome.
    async fn attempt(&self, query: &CompiledQuery) -> (Result<QueryRows, EngineFailure>, Duration) {
        let acquire_started = Instant::now();
        let mut guard = match self.pool.acquire().await {
            Ok(guard) => guard,
            Err(failure) => return (Err(failure), acquire_started.elapsed()),
        };
        let waited = guard.waited();

        let sql = query.sql.clone();
        let params = query.params.clone();
        let task = tokio::spawn(async move {
            let result = guard.connection().query(&sql, &params).await;
            drop(guard);
            result
        });

        let outcome = match task.await {
            Ok(result) => result,
            Err(join_error) => Err(EngineFailure::Other(format!(
                "query task did not complete: {join_error}"
            ))),
        };
        (outcome, waited)
    }
}

/// Builds the surfaced error for a final failure.
fn surface(
    failure: &EngineFailure,
    query: &CompiledQuery,
    attempts: u32,
    correlation_id: CorrelationId,
) -> Error {
    let kind = failure.kind();
    let error = Error::new(kind, failure.to_string(), correlation_id)
        .with_context("table", query.table.clone())
        .with_context("operation", query.operation.as_str())
        .with_context("failure", failure.code())
        .with_sql(&query.sql)
        .with_attempts(attempts);

    match (kind, failure) {
        (_, EngineFailure::PoolExhausted { .. }) => error
            .with_suggestion("Increase the number of workers or the acquire timeout")
            .with_suggestion("Reduce the number of concurrent requests"),
        (_, EngineFailure::PoolClosed) => {
            error.with_suggestion("The engine has been shut down; start a new one")
        }
        (ErrorKind::Connection, _) => {
            error.with_suggestion("Check that the database is reachable at the configured URL")
        }
        (ErrorKind::TransientEngine, _) => {
            error.with_suggestion("The database is under load; retry later")
        }
        (ErrorKind::Query | ErrorKind::Validation, _) => {
            error.with_suggestion("Check the compiled SQL in the error context")
        }
    }
}

/// Records exactly one sample per execution, including abandoned ones.
struct SampleRecorder<'a> {
    metrics: &'a MetricsAggregator,
    query: &'a CompiledQuery,
    correlation_id: CorrelationId,
    started: Instant,
    attempts: u32,
    pool_wait: Duration,
    recorded: bool,
}

impl<'a> SampleRecorder<'a> {
    fn new(
        metrics: &'a MetricsAggregator,
        query: &'a CompiledQuery,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            metrics,
            query,
            correlation_id,
            started: Instant::now(),
            attempts: 0,
            pool_wait: Duration::ZERO,
            recorded: false,
        }
    }

    fn succeed(&mut self, rows: QueryRows) -> QueryResult {
        let elapsed = self.started.elapsed();
        let row_count = rows.rows.len();
        self.recorded = true;
        self.metrics.ingest(
            MetricSample::success(
                self.correlation_id,
                self.query.table.clone(),
                self.query.operation,
                elapsed,
                row_count,
            )
            .with_attempts(self.attempts)
            .with_pool_wait(self.pool_wait),
        );

        debug!(
            correlation_id = %self.correlation_id,
            rows = row_count,
            attempts = self.attempts,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Query completed"
        );

        QueryResult {
            rows: rows.rows,
            columns: rows.columns,
            row_count,
            elapsed,
            attempts: self.attempts,
            correlation_id: self.correlation_id,
        }
    }

    fn fail(&mut self, code: &str) {
        self.recorded = true;
        self.metrics.ingest(
            MetricSample::failure(
                self.correlation_id,
                self.query.table.clone(),
                self.query.operation,
                self.started.elapsed(),
                code,
            )
            .with_attempts(self.attempts)
            .with_pool_wait(self.pool_wait),
        );
    }
}

impl Drop for SampleRecorder<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            debug!(correlation_id = %self.correlation_id, "Query cancelled by caller");
            self.fail(CANCELLED);
        }
    }
}
