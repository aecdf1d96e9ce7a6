//! The query engine: one explicitly constructed owner of schemas, computed
//! fields, the connection pool, the executor and the metrics aggregator.

use crate::computed::ComputedFieldRegistry;
use crate::config::EngineConfig;
use crate::error::{CorrelationId, Error, ValidationError};
use crate::execution::{
    ClickHouseConnector, ConnectionPool, Connector, QueryExecutor, QueryResult, RetryPolicy,
};
use crate::metrics::{MetricsAggregator, MetricsSummary};
use crate::query::{
    CompiledQuery, DepthGuard, OperationKind, QueryBuilder, QueryRequest, SelectionNode,
};
use crate::schema::SchemaRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A request rewritten for execution: computed fields replaced by the
/// columns they read.
#[derive(Debug, Clone, PartialEq)]
struct Plan {
    request: QueryRequest,
    computed: Vec<String>,
    hidden: Vec<String>,
}

/// Validation and compilation without a database.
///
/// Applies the depth guard, expands computed fields into the columns they
/// read and fills in the default list limit before building SQL.
#[derive(Debug, Clone)]
pub struct RequestCompiler {
    schemas: SchemaRegistry,
    computed: ComputedFieldRegistry,
    depth_guard: DepthGuard,
    default_limit: Option<u64>,
}

impl RequestCompiler {
    /// Creates a compiler using the depth and limit settings of `config`.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        schemas: SchemaRegistry,
        computed: ComputedFieldRegistry,
    ) -> Self {
        Self {
            schemas,
            computed,
            depth_guard: DepthGuard::new(config.max_depth)
                .with_ignore_introspection(config.ignore_introspection),
            default_limit: config.default_limit,
        }
    }

    /// The schema registry.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Validates and compiles `request`.
    ///
    /// # Errors
    ///
    /// Returns a validation [`Error`] if the selection is too deep or the
    /// request does not fit the schema.
    pub fn compile(
        &self,
        request: &QueryRequest,
        selection: Option<&[SelectionNode]>,
    ) -> Result<CompiledQuery, Error> {
        self.prepare(request, selection, CorrelationId::new())
            .map(|(compiled, _)| compiled)
    }

    fn prepare(
        &self,
        request: &QueryRequest,
        selection: Option<&[SelectionNode]>,
        correlation_id: CorrelationId,
    ) -> Result<(CompiledQuery, Plan), Error> {
        let outcome = (|| {
            if let Some(roots) = selection {
                self.depth_guard.check(roots)?;
            }
            let plan = self.plan(request);
            let compiled = QueryBuilder::new(&self.schemas).build(&plan.request)?;
            Ok::<_, ValidationError>((compiled, plan))
        })();

        match outcome {
            Ok((compiled, plan)) => {
                debug!(
                    correlation_id = %correlation_id,
                    table = %compiled.table,
                    operation = %compiled.operation,
                    params = compiled.params.len(),
                    "Query compiled"
                );
                Ok((compiled, plan))
            }
            Err(err) => {
                warn!(
                    correlation_id = %correlation_id,
                    table = %request.table,
                    error = %err,
                    "Request rejected"
                );
                Err(Error::validation(&err, correlation_id))
            }
        }
    }

    fn plan(&self, request: &QueryRequest) -> Plan {
        let mut request = request.clone();
        let mut computed = Vec::new();
        let mut hidden = Vec::new();

        if request.operation != OperationKind::Aggregate {
            let table = request.table.clone();
            let requested = std::mem::take(&mut request.fields);
            let mut fields: Vec<String> = Vec::with_capacity(requested.len());
            for name in requested {
                if self.computed.is_computed(&table, &name) {
                    computed.push(name);
                } else if !fields.contains(&name) {
                    fields.push(name);
                }
            }
            for name in &computed {
                for dependency in self.computed.dependencies(&table, name).unwrap_or_default() {
                    if !fields.contains(dependency) {
                        fields.push(dependency.clone());
                        hidden.push(dependency.clone());
                    }
                }
            }
            // Only dependency-free computed fields were selected: fetch one
            // key column so the projection does not widen to the full row.
            if fields.is_empty() && !computed.is_empty() {
                if let Ok(schema) = self.schemas.table(&table) {
                    let anchor = schema.primary_key().next().or_else(|| schema.columns.first());
                    if let Some(anchor) = anchor {
                        fields.push(anchor.name.clone());
                        hidden.push(anchor.name.clone());
                    }
                }
            }
            request.fields = fields;

            if request.operation == OperationKind::List && request.limit.is_none() {
                request.limit = self.default_limit;
            }
        }

        Plan {
            request,
            computed,
            hidden,
        }
    }

    /// Fills computed fields into `result` and drops columns that were only
    /// fetched to compute them.
    fn finish(&self, plan: &Plan, result: &mut QueryResult) {
        self.computed
            .apply(&plan.request.table, &plan.computed, &mut result.rows);
        if !plan.hidden.is_empty() {
            for row in &mut result.rows {
                for column in &plan.hidden {
                    row.remove(column);
                }
            }
            result.columns.retain(|c| !plan.hidden.contains(c));
        }
        result.columns.extend(plan.computed.iter().cloned());
    }
}

/// Compiles and runs requests against one database.
///
/// Created with [`start`](Self::start) and stopped with
/// [`shutdown`](Self::shutdown); there is no global state.
#[derive(Debug)]
pub struct QueryEngine {
    config: EngineConfig,
    compiler: RequestCompiler,
    executor: QueryExecutor,
    metrics: Arc<MetricsAggregator>,
}

impl QueryEngine {
    /// Opens the pool through `connector` and assembles the engine.
    ///
    /// # Errors
    ///
    /// Returns a connection [`Error`] if the pool cannot be opened.
    pub async fn start(
        config: EngineConfig,
        schemas: SchemaRegistry,
        computed: ComputedFieldRegistry,
        connector: &dyn Connector,
    ) -> Result<Self, Error> {
        let pool = ConnectionPool::open(connector, config.workers, config.acquire_timeout())
            .await
            .map_err(|failure| {
                Error::new(failure.kind(), failure.to_string(), CorrelationId::new())
                    .with_context("workers", config.workers.to_string())
                    .with_suggestion("Check that the database is reachable at the configured URL")
            })?;

        let metrics = Arc::new(MetricsAggregator::new(
            config.metrics.capacity,
            config.metrics.slow_query_threshold(),
            config.metrics.slow_query_limit,
        ));
        metrics.attach_pool(pool.clone());

        let policy = RetryPolicy::new(
            config.retry.max_attempts,
            config.retry.base_delay(),
            config.retry.backoff_multiplier,
        );
        let executor = QueryExecutor::new(pool, policy, Arc::clone(&metrics))
            .with_log_queries(config.log_queries);
        let compiler = RequestCompiler::new(&config, schemas, computed);

        info!(
            tables = compiler.schemas().len(),
            workers = config.workers,
            max_attempts = config.retry.max_attempts,
            max_depth = ?config.max_depth,
            default_limit = ?config.default_limit,
            "Query engine started"
        );

        Ok(Self {
            config,
            compiler,
            executor,
            metrics,
        })
    }

    /// Starts an engine connected to the `ClickHouse` server in the configuration.
    ///
    /// # Errors
    ///
    /// Returns a connection [`Error`] if the server cannot be reached.
    pub async fn connect(
        config: EngineConfig,
        schemas: SchemaRegistry,
        computed: ComputedFieldRegistry,
    ) -> Result<Self, Error> {
        let connector = ClickHouseConnector::new(&config.database);
        Self::start(config, schemas, computed, &connector).await
    }

    /// Validates and compiles `request` without running it.
    ///
    /// # Errors
    ///
    /// See [`RequestCompiler::compile`].
    pub fn compile(
        &self,
        request: &QueryRequest,
        selection: Option<&[SelectionNode]>,
    ) -> Result<CompiledQuery, Error> {
        self.compiler.compile(request, selection)
    }

    /// Validates, compiles and executes `request`.
    ///
    /// Computed fields selected by the request are filled in; columns fetched
    /// only to compute them are removed from the result.
    ///
    /// # Errors
    ///
    /// Returns a validation [`Error`] before anything runs, or the execution
    /// error once retries are exhausted.
    pub async fn run(
        &self,
        request: &QueryRequest,
        selection: Option<&[SelectionNode]>,
    ) -> Result<QueryResult, Error> {
        let correlation_id = CorrelationId::new();
        let (compiled, plan) = self.compiler.prepare(request, selection, correlation_id)?;

        let mut result = self.executor.execute(&compiled, correlation_id).await?;
        self.compiler.finish(&plan, &mut result);
        Ok(result)
    }

    /// Validates and runs a batch of requests concurrently through the pool.
    ///
    /// Results come back in request order. A request that fails validation
    /// yields its error in place without affecting the others.
    pub async fn run_many(&self, requests: &[QueryRequest]) -> Vec<Result<QueryResult, Error>> {
        let mut results: Vec<Option<Result<QueryResult, Error>>> =
            Vec::with_capacity(requests.len());
        let mut plans = Vec::new();
        let mut jobs = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            let correlation_id = CorrelationId::new();
            match self.compiler.prepare(request, None, correlation_id) {
                Ok((compiled, plan)) => {
                    jobs.push((compiled, correlation_id));
                    plans.push((index, plan));
                    results.push(None);
                }
                Err(err) => results.push(Some(Err(err))),
            }
        }

        let executed = self.executor.execute_many(jobs).await;
        for ((index, plan), outcome) in plans.into_iter().zip(executed) {
            results[index] = Some(outcome.map(|mut result| {
                self.compiler.finish(&plan, &mut result);
                result
            }));
        }
        results.into_iter().flatten().collect()
    }

    /// Current metrics summary.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        self.metrics.summarize()
    }

    /// The metrics aggregator.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// The schema registry.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        self.compiler.schemas()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Waits for in-flight executions and closes every connection.
    ///
    /// Requests issued afterwards fail with a connection error.
    pub async fn shutdown(&self) {
        self.executor.pool().close().await;
        let summary = self.metrics.summarize();
        info!(
            total_queries = summary.total_queries,
            total_errors = summary.total_errors,
            "Query engine stopped"
        );
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.executor.pool().is_closed()
    }
}
