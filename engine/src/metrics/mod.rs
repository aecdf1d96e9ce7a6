//! Execution metrics.
//!
//! Every execution produces one [`MetricSample`]; the [`MetricsAggregator`]
//! keeps a bounded history of them plus cumulative counters and renders a
//! [`MetricsSummary`] on demand.

mod aggregator;
mod sample;

pub use aggregator::{
    DurationStats, HistoryFilter, MetricsAggregator, MetricsSummary, PoolUtilization, RowStats,
    TableCounts, RECENT_ERRORS,
};
pub use sample::MetricSample;
