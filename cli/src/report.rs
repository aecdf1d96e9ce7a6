//! Renderings of a metrics summary.

use clap::ValueEnum;
use engine::metrics::MetricsSummary;
use std::fmt::Write;

/// Output format of the metrics report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable text.
    Console,
    /// Pretty-printed JSON.
    Json,
}

/// Renders `summary` in the requested format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render(summary: &MetricsSummary, format: ReportFormat) -> serde_json::Result<String> {
    match format {
        ReportFormat::Console => Ok(console(summary)),
        ReportFormat::Json => serde_json::to_string_pretty(summary),
    }
}

/// Text report with one section per concern.
#[must_use]
pub fn console(summary: &MetricsSummary) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_console(&mut out, summary);
    out
}

fn write_console(out: &mut String, summary: &MetricsSummary) -> std::fmt::Result {
    writeln!(out, "Query metrics")?;
    writeln!(
        out,
        "  queries: {}  errors: {}  error rate: {:.1}%  retries: {}",
        summary.total_queries,
        summary.total_errors,
        summary.error_rate * 100.0,
        summary.total_retries
    )?;
    writeln!(
        out,
        "  history: {}/{} samples",
        summary.retained_samples, summary.capacity
    )?;

    if !summary.operations.is_empty() {
        writeln!(out, "\nOperations")?;
        for (operation, count) in &summary.operations {
            writeln!(out, "  {operation:<10} {count}")?;
        }
    }

    if !summary.tables.is_empty() {
        writeln!(out, "\nTables")?;
        for (table, counts) in &summary.tables {
            writeln!(
                out,
                "  {table:<20} queries: {:<6} errors: {}",
                counts.queries, counts.errors
            )?;
        }
    }

    if let Some(d) = &summary.durations_ms {
        writeln!(out, "\nDuration (ms)")?;
        writeln!(
            out,
            "  min {:.2}  median {:.2}  mean {:.2}  p95 {:.2}  p99 {:.2}  max {:.2}",
            d.min, d.median, d.mean, d.p95, d.p99, d.max
        )?;
    }

    if let Some(rows) = &summary.row_counts {
        writeln!(out, "\nRows")?;
        writeln!(
            out,
            "  min {}  mean {:.1}  max {}  total {}",
            rows.min, rows.mean, rows.max, rows.total
        )?;
    }

    writeln!(out, "\nPool")?;
    if let Some(live) = &summary.pool.live {
        writeln!(
            out,
            "  size {}  in use {}  available {}  utilization {:.0}%",
            live.size,
            live.in_use,
            live.available,
            live.utilization * 100.0
        )?;
        writeln!(
            out,
            "  acquisitions {}  timeouts {}",
            live.acquisitions, live.timeouts
        )?;
    }
    writeln!(
        out,
        "  wait mean {:.2} ms  max {:.2} ms",
        summary.pool.mean_wait_ms, summary.pool.max_wait_ms
    )?;

    if !summary.slow_queries.is_empty() {
        writeln!(out, "\nSlow queries")?;
        for sample in &summary.slow_queries {
            writeln!(
                out,
                "  {:>10.2} ms  {} {}  [{}]",
                sample.duration.as_secs_f64() * 1000.0,
                sample.operation,
                sample.table,
                sample.correlation_id
            )?;
        }
    }

    if !summary.recent_errors.is_empty() {
        writeln!(out, "\nRecent errors")?;
        for sample in &summary.recent_errors {
            writeln!(
                out,
                "  {}  {} {}  {}  [{}]",
                sample.timestamp.format("%H:%M:%S%.3f"),
                sample.operation,
                sample.table,
                sample.error_code.as_deref().unwrap_or("-"),
                sample.correlation_id
            )?;
        }
    }
    Ok(())
}
