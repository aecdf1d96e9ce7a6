//! ClickQL CLI
//!
//! Command-line driver for the ClickQL engine: compiles request documents to
//! parameterized SQL and runs them against `ClickHouse`.
//!
//! # Usage
//!
//! ```bash
//! clickql --help
//! clickql compile --schema tables.json --request top_sales.json
//! clickql run --schema tables.json --request top_sales.json --report console
//! ```
//!
//! Connection and engine settings come from `CLICKQL_*` environment
//! variables, optionally loaded from a `.env` file.

#![deny(unsafe_code)]

mod report;
mod request;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use engine::computed::ComputedFieldRegistry;
use engine::config::EngineConfig;
use engine::{CorrelationId, QueryEngine, RequestCompiler};
use report::ReportFormat;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// ClickQL CLI - compile and run graph-style queries against ClickHouse
#[derive(Parser)]
#[command(name = "clickql")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "CLICKQL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a request and print the compiled SQL and parameters
    Compile {
        /// JSON file holding the table schemas
        #[arg(short, long, env = "CLICKQL_SCHEMA")]
        schema: PathBuf,
        /// JSON file holding the request
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Execute a request and print the resulting rows
    Run {
        /// JSON file holding the table schemas
        #[arg(short, long, env = "CLICKQL_SCHEMA")]
        schema: PathBuf,
        /// JSON file holding the request
        #[arg(short, long)]
        request: PathBuf,
        /// Execute the request this many times
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Print a metrics report after execution
        #[arg(long, value_enum)]
        report: Option<ReportFormat>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Compile { schema, request } => compile(&schema, &request),
        Commands::Run {
            schema,
            request,
            repeat,
            report,
        } => run(&schema, &request, repeat, report).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config() -> Result<EngineConfig> {
    EngineConfig::from_env().context("invalid engine configuration")
}

/// Prints a surfaced engine error as JSON on stderr.
fn fail(error: &engine::Error) -> Result<ExitCode> {
    eprintln!("{}", serde_json::to_string_pretty(error)?);
    Ok(ExitCode::FAILURE)
}

fn compile(schema_path: &Path, request_path: &Path) -> Result<ExitCode> {
    let config = load_config()?;
    let compiler = RequestCompiler::new(
        &config,
        request::load_schemas(schema_path)?,
        ComputedFieldRegistry::new(),
    );
    let (request, selection) = match request::load_request(request_path)?.into_request() {
        Ok(parts) => parts,
        Err(err) => return fail(&engine::Error::validation(&err, CorrelationId::new())),
    };

    match compiler.compile(&request, selection.as_deref()) {
        Ok(compiled) => {
            println!("{}", serde_json::to_string_pretty(&compiled)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => fail(&err),
    }
}

async fn run(
    schema_path: &Path,
    request_path: &Path,
    repeat: u32,
    report: Option<ReportFormat>,
) -> Result<ExitCode> {
    let config = load_config()?;
    let schemas = request::load_schemas(schema_path)?;
    let (request, selection) = match request::load_request(request_path)?.into_request() {
        Ok(parts) => parts,
        Err(err) => return fail(&engine::Error::validation(&err, CorrelationId::new())),
    };

    let engine = match QueryEngine::connect(config, schemas, ComputedFieldRegistry::new()).await {
        Ok(engine) => engine,
        Err(err) => return fail(&err),
    };

    tracing::info!(
        table = %request.table,
        operation = %request.operation,
        repeat,
        "Running request"
    );
    let mut status = ExitCode::SUCCESS;
    for _ in 0..repeat.max(1) {
        match engine.run(&request, selection.as_deref()).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(err) => {
                status = fail(&err)?;
                break;
            }
        }
    }

    if let Some(format) = report {
        println!("{}", report::render(&engine.summary(), format)?);
    }
    engine.shutdown().await;
    Ok(status)
}
