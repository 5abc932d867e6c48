//! wasm-transform CLI entry point.
//!
//! Loads the transforms named in a config file and streams newline-delimited
//! records from stdin through them.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wasm_transform_common::{ConfigFile, TransformEntry};
use wasm_transform_core::{CompiledModule, WasmEngine};
use wasm_transform_runtime::{DataTransformer, NoopTransformer, TransformRuntime};

#[derive(Debug, Parser)]
#[command(name = "wasm-transform", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short, env = "WASM_TRANSFORM_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format. Logs are written to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Transform newline-delimited records read from stdin.
    Run {
        /// Table the records belong to.
        #[arg(long)]
        table: String,

        /// Only apply these configured transforms. Defaults to all of them.
        #[arg(long = "transform")]
        transforms: Vec<String>,
    },

    /// List the transforms a module exports without instantiating it.
    Inspect {
        /// Path to a `.wasm` or `.wat` module.
        path: PathBuf,

        /// Print the transforms as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Initialize every configured transform and print module identifiers.
    Modules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigFile::default(),
    };
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Command::Run { table, transforms } => {
            let entries = select_entries(&config, &transforms)?;
            let transformer = build_transformer(&config, &entries).await?;
            let result = run(transformer.as_ref(), &entries, &table).await;
            transformer.close().await?;
            result
        }
        Command::Inspect { path, json } => inspect(&config, &path, json),
        Command::Modules => {
            let entries = select_entries(&config, &[])?;
            let transformer = build_transformer(&config, &entries).await?;
            for module in transformer.modules() {
                println!("{module}");
            }
            transformer.close().await?;
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,wasm_transform=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Resolve `names` against the config, keeping config order.
fn select_entries(config: &ConfigFile, names: &[String]) -> anyhow::Result<Vec<TransformEntry>> {
    if let Some(unknown) = names.iter().find(|n| config.transform(n).is_none()) {
        bail!("Transform '{unknown}' is not configured");
    }

    Ok(config
        .transforms
        .iter()
        .filter(|t| names.is_empty() || names.contains(&t.name))
        .cloned()
        .collect())
}

async fn build_transformer(
    config: &ConfigFile,
    entries: &[TransformEntry],
) -> anyhow::Result<Box<dyn DataTransformer>> {
    if entries.is_empty() {
        warn!("No transforms configured; records pass through unchanged");
        return Ok(Box::new(NoopTransformer));
    }

    let runtime = TransformRuntime::new(&config.runtime).context("Failed to start runtime")?;
    info!(engine = %runtime.selection(), "Runtime started");

    for entry in entries {
        runtime
            .initialize_module(&entry.path)
            .await
            .with_context(|| format!("Failed to initialize transform '{}'", entry.name))?;
    }

    Ok(Box::new(runtime))
}

async fn run(
    transformer: &dyn DataTransformer,
    entries: &[TransformEntry],
    table: &str,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut processed = 0u64;
    let mut failed = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        processed += 1;

        match apply(transformer, entries, table, line.into_bytes()).await {
            Ok(record) => {
                stdout.write_all(&record).await?;
                stdout.write_all(b"\n").await?;
            }
            Err(e) => {
                failed += 1;
                error!(record = processed, error = %e, "Record dropped");
            }
        }
    }
    stdout.flush().await?;

    info!(table, processed, failed, "Input exhausted");
    if failed > 0 {
        bail!("{failed} of {processed} records failed");
    }
    Ok(())
}

/// Pass one record through every module in order.
async fn apply(
    transformer: &dyn DataTransformer,
    entries: &[TransformEntry],
    table: &str,
    mut record: Vec<u8>,
) -> anyhow::Result<Vec<u8>> {
    if entries.is_empty() {
        return Ok(transformer.execute_module("", table, &record).await?);
    }

    for entry in entries {
        record = transformer
            .execute_module(&entry.path, table, &record)
            .await
            .with_context(|| format!("Transform '{}' failed", entry.name))?;
    }
    Ok(record)
}

fn inspect(config: &ConfigFile, path: &Path, json: bool) -> anyhow::Result<()> {
    let engine = WasmEngine::new(&config.runtime.engine)?;
    let module = CompiledModule::from_file(engine.inner(), path)
        .with_context(|| format!("Failed to compile {}", path.display()))?;

    let transforms = module.transforms();
    if json {
        let body = serde_json::json!({
            "module": module.module_id(),
            "content_hash": module.content_hash(),
            "transforms": transforms
                .iter()
                .map(|t| serde_json::json!({
                    "export": t.export_name,
                    "filter": t.filter_pattern,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    if transforms.is_empty() {
        println!("{}: no transforms", module.module_id());
        return Ok(());
    }

    println!("{}", module.module_id());
    for transform in transforms {
        println!("  {}\t{}", transform.export_name, transform.filter_pattern);
    }
    Ok(())
}
