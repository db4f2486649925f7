//! `granary` — build the dataset, materialize rollups, and run query files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use granary_common::config::AppConfig;
use granary_common::retry::retry_async;
use granary_common::telemetry;
use granary_error::GranaryError;
use granary_runtime::build::DatasetBuilder;
use granary_runtime::session::CacheOutcome;
use granary_runtime::verify::compare_results;
use granary_runtime::{DuckDbEngine, QueryReport, QuerySession, ResultSet, RollupCatalog};
use owo_colors::OwoColorize;

#[derive(Parser)]
#[command(
    name = "granary",
    version,
    about = "Rollup-routing analytical query engine on DuckDB"
)]
struct Cli {
    /// Configuration file; GRANARY__-prefixed environment variables override it.
    #[arg(long, global = true, default_value = "granary.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest events_part_*.csv files and persist the typed event table.
    Prepare {
        /// Directory holding the event part files.
        #[arg(long)]
        data_dir: PathBuf,
    },
    /// Materialize the rollup tables from the persisted event table.
    BuildRollups,
    /// Execute a JSON file of queries, writing one CSV result per query.
    Run {
        /// File containing a JSON array of query documents.
        #[arg(long)]
        queries: PathBuf,
        /// Directory for q<N>.csv result files.
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
        /// Directory of q<N>.csv ground-truth files to compare against.
        #[arg(long)]
        truth_dir: Option<PathBuf>,
        /// Execute every query against the engine, bypassing the cache.
        #[arg(long)]
        no_cache: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    let otlp = config
        .telemetry
        .enabled
        .then_some(config.telemetry.endpoint.as_str());
    telemetry::init_tracing(&config.telemetry.service_name, otlp)?;

    let outcome = dispatch(cli.command, &config).await;
    telemetry::shutdown_telemetry();

    match outcome {
        Ok(failed) if failed > 0 => {
            eprintln!("{} {failed} quer(ies) failed", "✗".red());
            std::process::exit(1);
        }
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    }
}

async fn dispatch(command: Commands, config: &AppConfig) -> Result<usize> {
    let engine = Arc::new(DuckDbEngine::open(
        Path::new(&config.engine.db_path),
        Duration::from_secs(config.limits.query_timeout_secs),
    )?);

    match command {
        Commands::Prepare { data_dir } => {
            let builder = DatasetBuilder::new(engine.as_ref(), &config.engine);
            builder.prepare(&data_dir).await?;
            println!(
                "{} dataset prepared into {}",
                "✓".green(),
                config.engine.db_path.cyan()
            );
            Ok(0)
        }
        Commands::BuildRollups => {
            let mut catalog = RollupCatalog::standard(config.engine.raw_table.clone());
            let builder = DatasetBuilder::new(engine.as_ref(), &config.engine);
            builder.build_rollups(&mut catalog).await?;
            for rollup in catalog.rollups() {
                println!(
                    "{} {} ({} rows)",
                    "✓".green(),
                    rollup.name.cyan(),
                    rollup.row_estimate.unwrap_or(0)
                );
            }
            Ok(0)
        }
        Commands::Run {
            queries,
            out_dir,
            truth_dir,
            no_cache,
        } => {
            run_queries(engine, config, &queries, &out_dir, truth_dir.as_deref(), no_cache).await
        }
    }
}

async fn run_queries(
    engine: Arc<DuckDbEngine>,
    config: &AppConfig,
    queries_path: &Path,
    out_dir: &Path,
    truth_dir: Option<&Path>,
    no_cache: bool,
) -> Result<usize> {
    let mut catalog = RollupCatalog::standard(config.engine.raw_table.clone());
    catalog.verify(engine.as_ref()).await?;
    DatasetBuilder::new(engine.as_ref(), &config.engine)
        .refresh_estimates(&mut catalog)
        .await?;

    let mut cache_settings = config.cache.clone();
    if no_cache {
        cache_settings.enabled = false;
    }
    let session = QuerySession::new(engine, catalog, &cache_settings);

    let raw = std::fs::read_to_string(queries_path)
        .with_context(|| format!("reading {}", queries_path.display()))?;
    let docs: Vec<serde_json::Value> =
        serde_json::from_str(&raw).context("queries file must be a JSON array")?;
    if docs.is_empty() {
        bail!("queries file {} is empty", queries_path.display());
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut failed = 0usize;
    for (i, doc) in docs.iter().enumerate() {
        let body = doc.to_string();
        // One retry with backoff for transient failures (timeouts, resource
        // pressure); fatal errors surface immediately.
        let outcome = retry_async(
            "query",
            config.retry,
            GranaryError::is_transient,
            || session.run_json(&body),
        )
        .await;

        match outcome {
            Ok(report) => {
                let out_path = out_dir.join(format!("q{i}.csv"));
                report.result.write_csv(&out_path)?;
                let verified = verify_one(&report, truth_dir, i)?;
                print_report(i, &report, verified);
                if verified == Some(false) {
                    failed += 1;
                }
            }
            Err(e) => {
                failed += 1;
                println!("{} q{i}: {e}", "✗".red());
            }
        }
    }

    if let Some(stats) = session.cache_stats() {
        println!(
            "cache: {} hits, {} misses, {} evictions, {:.0}% hit rate",
            stats.hits,
            stats.misses,
            stats.evictions,
            stats.hit_rate() * 100.0
        );
    }
    Ok(failed)
}

/// Compare one result against `truth_dir/q<N>.csv` when present.
/// Returns None when no truth file applies.
fn verify_one(
    report: &QueryReport,
    truth_dir: Option<&Path>,
    index: usize,
) -> Result<Option<bool>> {
    let Some(dir) = truth_dir else {
        return Ok(None);
    };
    let path = dir.join(format!("q{index}.csv"));
    if !path.exists() {
        return Ok(None);
    }
    let truth = ResultSet::from_csv(&path)?;
    let verdict = compare_results(&report.result, &truth);
    if !verdict.matches() {
        for mismatch in &verdict.mismatches {
            println!("    {:?}", mismatch.red());
        }
        if verdict.truncated {
            println!("    {}", "(further mismatches omitted)".dimmed());
        }
    }
    Ok(Some(verdict.matches()))
}

fn print_report(index: usize, report: &QueryReport, verified: Option<bool>) {
    let cache_tag = match report.cache {
        CacheOutcome::Hit => "HIT".yellow().to_string(),
        CacheOutcome::MissStored => "MISS".dimmed().to_string(),
        CacheOutcome::Bypass => "OFF".dimmed().to_string(),
    };
    let verdict_tag = match verified {
        Some(true) => format!(" {}", "PASS".green()),
        Some(false) => format!(" {}", "FAIL".red()),
        None => String::new(),
    };
    println!(
        "{} q{index}: {} rows from {} in {:.1}ms [{}]{}",
        "✓".green(),
        report.result.row_count(),
        report.source.cyan(),
        report.elapsed.as_secs_f64() * 1000.0,
        cache_tag,
        verdict_tag
    );
}
