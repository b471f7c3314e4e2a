use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

use daily_stats::aggregator::{AggregationOutcome, Aggregator};
use daily_stats::bucket::DayBucket;
use daily_stats::clock::SystemClock;
use daily_stats::config::EngineConfig;
use daily_stats::diagnostics::DiagnosticsReporter;
use daily_stats::reset::ResetCoordinator;
use daily_stats::store::{CounterStore, FileCounterStore, ResetScope};

/// Daily statistics aggregation engine
#[derive(Parser)]
#[command(name = "daily-stats")]
#[command(about = "Roll live usage counters into immutable daily records", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the engine configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Base directory for the file-backed store (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate a completed day (yesterday when --day is omitted)
    Aggregate {
        /// Target day bucket, e.g. 2024-03-01
        #[arg(long)]
        day: Option<DayBucket>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recompute an already-aggregated day, superseding its aggregates
    Reaggregate {
        /// Target day bucket, e.g. 2024-03-01
        day: DayBucket,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a read-only snapshot of counter and run state
    Diagnose {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Zero live counters and record an audit entry (drift recovery)
    ForceReset {
        /// Restrict the reset to specific metrics (repeatable)
        #[arg(long = "metric")]
        metrics: Vec<String>,

        /// Restrict the reset to specific day buckets (repeatable)
        #[arg(long = "day")]
        days: Vec<DayBucket>,

        /// Actor recorded in the audit entry
        #[arg(long)]
        actor: Option<String>,
    },
    /// Apply an increment to a live counter (local ingestion adapter)
    Record {
        /// Metric name
        #[arg(long)]
        metric: String,

        /// Increment to apply
        #[arg(long, default_value = "1")]
        count: i64,

        /// Day bucket (defaults to the current bucket)
        #[arg(long)]
        day: Option<DayBucket>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("daily-stats started with verbosity level: {}", cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }

    let resolver = config.resolver()?;
    let clock = Arc::new(SystemClock);
    let store: Arc<dyn CounterStore> = Arc::new(FileCounterStore::new(config.data_dir())?);

    match cli.command {
        Commands::Aggregate { day, json } => {
            let aggregator =
                Aggregator::new(store, resolver, clock, config);
            let outcome = aggregator.aggregate(day).await?;
            print_outcome(&outcome, json)?;
        }
        Commands::Reaggregate { day, json } => {
            let aggregator =
                Aggregator::new(store, resolver, clock, config);
            let outcome = aggregator.reaggregate(day).await?;
            print_outcome(&outcome, json)?;
        }
        Commands::Diagnose { json } => {
            let reporter = DiagnosticsReporter::new(store, resolver, clock, config);
            let snapshot = reporter.diagnose().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        Commands::ForceReset {
            metrics,
            days,
            actor,
        } => {
            let actor = actor
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_else(|| "unknown".to_string());
            let coordinator = ResetCoordinator::new(store, clock);
            let audit = coordinator
                .force_reset(ResetScope { metrics, days }, &actor)
                .await?;
            println!(
                "reset {} zeroed {} counter(s), audit recorded",
                audit.id,
                audit.counters.len()
            );
        }
        Commands::Record { metric, count, day } => {
            let now = chrono::Utc::now();
            let day = day.unwrap_or_else(|| resolver.bucket_for(now));
            let value = store.increment(&metric, day, count, now).await?;
            println!("{metric} {day} = {value}");
        }
    }

    Ok(())
}

fn print_outcome(outcome: &AggregationOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    match outcome {
        AggregationOutcome::Succeeded { run, aggregates } => {
            println!(
                "{}: succeeded ({} metric(s), run {})",
                run.day,
                aggregates.len(),
                run.id
            );
            for aggregate in aggregates {
                println!("  {} = {}", aggregate.metric, aggregate.total);
            }
        }
        AggregationOutcome::TooEarly { day, eligible_at } => {
            println!("{day}: too early, eligible at {eligible_at}");
        }
        AggregationOutcome::AlreadyAggregated { day, run_id } => {
            println!("{day}: already aggregated (run {run_id})");
        }
        AggregationOutcome::InProgress { day, run_id } => {
            println!("{day}: aggregation in progress (run {run_id})");
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &daily_stats::diagnostics::DiagnosticSnapshot) {
    println!("generated at {}", snapshot.generated_at);
    println!("live counters: {}", snapshot.live_counters.len());
    for counter in &snapshot.live_counters {
        println!(
            "  {} {} = {} ({} increment(s), {}s old)",
            counter.day, counter.metric, counter.value, counter.increments, counter.age_seconds
        );
    }
    println!("recent runs: {}", snapshot.recent_runs.len());
    for run in &snapshot.recent_runs {
        println!(
            "  {} {} {:?} ({} metric(s))",
            run.day, run.id, run.status, run.metrics_aggregated
        );
    }
    if !snapshot.backlog.is_empty() {
        println!("backlog days lacking a succeeded run:");
        for day in &snapshot.backlog {
            println!("  {day}");
        }
    }
    if !snapshot.anomalies.is_empty() {
        println!("anomalies:");
        for anomaly in &snapshot.anomalies {
            println!(
                "  {} {} = {} ({:?})",
                anomaly.day, anomaly.metric, anomaly.value, anomaly.anomaly
            );
        }
    }
    println!("reset audits: {}", snapshot.reset_audits.len());
}
