//! Loader Service - Loads a violent-crime export into the normalized schema
//!
//! Usage:
//!   # Clean, resolve and load (DB_URL from env or .env):
//!   cargo run --bin loader -- --source crimes_violentos_2023.csv
//!
//!   # Inspect without touching the database:
//!   cargo run --bin loader -- --source crimes_violentos_2023.csv --dry-run --view monthly
//!
//! Re-running against a loaded database performs no writes.

use anyhow::{Context, Result};
use clap::Parser;
use loader::aggregate::{View, ViewKind};
use loader::config::DEFAULT_MAX_DROP_RATIO;
use loader::pipeline::{self, Prepared};
use loader::writer::LoadOutcome;
use loader::{db, ConnectionTarget, PipelineConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads a violent-crime export into the normalized schema")]
struct Args {
    /// Source CSV file
    #[arg(long)]
    source: PathBuf,

    /// Size of the top-municipalities view
    #[arg(long, default_value_t = 10)]
    top_n: usize,

    /// Field delimiter of the source
    #[arg(long, default_value = ";")]
    delimiter: char,

    /// Target schema (defaults to DB_SCHEMA, then the connection's search_path)
    #[arg(long)]
    schema: Option<String>,

    /// Dry run - clean and resolve only, don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Fail the run when the drop rate exceeds MAX_DROP_RATIO
    #[arg(long, default_value = "false")]
    strict: bool,

    /// View to print after loading (repeatable): top-municipalities, monthly, quarterly, crime-types
    #[arg(long = "view")]
    views: Vec<ViewKind>,

    /// Print views as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::new(args.source.clone());
    config.top_n = args.top_n;
    config.strict = args.strict;
    config.delimiter = u8::try_from(args.delimiter)
        .ok()
        .filter(u8::is_ascii)
        .context("Delimiter must be a single ASCII character")?;
    config.max_drop_ratio = match std::env::var("MAX_DROP_RATIO") {
        Ok(value) => value.parse().context("MAX_DROP_RATIO must be a number")?,
        Err(_) => DEFAULT_MAX_DROP_RATIO,
    };

    if !args.dry_run {
        let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
        let mut target = ConnectionTarget::new(db_url);
        if let Some(schema) = args.schema.clone().or_else(|| std::env::var("DB_SCHEMA").ok()) {
            target = target.with_schema(schema);
        }
        config.connection_target = Some(target);
    }

    config.validate()?;
    Ok(config)
}

fn print_report(prepared: &Prepared) {
    let drops = &prepared.drops;
    println!("\nRows read:    {}", drops.input_rows);
    println!("Rows kept:    {}", drops.kept());
    println!(
        "Rows dropped: {} ({} invalid, {} unresolvable, {:.1}%)",
        drops.dropped(),
        drops.validation_drops,
        drops.integrity_drops,
        drops.ratio() * 100.0
    );

    let messages: Vec<String> = prepared
        .validation_errors
        .iter()
        .map(|e| e.to_string())
        .chain(prepared.integrity_errors().iter().map(|e| e.to_string()))
        .collect();
    for (i, msg) in messages.iter().take(5).enumerate() {
        println!("  [{}] {}", i + 1, msg);
    }
    if messages.len() > 5 {
        println!("  ... and {} more", messages.len() - 5);
    }

    let resolution = &prepared.resolution;
    println!("\nRegions:        {}", resolution.regions.len());
    println!("Municipalities: {}", resolution.municipalities.len());
    println!("Crime types:    {}", resolution.crime_types.len());
    println!("Crime records:  {}", resolution.facts.len());
}

fn print_outcome(outcome: &LoadOutcome) {
    match outcome {
        LoadOutcome::Inserted { crime_records, .. } => {
            println!("\nInserted {} crime records", crime_records);
        }
        LoadOutcome::Skipped {
            existing,
            count_mismatch,
        } => {
            println!(
                "\nData already in the database ({} crime records). Skipping insertion.",
                existing.crime_records
            );
            if *count_mismatch {
                println!("WARNING: the stored record count differs from this source; not merged.");
            }
        }
    }
}

fn print_view(view: &View) {
    println!("\n--- {} ---", view.title);
    let width = view.rows.iter().map(|r| r.label.chars().count()).max().unwrap_or(0);
    for row in &view.rows {
        println!("  {:<width$}  {:>10}", row.label, row.total, width = width);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let config = build_config(&args)?;

    println!("=== Crime Records Loader ===");
    println!("Source: {}", config.source_path.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let prepared = match &config.connection_target {
        Some(target) => {
            let pool = db::connect(target)
                .await
                .context("Failed to connect to database")?;
            let (prepared, outcome) = pipeline::run(&config, &pool).await?;
            print_report(&prepared);
            print_outcome(&outcome);
            prepared
        }
        None => {
            let prepared = pipeline::prepare(&config).await?;
            print_report(&prepared);
            println!("\nDry run - nothing saved to database");
            prepared
        }
    };

    if !args.views.is_empty() {
        let facts = prepared.resolution.facts();
        let views: Vec<View> = args
            .views
            .iter()
            .map(|kind| kind.compute(&facts, config.top_n))
            .collect();

        if args.json {
            println!("{}", serde_json::to_string_pretty(&views)?);
        } else {
            views.iter().for_each(print_view);
        }
    }

    Ok(())
}
