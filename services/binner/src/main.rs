//! Level-3 binner.
//!
//! Accumulates geolocated pixel files into a bin database on the equal-area
//! grid, then finalizes, inspects, dumps or deletes that database.

mod config;
mod ingest;

use anyhow::{Context, Result};
use bin_store::{BinDatabase, BinStoreError, BoundingBox, StorageType};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::BinnerConfig;
use ingest::{band_mean, band_sizes, Binner, WEIGHT};

#[derive(Parser, Debug)]
#[command(name = "binner")]
#[command(about = "Bin geolocated observations into Level-3 bin databases")]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "BINNER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bin JSON-lines pixel files into a database, creating it if needed
    Ingest {
        /// Database directory
        #[arg(short, long)]
        db: PathBuf,

        /// Pixel files, one JSON object per line
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Grid cell size in km (new databases only)
        #[arg(long)]
        cell_size: Option<f64>,

        /// Storage backend: simple or quad (new databases only)
        #[arg(long)]
        storage: Option<String>,

        /// Number of variables per pixel
        #[arg(long)]
        variables: Option<usize>,

        /// Finalize the database after the last file
        #[arg(long)]
        finalize: bool,
    },

    /// Commit a temp database to its final store
    Finalize {
        #[arg(short, long)]
        db: PathBuf,
    },

    /// Print database properties
    Info {
        #[arg(short, long)]
        db: PathBuf,
    },

    /// Print every bin with data as a JSON line
    Dump {
        #[arg(short, long)]
        db: PathBuf,

        /// Stop after this many bins
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Remove a database
    Delete {
        #[arg(short, long)]
        db: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_tracing(&args.log_level, args.log_json) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let misuse = is_misuse(&e);
            error!(error = %format!("{:#}", e), misuse, "binner failed");
            ExitCode::from(if misuse { 2 } else { 1 })
        }
    }
}

/// Whether a failure comes from asking a database for something its
/// contract forbids (bad index, writing a final database) rather than from
/// bad data or I/O.
fn is_misuse(err: &anyhow::Error) -> bool {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BinStoreError>())
        .is_some_and(BinStoreError::is_contract_violation)
}

fn run(args: Args) -> Result<()> {
    let mut config = BinnerConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Ingest {
            db,
            inputs,
            cell_size,
            storage,
            variables,
            finalize,
        } => {
            if let Some(cell_size) = cell_size {
                config.database.cell_size_km = cell_size;
            }
            if let Some(storage) = storage {
                config.database.storage_type =
                    StorageType::parse(&storage).map_err(anyhow::Error::msg)?;
            }
            if let Some(variables) = variables {
                config.variables = variables;
            }
            config.validate()?;
            run_ingest(&config, db, &inputs, finalize)
        }
        Command::Finalize { db } => run_finalize(&config, db),
        Command::Info { db } => run_info(&config, db),
        Command::Dump { db, limit } => run_dump(&config, db, limit),
        Command::Delete { db } => {
            BinDatabase::delete(&db)
                .with_context(|| format!("Failed to delete {}", db.display()))?;
            Ok(())
        }
    }
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so `dump` output stays machine readable
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn run_ingest(
    config: &BinnerConfig,
    dir: PathBuf,
    inputs: &[PathBuf],
    finalize: bool,
) -> Result<()> {
    let db = BinDatabase::open_or_create(&dir, &config.database, &band_sizes(config.variables))
        .with_context(|| format!("Failed to open bin database {}", dir.display()))?;
    info!(
        db = %dir.display(),
        files = inputs.len(),
        variables = config.variables,
        "Starting ingestion"
    );

    let mut binner = Binner::new(db, config.variables, config.flush_interval);
    let mut pixels = 0;
    let mut skipped = 0;
    for input in inputs {
        let stats = binner.ingest_file(input)?;
        pixels += stats.pixels;
        skipped += stats.skipped;
    }

    let mut db = binner.into_database()?;
    let cache = db.cache_stats();
    info!(
        files = inputs.len(),
        pixels,
        skipped,
        cache_hit_rate = cache.hit_rate(),
        evictions = cache.evictions,
        "Ingestion complete"
    );

    if finalize {
        db.finalize().context("Failed to finalize bin database")?;
    }
    db.close()?;
    Ok(())
}

fn run_finalize(config: &BinnerConfig, dir: PathBuf) -> Result<()> {
    let mut db = BinDatabase::open(&dir, &config.database)
        .with_context(|| format!("Failed to open bin database {}", dir.display()))?;
    let summary = db.finalize().context("Failed to finalize bin database")?;
    println!(
        "finalized {}: {} bins, {} bytes",
        dir.display(),
        summary.bins_written,
        summary.bytes_written
    );
    db.close()?;
    Ok(())
}

fn run_info(config: &BinnerConfig, dir: PathBuf) -> Result<()> {
    let db = BinDatabase::open(&dir, &config.database)
        .with_context(|| format!("Failed to open bin database {}", dir.display()))?;
    let locator = db.locator();

    println!("Database:        {}", dir.display());
    println!("State:           {}", db.state());
    println!("Storage:         {}", db.storage_type());
    println!("Cell size:       {} km", db.properties().cell_size_km);
    println!("Rows:            {}", locator.rows());
    println!("Total bins:      {}", locator.total_bin_count());
    println!("Bins with data:  {}", db.stored_bin_count());
    println!("Band sizes:      {:?}", db.band_sizes());
    println!("Products:        {}", db.properties().processed_products);
    println!("Bounds:          {}", describe_bounds(db.properties().bounds));
    println!("Created:         {}", db.properties().created_at);
    if let Some(finalized_at) = db.properties().finalized_at {
        println!("Finalized:       {}", finalized_at);
    }
    Ok(())
}

fn describe_bounds(bounds: Option<BoundingBox>) -> String {
    match bounds {
        Some(b) => format!(
            "lat [{:.4}, {:.4}] lon [{:.4}, {:.4}] ({:.4} x {:.4} deg)",
            b.lat_min,
            b.lat_max,
            b.lon_min,
            b.lon_max,
            b.height(),
            b.width()
        ),
        None => "(empty)".to_string(),
    }
}

fn run_dump(config: &BinnerConfig, dir: PathBuf, limit: Option<usize>) -> Result<()> {
    let mut db = BinDatabase::open(&dir, &config.database)
        .with_context(|| format!("Failed to open bin database {}", dir.display()))?;
    let locator = db.locator().clone();
    let variables = db.band_sizes().len();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for item in db.iterate()?.take(limit.unwrap_or(usize::MAX)) {
        let (index, mut bin) = item?;
        let center = locator
            .lat_lon(index)
            .with_context(|| format!("Bin {} is outside the grid", index))?;

        let mut means = Vec::with_capacity(variables);
        let mut weights = Vec::with_capacity(variables);
        for variable in 0..variables {
            means.push(band_mean(&mut bin, variable)?);
            weights.push(bin.read(WEIGHT)?);
        }

        let line = json!({
            "index": index,
            "lat": center.lat,
            "lon": center.lon,
            "mean": means,
            "weight": weights,
        });
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}
