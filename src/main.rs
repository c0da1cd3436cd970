use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use geo_ingest::config::IngestConfig;
use geo_ingest::delivery::RawDelivery;
use geo_ingest::generator::generate_delivery;
use geo_ingest::storage::{EventStore, InMemoryEventStore, PostgresEventStore};
use geo_ingest::{logging, metrics, DeliveryError, Orchestrator};

#[derive(Parser)]
#[command(name = "geo_ingest")]
#[command(about = "Batch ingestion of queued location events into PostGIS")]
#[command(version)]
struct Cli {
    /// TOML config file; GEO_INGEST_* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one queue delivery and print its outcome as JSON
    Ingest {
        /// Queue event document ({"Records": [...]}); "-" reads stdin
        #[arg(long)]
        delivery: PathBuf,
        /// Write to an in-memory store instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,
        /// Override the configured batch size
        #[arg(long)]
        batch_size: Option<usize>,
        /// Exit non-zero when any batch was rolled back
        #[arg(long)]
        fail_on_batch_error: bool,
    },
    /// Write a synthetic queue delivery for load testing
    Generate {
        /// Number of records in the delivery
        #[arg(long, default_value_t = 10_000)]
        count: usize,
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
        /// Seed for reproducible deliveries
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Check that the configured database is reachable
    Ping,
}

fn read_delivery(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read delivery from stdin")?;
        Ok(buf)
    } else {
        fs::read(path).with_context(|| format!("Failed to read delivery '{}'", path.display()))
    }
}

async fn ingest(
    config: IngestConfig,
    delivery_path: &Path,
    dry_run: bool,
    fail_on_batch_error: bool,
) -> Result<()> {
    let settings = config.settings()?;
    let store: Arc<dyn EventStore> = if dry_run {
        info!("Dry run: writing to in-memory store");
        Arc::new(InMemoryEventStore::new())
    } else {
        Arc::new(PostgresEventStore::new(&config.database, settings.timeout)?)
    };

    let mut orchestrator = Orchestrator::new(store, settings);
    if !config.queue.url.is_empty() {
        orchestrator = orchestrator.with_queue(config.queue.url.clone());
    }

    let document = read_delivery(delivery_path)?;
    let delivery = RawDelivery::from_queue_event(&document)?;
    let outcome = match orchestrator.ingest(delivery).await {
        Ok(outcome) => outcome,
        Err(DeliveryError::StoreUnavailable { error, outcome }) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            anyhow::bail!("storage unavailable: {error}");
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if fail_on_batch_error && !outcome.all_batches_committed() {
        anyhow::bail!(
            "{} of {} batches were rolled back",
            outcome.batch_failures.len(),
            outcome.batches
        );
    }
    Ok(())
}

fn generate(count: usize, output: Option<&Path>, seed: Option<u64>) -> Result<()> {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let event = generate_delivery(rng, count);
    let document = serde_json::to_vec_pretty(&event)?;

    match output {
        Some(path) => {
            fs::write(path, &document)
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
            info!("Wrote {} records to {}", count, path.display());
        }
        None => io::stdout().write_all(&document)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = IngestConfig::load(cli.config.as_deref())?;
    let _log_guard = logging::init_logging(Path::new(&config.observability.log_dir));
    if let Some(port) = config.observability.metrics_port {
        metrics::init_metrics(port);
    }

    let result = match cli.command {
        Commands::Ingest {
            delivery,
            dry_run,
            batch_size,
            fail_on_batch_error,
        } => {
            if let Some(batch_size) = batch_size {
                config.pipeline.batch_size = batch_size;
            }
            ingest(config, &delivery, dry_run, fail_on_batch_error).await
        }
        Commands::Generate {
            count,
            output,
            seed,
        } => generate(count, output.as_deref(), seed),
        Commands::Ping => {
            let store = PostgresEventStore::new(&config.database, config.timeout())?;
            store.ping().await.map_err(anyhow::Error::from).map(|()| {
                println!("✅ Database reachable at {}:{}", config.database.host, config.database.port);
            })
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
