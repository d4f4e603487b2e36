// crates/airline-etl/src/main.rs

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use airline_etl_core::catalog::ManifestCatalog;
use airline_etl_core::config::{EtlConfig, WarehouseTarget, WAREHOUSE_URL_ENV};
use airline_etl_core::db;
use airline_etl_core::job::{InMemoryJobLedger, JobArgs, JobLedger, PostgresJobLedger};
use airline_etl_core::pipeline::{self, EtlContext};
use airline_etl_core::warehouse::{InMemoryWarehouse, PostgresWarehouse, Warehouse};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Flight fact ETL job", long_about = None)]
struct Cli {
    /// Name identifying this job run
    #[arg(long = "JOB_NAME", value_name = "NAME")]
    job_name: String,
    /// TOML job configuration (built-in defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Catalog manifest, overriding the one named in the configuration
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Read, enrich and project without writing to the warehouse
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(None))
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EtlConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EtlConfig::default(),
    };
    if let Some(catalog) = &cli.catalog {
        config.catalog.manifest = catalog.clone();
    }
    config.validate().context("invalid job configuration")?;

    let catalog = ManifestCatalog::load(&config.catalog.manifest).with_context(|| {
        format!(
            "failed to load catalog manifest {}",
            config.catalog.manifest.display()
        )
    })?;

    let (warehouse, ledger): (Arc<dyn Warehouse>, Arc<dyn JobLedger>) = if cli.dry_run {
        (
            Arc::new(InMemoryWarehouse::new()) as Arc<dyn Warehouse>,
            Arc::new(InMemoryJobLedger::new()) as Arc<dyn JobLedger>,
        )
    } else {
        let database_url = warehouse_url(&config.warehouse)?;
        let pool = db::connect(&database_url).await?;
        let ledger = PostgresJobLedger::new(pool.clone());
        ledger
            .ensure_schema()
            .await
            .context("failed to prepare the job ledger")?;
        (
            Arc::new(PostgresWarehouse::new(pool)) as Arc<dyn Warehouse>,
            Arc::new(ledger) as Arc<dyn JobLedger>,
        )
    };

    let ctx = EtlContext::new(Arc::new(catalog), warehouse, ledger);
    let args = JobArgs::new(&cli.job_name).with_argument("JOB_NAME", &cli.job_name);

    let summary = pipeline::run_job(&ctx, &config, &args, cli.dry_run)
        .await
        .with_context(|| format!("job {} failed", cli.job_name))?;

    info!(
        job = %summary.job_name,
        output_rows = summary.output_rows,
        dropped_rows = summary.dropped_rows,
        "Job completed"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Loads `.env` (or the given file) and then builds the log filter, so a
/// `RUST_LOG` set there takes effect.
fn env_filter(dotenv_path: Option<&Path>) -> EnvFilter {
    match dotenv_path {
        Some(path) => {
            dotenvy::from_path(path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    EnvFilter::from_default_env()
}

fn warehouse_url(target: &WarehouseTarget) -> Result<String> {
    if let Some(url) = &target.url {
        return Ok(url.clone());
    }
    env::var(WAREHOUSE_URL_ENV)
        .or_else(|_| env::var("DATABASE_URL"))
        .with_context(|| {
            format!("{WAREHOUSE_URL_ENV} (or DATABASE_URL) must be set when warehouse.url is absent")
        })
}
