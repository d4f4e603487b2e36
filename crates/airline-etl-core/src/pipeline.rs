// crates/airline-etl-core/src/pipeline.rs

use std::sync::Arc;

use polars::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::EtlConfig;
use crate::enrichment::{self, EnrichmentStats};
use crate::error::Result;
use crate::job::{JobArgs, JobLedger, JobRun};
use crate::projection;
use crate::warehouse::{Warehouse, WriteReport};

/// Backends every stage runs against. Swapping in the in-memory implementations
/// runs the whole job without any external system.
#[derive(Clone)]
pub struct EtlContext {
    pub catalog: Arc<dyn Catalog>,
    pub warehouse: Arc<dyn Warehouse>,
    pub ledger: Arc<dyn JobLedger>,
}

impl EtlContext {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        warehouse: Arc<dyn Warehouse>,
        ledger: Arc<dyn JobLedger>,
    ) -> Self {
        Self {
            catalog,
            warehouse,
            ledger,
        }
    }
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub dataframe: DataFrame,
    pub airport_rows: usize,
    pub enrichment: EnrichmentStats,
    pub write: Option<WriteReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job_name: String,
    pub run_id: Option<Uuid>,
    pub airport_rows: usize,
    pub flight_rows: usize,
    pub rows_after_origin_join: usize,
    pub rows_after_destination_join: usize,
    pub output_rows: usize,
    pub dropped_rows: usize,
    pub rows_written: Option<usize>,
    pub output_fingerprint: String,
    pub dry_run: bool,
}

impl RunSummary {
    fn from_output(
        job_name: &str,
        run_id: Option<Uuid>,
        output: &PipelineOutput,
        dry_run: bool,
    ) -> Result<Self> {
        let stats = output.enrichment;
        Ok(Self {
            job_name: job_name.to_string(),
            run_id,
            airport_rows: output.airport_rows,
            flight_rows: stats.flights_in,
            rows_after_origin_join: stats.after_origin_join,
            rows_after_destination_join: stats.after_destination_join,
            output_rows: output.dataframe.height(),
            dropped_rows: stats.flights_in.saturating_sub(output.dataframe.height()),
            rows_written: output.write.as_ref().map(|report| report.rows_written),
            output_fingerprint: fingerprint(&output.dataframe)?,
            dry_run,
        })
    }
}

/// Reads both sources, joins, projects and (unless `dry_run`) writes the fact table.
pub async fn run_pipeline(
    ctx: &EtlContext,
    config: &EtlConfig,
    dry_run: bool,
) -> Result<PipelineOutput> {
    let airports = ctx.catalog.read_table(&config.sources.airports).await?;
    let flights = ctx.catalog.read_table(&config.sources.flights).await?;

    let enriched = enrichment::enrich_flights(&flights, &airports)?;
    let projected = projection::project_output(&enriched.dataframe)?;
    info!(
        flights = enriched.stats.flights_in,
        output_rows = projected.height(),
        "Projected flight facts"
    );

    let write = if dry_run {
        info!(table = %config.warehouse.dbtable, "Dry run: skipping warehouse write");
        None
    } else {
        Some(ctx.warehouse.write(&projected, &config.warehouse).await?)
    };

    Ok(PipelineOutput {
        dataframe: projected,
        airport_rows: airports.height(),
        enrichment: enriched.stats,
        write,
    })
}

/// Runs the pipeline inside a job run bracket.
///
/// The configuration is validated first. The run is committed when the pipeline
/// succeeds and aborted with the error message when it fails; dry runs never
/// touch the ledger.
pub async fn run_job(
    ctx: &EtlContext,
    config: &EtlConfig,
    args: &JobArgs,
    dry_run: bool,
) -> Result<RunSummary> {
    config.validate()?;

    if dry_run {
        let output = run_pipeline(ctx, config, true).await?;
        return RunSummary::from_output(&args.job_name, None, &output, true);
    }

    let run = JobRun::init(ctx.ledger.clone(), args).await?;
    let run_id = run.run_id();

    let outcome = run_pipeline(ctx, config, false).await.and_then(|output| {
        RunSummary::from_output(&args.job_name, Some(run_id), &output, false)
    });

    match outcome {
        Ok(summary) => {
            run.commit(&summary).await?;
            Ok(summary)
        }
        Err(err) => {
            error!(job = %args.job_name, run_id = %run_id, error = %err, "Job run failed");
            if let Err(abort_err) = run.abort(&err.to_string()).await {
                warn!(run_id = %run_id, error = %abort_err, "Failed to record job failure");
            }
            Err(err)
        }
    }
}

/// blake3 digest of the frame's CSV encoding; equal frames give equal fingerprints.
pub fn fingerprint(df: &DataFrame) -> PolarsResult<String> {
    let mut buffer = Vec::new();
    let mut frame = df.clone();
    CsvWriter::new(&mut buffer)
        .include_header(true)
        .finish(&mut frame)?;
    Ok(blake3::hash(&buffer).to_hex().to_string())
}
