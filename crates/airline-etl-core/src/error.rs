// crates/airline-etl-core/src/error.rs

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::enrichment::EnrichmentError;
use crate::job::JobError;
use crate::projection::ProjectionError;
use crate::warehouse::WarehouseError;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("catalog read failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("enrichment failed: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("projection failed: {0}")]
    Projection(#[from] ProjectionError),

    #[error("warehouse write failed: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("job bookkeeping failed: {0}")]
    Job(#[from] JobError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

pub type Result<T> = std::result::Result<T, EtlError>;
