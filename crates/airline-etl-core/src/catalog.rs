use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use polars::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::TableRef;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("table {database}.{table} is not registered in the catalog")]
    TableNotFound { database: String, table: String },
    #[error("invalid catalog manifest: {0}")]
    Manifest(String),
    #[error("failed to parse catalog manifest: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

impl CatalogError {
    fn not_found(table: &TableRef) -> Self {
        Self::TableNotFound {
            database: table.database.clone(),
            table: table.table_name.clone(),
        }
    }
}

/// Resolves (database, table) names to the current snapshot of a dataset.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn read_table(&self, table: &TableRef) -> Result<DataFrame, CatalogError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Csv,
    Parquet,
    Ndjson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub database: String,
    pub table_name: String,
    pub location: PathBuf,
    pub format: DataFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CatalogManifest {
    #[serde(default)]
    tables: Vec<CatalogEntry>,
}

/// Catalog backed by a TOML manifest of `[[tables]]` entries pointing at local files.
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    entries: HashMap<TableRef, CatalogEntry>,
}

impl ManifestCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&raw, base_dir)
    }

    /// Parses a manifest; relative `location`s are resolved against `base_dir`.
    pub fn from_toml_str(raw: &str, base_dir: &Path) -> Result<Self, CatalogError> {
        let manifest: CatalogManifest = toml::from_str(raw)?;
        let mut entries = HashMap::with_capacity(manifest.tables.len());

        for mut entry in manifest.tables {
            if entry.database.is_empty() || entry.table_name.is_empty() {
                return Err(CatalogError::Manifest(
                    "entries require a database and table_name".to_string(),
                ));
            }
            if entry.location.is_relative() {
                entry.location = base_dir.join(&entry.location);
            }
            let key = TableRef::new(entry.database.clone(), entry.table_name.clone());
            if entries.contains_key(&key) {
                return Err(CatalogError::Manifest(format!("duplicate entry for {key}")));
            }
            entries.insert(key, entry);
        }

        Ok(Self { entries })
    }

    pub fn entry(&self, table: &TableRef) -> Option<&CatalogEntry> {
        self.entries.get(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Catalog for ManifestCatalog {
    async fn read_table(&self, table: &TableRef) -> Result<DataFrame, CatalogError> {
        let entry = self
            .entries
            .get(table)
            .ok_or_else(|| CatalogError::not_found(table))?;

        debug!(table = %table, location = %entry.location.display(), "Reading catalog table");
        let mut df = read_location(&entry.location, entry.format)?;
        normalize_column_names(&mut df)?;
        info!(table = %table, rows = df.height(), columns = df.width(), "Loaded catalog table");
        Ok(df)
    }
}

fn read_location(path: &Path, format: DataFormat) -> Result<DataFrame, CatalogError> {
    let open = || {
        File::open(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
    };

    let df = match format {
        DataFormat::Csv => {
            // Surface a missing file as an I/O error rather than a polars error.
            drop(open()?);
            CsvReadOptions::default()
                .with_has_header(true)
                .try_into_reader_with_file_path(Some(path.to_path_buf()))?
                .finish()?
        }
        DataFormat::Parquet => ParquetReader::new(open()?).finish()?,
        DataFormat::Ndjson => JsonReader::new(open()?)
            .with_json_format(JsonFormat::JsonLines)
            .finish()?,
    };
    Ok(df)
}

/// Lower-cases every column name, matching how catalog schemas are registered.
pub fn normalize_column_names(df: &mut DataFrame) -> PolarsResult<()> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_lowercase())
        .collect();
    df.set_column_names(names)
}

/// Catalog holding frames in memory; returns clones of the registered frames.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tables: HashMap<TableRef, DataFrame>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableRef, df: DataFrame) -> Self {
        self.insert(table, df);
        self
    }

    pub fn insert(&mut self, table: TableRef, df: DataFrame) {
        self.tables.insert(table, df);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn read_table(&self, table: &TableRef) -> Result<DataFrame, CatalogError> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| CatalogError::not_found(table))
    }
}
