// crates/airline-etl-core/src/config.rs

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WAREHOUSE_URL_ENV: &str = "AIRLINE_ETL_WAREHOUSE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Catalog coordinates of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub database: String,
    pub table_name: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table_name: table_name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub airports: TableRef,
    pub flights: TableRef,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            airports: TableRef::new("airline-db", "airport_data"),
            flights: TableRef::new("airline-db", "flight_data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub manifest: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("catalog.toml"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Redshift,
    Postgres,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Append,
    Overwrite,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => f.write_str("append"),
            WriteMode::Overwrite => f.write_str("overwrite"),
        }
    }
}

/// Destination table plus the connection options used to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseTarget {
    pub connection_type: ConnectionType,
    pub dbtable: String,
    pub database: String,
    pub access_role: String,
    pub write_mode: WriteMode,
    pub batch_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Default for WarehouseTarget {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::Redshift,
            dbtable: "flight_fact".to_string(),
            database: "airline_db".to_string(),
            access_role: "glue_service_role".to_string(),
            write_mode: WriteMode::Append,
            batch_size: 1000,
            url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub sources: SourcesConfig,
    pub catalog: CatalogConfig,
    pub warehouse: WarehouseTarget,
}

impl EtlConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Loads a config file. A relative catalog manifest path is resolved against the
    /// directory containing the config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if config.catalog.manifest.is_relative() {
            if let Some(parent) = path.parent() {
                config.catalog.manifest = parent.join(&config.catalog.manifest);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_table_ref("sources.airports", &self.sources.airports)?;
        validate_table_ref("sources.flights", &self.sources.flights)?;

        let warehouse = &self.warehouse;
        if !is_qualified_identifier(&warehouse.dbtable) {
            return Err(ConfigError::Invalid {
                field: "warehouse.dbtable",
                reason: format!("'{}' is not a [schema.]table identifier", warehouse.dbtable),
            });
        }
        if warehouse.database.trim().is_empty() {
            return Err(invalid_empty("warehouse.database"));
        }
        if warehouse.access_role.trim().is_empty() {
            return Err(invalid_empty("warehouse.access_role"));
        }
        if warehouse.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "warehouse.batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(url) = &warehouse.url {
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(ConfigError::Invalid {
                    field: "warehouse.url",
                    reason: "must be a postgres:// connection URL".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn validate_table_ref(field: &'static str, table: &TableRef) -> Result<(), ConfigError> {
    if table.database.trim().is_empty() || table.table_name.trim().is_empty() {
        return Err(invalid_empty(field));
    }
    Ok(())
}

fn invalid_empty(field: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: "must not be empty".to_string(),
    }
}

fn is_qualified_identifier(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|part| is_identifier(part))
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_airline_job() {
        let config = EtlConfig::default();
        assert_eq!(config.sources.airports, TableRef::new("airline-db", "airport_data"));
        assert_eq!(config.sources.flights, TableRef::new("airline-db", "flight_data"));
        assert_eq!(config.warehouse.dbtable, "flight_fact");
        assert_eq!(config.warehouse.database, "airline_db");
        assert_eq!(config.warehouse.connection_type, ConnectionType::Redshift);
        assert_eq!(config.warehouse.write_mode, WriteMode::Append);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config = EtlConfig::from_toml_str(
            r#"
                [warehouse]
                dbtable = "analytics.flight_fact"
                write_mode = "overwrite"
            "#,
        )
        .expect("parse");

        assert_eq!(config.warehouse.dbtable, "analytics.flight_fact");
        assert_eq!(config.warehouse.write_mode, WriteMode::Overwrite);
        assert_eq!(config.warehouse.batch_size, 1000);
        assert_eq!(config.sources.flights.table_name, "flight_data");
        config.validate().expect("valid");
    }

    #[test]
    fn validate_rejects_bad_table_identifier() {
        let mut config = EtlConfig::default();
        config.warehouse.dbtable = "flight_fact; DROP TABLE x".to_string();
        let err = config.validate().expect_err("should reject");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "warehouse.dbtable",
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_empty_role_and_zero_batch() {
        let mut config = EtlConfig::default();
        config.warehouse.access_role = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = EtlConfig::default();
        config.warehouse.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_connection_type_fails_to_parse() {
        let result = EtlConfig::from_toml_str(
            r#"
                [warehouse]
                connection_type = "bigquery"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
