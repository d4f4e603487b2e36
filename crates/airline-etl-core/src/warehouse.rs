// crates/airline-etl-core/src/warehouse.rs

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use polars::prelude::*;
use serde::Serialize;
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConnectionType, WarehouseTarget, WriteMode};
use crate::db::DbPool;

/// Bind parameters one statement may carry on the Postgres wire protocol.
const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("warehouse query failed: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("connected to database '{actual}' but the target database is '{expected}'")]
    DatabaseMismatch { expected: String, actual: String },
    #[error("cannot write a dataset without columns to {0}")]
    EmptySchema(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub table: String,
    pub rows_written: usize,
    pub mode: WriteMode,
}

/// Destination for the projected fact rows.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn write(
        &self,
        df: &DataFrame,
        target: &WarehouseTarget,
    ) -> Result<WriteReport, WarehouseError>;
}

/// Writes over the Postgres wire protocol, which Redshift also speaks.
///
/// The whole write runs in one transaction: the target database is checked, the
/// setup statements from [`setup_statements`] run, and rows are inserted in
/// batches. Postgres targets assume the access role with `SET LOCAL ROLE`;
/// Redshift has no session roles, so there the role stays with the connection.
#[derive(Debug, Clone)]
pub struct PostgresWarehouse {
    pool: DbPool,
}

impl PostgresWarehouse {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn write(
        &self,
        df: &DataFrame,
        target: &WarehouseTarget,
    ) -> Result<WriteReport, WarehouseError> {
        let columns = column_specs(df);
        if columns.is_empty() {
            return Err(WarehouseError::EmptySchema(target.dbtable.clone()));
        }
        let values = df
            .get_columns()
            .iter()
            .map(ColumnValues::from_column)
            .collect::<PolarsResult<Vec<_>>>()?;

        let mut tx = self.pool.begin().await?;

        let actual: String = sqlx::query_scalar("SELECT current_database()")
            .fetch_one(tx.as_mut())
            .await?;
        if actual != target.database {
            return Err(WarehouseError::DatabaseMismatch {
                expected: target.database.clone(),
                actual,
            });
        }

        if target.connection_type == ConnectionType::Redshift {
            debug!(
                role = %target.access_role,
                "Redshift target: access role is not applied per session"
            );
        }
        for statement in setup_statements(target, &columns) {
            let result = sqlx::query(&statement).execute(tx.as_mut()).await?;
            debug!(
                statement = %statement,
                rows = result.rows_affected(),
                "Ran setup statement"
            );
        }

        let insert_prefix = insert_prefix_sql(&target.dbtable, &columns);
        let height = df.height();
        let batch_rows = rows_per_batch(target.batch_size, columns.len());
        let mut start = 0;
        while start < height {
            let end = (start + batch_rows).min(height);
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(&insert_prefix);
            builder.push_values(start..end, |mut row, idx| {
                for column in &values {
                    column.push_bind(&mut row, idx);
                }
            });
            builder.build().execute(tx.as_mut()).await?;
            start = end;
        }

        tx.commit().await?;

        info!(
            table = %target.dbtable,
            rows = height,
            mode = %target.write_mode,
            "Wrote warehouse table"
        );

        Ok(WriteReport {
            table: target.dbtable.clone(),
            rows_written: height,
            mode: target.write_mode,
        })
    }
}

/// Keeps written frames per table. Append stacks onto what is there; overwrite replaces it.
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    tables: Mutex<HashMap<String, DataFrame>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<DataFrame> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn write(
        &self,
        df: &DataFrame,
        target: &WarehouseTarget,
    ) -> Result<WriteReport, WarehouseError> {
        if df.width() == 0 {
            return Err(WarehouseError::EmptySchema(target.dbtable.clone()));
        }

        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let report = WriteReport {
            table: target.dbtable.clone(),
            rows_written: df.height(),
            mode: target.write_mode,
        };

        if target.write_mode == WriteMode::Append {
            if let Some(existing) = tables.get_mut(&target.dbtable) {
                existing.vstack_mut(df)?;
                return Ok(report);
            }
        }
        tables.insert(target.dbtable.clone(), df.clone());
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlType {
    BigInt,
    DoublePrecision,
    Boolean,
    Varchar,
}

impl SqlType {
    fn for_dtype(dtype: &DataType) -> Self {
        if dtype.is_integer() {
            SqlType::BigInt
        } else if dtype.is_float() {
            SqlType::DoublePrecision
        } else if matches!(dtype, DataType::Boolean) {
            SqlType::Boolean
        } else {
            SqlType::Varchar
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            SqlType::BigInt => "BIGINT",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Varchar => "VARCHAR(65535)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnSpec {
    name: String,
    sql_type: SqlType,
}

fn column_specs(df: &DataFrame) -> Vec<ColumnSpec> {
    df.get_columns()
        .iter()
        .map(|column| ColumnSpec {
            name: column.name().to_string(),
            sql_type: SqlType::for_dtype(column.dtype()),
        })
        .collect()
}

/// Column data materialised into the value types sqlx can bind.
enum ColumnValues {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
}

impl ColumnValues {
    fn from_column(column: &Column) -> PolarsResult<Self> {
        let series = column.as_materialized_series();
        let values = match SqlType::for_dtype(series.dtype()) {
            SqlType::BigInt => {
                ColumnValues::Int(series.cast(&DataType::Int64)?.i64()?.into_iter().collect())
            }
            SqlType::DoublePrecision => {
                ColumnValues::Float(series.cast(&DataType::Float64)?.f64()?.into_iter().collect())
            }
            SqlType::Boolean => ColumnValues::Bool(series.bool()?.into_iter().collect()),
            SqlType::Varchar => ColumnValues::Text(
                series
                    .cast(&DataType::String)?
                    .str()?
                    .into_iter()
                    .map(|value| value.map(str::to_string))
                    .collect(),
            ),
        };
        Ok(values)
    }

    fn push_bind(&self, row: &mut Separated<'_, '_, Postgres, &'static str>, idx: usize) {
        match self {
            ColumnValues::Int(values) => {
                row.push_bind(values[idx]);
            }
            ColumnValues::Float(values) => {
                row.push_bind(values[idx]);
            }
            ColumnValues::Bool(values) => {
                row.push_bind(values[idx]);
            }
            ColumnValues::Text(values) => {
                row.push_bind(values[idx].clone());
            }
        }
    }
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

fn set_role_sql(role: &str) -> String {
    format!("SET LOCAL ROLE {}", quote_identifier(role))
}

/// Statements run inside the write transaction before any rows are inserted.
fn setup_statements(target: &WarehouseTarget, columns: &[ColumnSpec]) -> Vec<String> {
    let mut statements = Vec::new();
    if target.connection_type == ConnectionType::Postgres {
        statements.push(set_role_sql(&target.access_role));
    }
    statements.push(create_table_sql(&target.dbtable, columns));
    if target.write_mode == WriteMode::Overwrite {
        statements.push(format!("DELETE FROM {}", quote_qualified(&target.dbtable)));
    }
    statements
}

/// Configured batch size, capped so one INSERT stays within the bind parameter limit.
fn rows_per_batch(batch_size: usize, column_count: usize) -> usize {
    let limit = MAX_BIND_PARAMETERS / column_count.max(1);
    batch_size.min(limit).max(1)
}

fn create_table_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let definitions = columns
        .iter()
        .map(|column| format!("{} {}", quote_identifier(&column.name), column.sql_type.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({definitions})",
        quote_qualified(table)
    )
}

fn insert_prefix_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let names = columns
        .iter()
        .map(|column| quote_identifier(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({names}) ", quote_qualified(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact_frame() -> DataFrame {
        df![
            "carrier" => &["AA"],
            "originairportid" => &[1i32],
            "depdelay" => &[Some(5.5f64)],
            "cancelled" => &[false],
        ]
        .expect("df")
    }

    #[test]
    fn create_table_maps_dtypes_and_quotes_names() {
        let columns = column_specs(&fact_frame());
        let sql = create_table_sql("analytics.flight_fact", &columns);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"analytics\".\"flight_fact\" (\"carrier\" VARCHAR(65535), \"originairportid\" BIGINT, \"depdelay\" DOUBLE PRECISION, \"cancelled\" BOOLEAN)"
        );
    }

    #[test]
    fn insert_prefix_lists_columns_in_frame_order() {
        let columns = column_specs(&fact_frame());
        assert_eq!(
            insert_prefix_sql("flight_fact", &columns),
            "INSERT INTO \"flight_fact\" (\"carrier\", \"originairportid\", \"depdelay\", \"cancelled\") "
        );
    }

    #[test]
    fn role_names_are_quoted() {
        assert_eq!(set_role_sql("etl\"writer"), "SET LOCAL ROLE \"etl\"\"writer\"");
    }

    fn target(connection_type: ConnectionType, write_mode: WriteMode) -> WarehouseTarget {
        WarehouseTarget {
            connection_type,
            write_mode,
            access_role: "etl_writer".to_string(),
            ..WarehouseTarget::default()
        }
    }

    #[test]
    fn postgres_setup_assumes_the_role_first() {
        let columns = column_specs(&fact_frame());
        let statements = setup_statements(
            &target(ConnectionType::Postgres, WriteMode::Append),
            &columns,
        );
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "SET LOCAL ROLE \"etl_writer\"");
        assert_eq!(statements[1], create_table_sql("flight_fact", &columns));
    }

    #[test]
    fn redshift_setup_never_sets_a_role() {
        let columns = column_specs(&fact_frame());
        let statements = setup_statements(
            &target(ConnectionType::Redshift, WriteMode::Overwrite),
            &columns,
        );
        assert_eq!(
            statements,
            vec![
                create_table_sql("flight_fact", &columns),
                "DELETE FROM \"flight_fact\"".to_string(),
            ]
        );
        assert!(statements.iter().all(|sql| !sql.contains("ROLE")));
    }

    #[test]
    fn batches_stay_within_the_bind_parameter_limit() {
        assert_eq!(rows_per_batch(1000, 9), 1000);
        assert_eq!(rows_per_batch(10_000, 9), 7281);
        assert!(rows_per_batch(10_000, 9) * 9 <= MAX_BIND_PARAMETERS);
        assert_eq!(rows_per_batch(100_000, 1), 65_535);
        assert_eq!(rows_per_batch(5, 0), 5);
    }

    #[test]
    fn integer_columns_widen_to_i64() {
        let df = fact_frame();
        let values = ColumnValues::from_column(df.column("originairportid").expect("column"))
            .expect("values");
        match values {
            ColumnValues::Int(values) => assert_eq!(values, vec![Some(1)]),
            _ => panic!("expected integer values"),
        }
    }
}
