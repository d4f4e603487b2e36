// crates/airline-etl-core/src/enrichment.rs

use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub const AIRPORT_KEY: &str = "airport_id";
pub const ORIGIN_KEY: &str = "originairportid";
pub const DEST_KEY: &str = "destairportid";

const AIRPORT_LOOKUP_COLUMNS: [&str; 3] = [AIRPORT_KEY, "city", "state"];
const FLIGHT_ROW_INDEX: &str = "__flight_row";
const AIRPORT_ROW_INDEX: &str = "__airport_row";
const ORIGIN_ROW_INDEX: &str = "__origin_airport_row";
const DEST_ROW_INDEX: &str = "__dest_airport_row";

// Keys are compared on these scratch columns so the caller's key keeps its dtype.
const LEFT_JOIN_KEY: &str = "__left_join_key";
const RIGHT_JOIN_KEY: &str = "__right_join_key";

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("{frame} dataset is missing required column '{column}'")]
    MissingColumn { frame: &'static str, column: String },
    #[error("column '{0}' would be overwritten by the join")]
    ColumnCollision(String),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    pub flights_in: usize,
    pub after_origin_join: usize,
    pub after_destination_join: usize,
}

#[derive(Debug)]
pub struct EnrichedFlights {
    pub dataframe: DataFrame,
    pub stats: EnrichmentStats,
}

/// Inner equi-join of `left` and `right` on `left_key == right_key`.
///
/// Produces one row per matching pair; left rows without a match are dropped and
/// null keys never match. Numeric keys compare by value whatever their width;
/// the left key keeps its original dtype and the right key is dropped. Any other
/// right column whose name already exists on the left is rejected instead of
/// being suffixed.
pub fn equi_join(
    left: &DataFrame,
    right: &DataFrame,
    left_key: &str,
    right_key: &str,
) -> Result<DataFrame, EnrichmentError> {
    require_columns("left", left, &[left_key])?;
    require_columns("right", right, &[right_key])?;

    for name in right.get_column_names() {
        if name.as_str() != right_key && has_column(left, name.as_str()) {
            return Err(EnrichmentError::ColumnCollision(name.to_string()));
        }
    }

    let key_dtype = join_key_dtype(
        left.column(left_key)?.dtype(),
        right.column(right_key)?.dtype(),
    );

    let mut left_keyed = left.clone();
    left_keyed.with_column(
        left.column(left_key)?
            .cast(&key_dtype)?
            .with_name(LEFT_JOIN_KEY.into()),
    )?;
    let mut right_keyed = right.drop(right_key)?;
    right_keyed.with_column(
        right
            .column(right_key)?
            .cast(&key_dtype)?
            .with_name(RIGHT_JOIN_KEY.into()),
    )?;

    let joined = left_keyed
        .lazy()
        .join(
            right_keyed.lazy(),
            [col(LEFT_JOIN_KEY)],
            [col(RIGHT_JOIN_KEY)],
            JoinArgs::new(JoinType::Inner).with_coalesce(JoinCoalesce::CoalesceColumns),
        )
        .collect()?
        .drop(LEFT_JOIN_KEY)?;

    Ok(joined)
}

/// Renames columns in order. Each source column must exist and each target must be free.
pub fn rename_fields(
    mut df: DataFrame,
    renames: &[(&str, &str)],
) -> Result<DataFrame, EnrichmentError> {
    for (from, to) in renames {
        require_columns("joined", &df, &[*from])?;
        if has_column(&df, to) {
            return Err(EnrichmentError::ColumnCollision(to.to_string()));
        }
        df.rename(from, (*to).into())?;
        // polars 0.48 `rename` leaves a stale cached schema (fixed upstream in 0.50).
        df.clear_schema();
    }
    Ok(df)
}

/// Adds origin and destination city/state to every flight whose airports both resolve.
pub fn enrich_flights(
    flights: &DataFrame,
    airports: &DataFrame,
) -> Result<EnrichedFlights, EnrichmentError> {
    require_columns("flights", flights, &[ORIGIN_KEY, DEST_KEY])?;
    require_columns("airports", airports, &AIRPORT_LOOKUP_COLUMNS)?;

    let lookup = airports
        .select(AIRPORT_LOOKUP_COLUMNS)?
        .lazy()
        .with_row_index(AIRPORT_ROW_INDEX, None)
        .collect()?;
    warn_on_duplicate_keys(&lookup)?;

    let indexed = flights
        .clone()
        .lazy()
        .with_row_index(FLIGHT_ROW_INDEX, None)
        .collect()?;

    let with_origin = rename_fields(
        equi_join(&indexed, &lookup, ORIGIN_KEY, AIRPORT_KEY)?,
        &[
            ("city", "origincity"),
            ("state", "originstate"),
            (AIRPORT_ROW_INDEX, ORIGIN_ROW_INDEX),
        ],
    )?;
    let after_origin_join = with_origin.height();
    info!(rows = after_origin_join, "Joined origin airports");

    let with_destination = rename_fields(
        equi_join(&with_origin, &lookup, DEST_KEY, AIRPORT_KEY)?,
        &[
            ("city", "destcity"),
            ("state", "deststate"),
            (AIRPORT_ROW_INDEX, DEST_ROW_INDEX),
        ],
    )?;
    let after_destination_join = with_destination.height();
    info!(rows = after_destination_join, "Joined destination airports");

    // Flight order first, then reference order for rows fanned out by duplicate ids.
    let dataframe = with_destination
        .lazy()
        .sort(
            [FLIGHT_ROW_INDEX, ORIGIN_ROW_INDEX, DEST_ROW_INDEX],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()?
        .drop_many([FLIGHT_ROW_INDEX, ORIGIN_ROW_INDEX, DEST_ROW_INDEX]);

    Ok(EnrichedFlights {
        dataframe,
        stats: EnrichmentStats {
            flights_in: flights.height(),
            after_origin_join,
            after_destination_join,
        },
    })
}

fn join_key_dtype(left: &DataType, right: &DataType) -> DataType {
    if left.is_integer() && right.is_integer() {
        DataType::Int64
    } else if is_numeric(left) && is_numeric(right) {
        DataType::Float64
    } else if left == right {
        left.clone()
    } else {
        DataType::String
    }
}

fn is_numeric(dtype: &DataType) -> bool {
    dtype.is_integer() || dtype.is_float()
}

fn warn_on_duplicate_keys(lookup: &DataFrame) -> Result<(), EnrichmentError> {
    let distinct = lookup
        .column(AIRPORT_KEY)?
        .as_materialized_series()
        .n_unique()?;
    if distinct < lookup.height() {
        warn!(
            duplicates = lookup.height() - distinct,
            "airport reference data has duplicate or null airport_id values"
        );
    }
    Ok(())
}

fn require_columns(
    frame: &'static str,
    df: &DataFrame,
    columns: &[&str],
) -> Result<(), EnrichmentError> {
    match columns.iter().find(|column| !has_column(df, column)) {
        Some(missing) => Err(EnrichmentError::MissingColumn {
            frame,
            column: missing.to_string(),
        }),
        None => Ok(()),
    }
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names()
        .iter()
        .any(|column| column.as_str() == name)
}
