use polars::prelude::*;
use thiserror::Error;

/// Columns of the flight fact table, in output order.
pub const OUTPUT_COLUMNS: [&str; 9] = [
    "carrier",
    "originairportid",
    "destairportid",
    "origincity",
    "originstate",
    "destcity",
    "deststate",
    "depdelay",
    "arrdelay",
];

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("enriched dataset is missing output columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

/// Keeps exactly [`OUTPUT_COLUMNS`], in order. Rows are neither dropped nor deduplicated.
pub fn project_output(enriched: &DataFrame) -> Result<DataFrame, ProjectionError> {
    let present = enriched.get_column_names();
    let missing: Vec<String> = OUTPUT_COLUMNS
        .iter()
        .filter(|column| !present.iter().any(|name| name.as_str() == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ProjectionError::MissingColumns(missing));
    }

    Ok(enriched.select(OUTPUT_COLUMNS)?)
}
