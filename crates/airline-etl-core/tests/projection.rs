use airline_etl_core::projection::{project_output, ProjectionError, OUTPUT_COLUMNS};
use polars::prelude::*;

fn enriched() -> DataFrame {
    df![
        "flightdate" => &["2024-01-01", "2024-01-01", "2024-01-01"],
        "arrdelay" => &[10i64, 0, 10],
        "carrier" => &["AA", "DL", "AA"],
        "destcity" => &["Boise", "Seattle", "Boise"],
        "deststate" => &["ID", "WA", "ID"],
        "originairportid" => &[1i64, 2, 1],
        "destairportid" => &[2i64, 1, 2],
        "origincity" => &["Seattle", "Boise", "Seattle"],
        "originstate" => &["WA", "ID", "WA"],
        "tailnum" => &["N1", "N2", "N1"],
        "depdelay" => &[5i64, -3, 5],
    ]
    .expect("enriched")
}

#[test]
fn projection_keeps_exactly_the_fact_columns_in_order() {
    let projected = project_output(&enriched()).expect("project");

    let names: Vec<String> = projected
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    assert_eq!(names, OUTPUT_COLUMNS.to_vec());
}

#[test]
fn projection_neither_drops_nor_deduplicates_rows() {
    let projected = project_output(&enriched()).expect("project");
    assert_eq!(projected.height(), 3);
}

#[test]
fn projection_reports_every_missing_column() {
    let partial = df![
        "carrier" => &["AA"],
        "originairportid" => &[1i64],
        "destairportid" => &[2i64],
        "depdelay" => &[5i64],
        "arrdelay" => &[10i64],
    ]
    .expect("partial");

    let err = project_output(&partial).expect_err("missing columns");
    match err {
        ProjectionError::MissingColumns(columns) => assert_eq!(
            columns,
            vec!["origincity", "originstate", "destcity", "deststate"]
        ),
        other => panic!("unexpected error: {other}"),
    }
}
