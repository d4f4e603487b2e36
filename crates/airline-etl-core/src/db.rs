// crates/airline-etl-core/src/db.rs

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

pub type DbPool = Pool<Postgres>;

/// Opens a small pool against the warehouse. The job issues its statements one
/// after another, so a couple of connections is enough.
pub async fn connect(database_url: &str) -> Result<DbPool> {
    PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
        .with_context(|| "failed to connect to the warehouse")
}
