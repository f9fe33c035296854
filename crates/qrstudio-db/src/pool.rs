//! Connection pools and schema setup for the row store.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/qrstudio-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

const POOL_SIZE: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

fn pool_options(max_connections: u32) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

/// Open the pool used by commands and the redirect server.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    pool_options(POOL_SIZE)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    info!(known = MIGRATOR.iter().count(), "schema is up to date");
    Ok(())
}

/// Create the configured database through the `postgres` maintenance
/// database when it does not exist yet.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config
        .database_name()
        .context("could not determine database name from URL")?;
    let db_name = plain_identifier(db_name)?;

    let maintenance_url = config.maintenance_url();
    let maintenance = pool_options(1)
        .connect(&maintenance_url)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {maintenance_url}"))?;

    let result = create_if_missing(&maintenance, db_name).await;
    maintenance.close().await;
    result
}

async fn create_if_missing(maintenance: &PgPool, db_name: &str) -> Result<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(maintenance)
            .await
            .context("failed to query pg_database")?;
    if exists {
        info!(db = db_name, "database already exists");
        return Ok(());
    }

    maintenance
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .with_context(|| format!("failed to create database {db_name}"))?;
    info!(db = db_name, "database created");
    Ok(())
}

/// `CREATE DATABASE` takes no bind parameters, so the name is spliced in
/// and must be a bare identifier.
fn plain_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let starts_well = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_well || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("database name {name:?} must be letters, digits and underscores");
    }
    Ok(name)
}

/// What the row store holds, for the `db-init` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct StoreSummary {
    pub profiles: i64,
    pub saved_codes: i64,
    pub dynamic_codes: i64,
}

pub async fn store_summary(pool: &PgPool) -> Result<StoreSummary> {
    sqlx::query_as::<_, StoreSummary>(
        "SELECT \
             (SELECT COUNT(*) FROM profiles) AS profiles, \
             (SELECT COUNT(*) FROM qrcodes) AS saved_codes, \
             (SELECT COUNT(*) FROM qrcodes WHERE qr_type = 'dynamic') AS dynamic_codes",
    )
    .fetch_one(pool)
    .await
    .context("failed to summarize the row store")
}
