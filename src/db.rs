use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::config::DbSettings;

/// Every connection gets a server-side `statement_timeout`, so a stuck query
/// surfaces as an error instead of holding the request open.
pub async fn connect_pg(database_url: &str, settings: &DbSettings) -> anyhow::Result<PgPool> {
    let options = PgConnectOptions::from_str(database_url)?.options([(
        "statement_timeout",
        settings.statement_timeout_ms.to_string(),
    )]);

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(options)
        .await?;

    Ok(pool)
}
