//! # Database Persistence Layer
//!
//! Optional Postgres persistence via SQLx. When `DATABASE_URL` is set, every
//! commit and every audit entry is written behind the in-memory store and
//! reloaded on startup. When absent, the service runs in memory only.
//!
//! Records are stored as JSONB documents keyed by their record key, so the
//! schema does not change when a record type gains a field.

pub mod audit;
pub mod records;
pub mod writer;

use sqlx::postgres::{PgPool, PgPoolOptions};

use entl_store::Hydration;

/// Connect and run migrations.
///
/// Returns `None` if no URL is configured (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = database_url else {
        tracing::warn!(
            "DATABASE_URL not set, running in-memory only. State will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    Ok(Some(pool))
}

/// Everything needed to rebuild the store.
pub async fn load_hydration(pool: &PgPool) -> Result<Hydration, sqlx::Error> {
    Ok(Hydration {
        records: records::load_all(pool).await?,
        sequences: records::load_sequences(pool).await?,
        audit: audit::load_all(pool).await?,
    })
}
