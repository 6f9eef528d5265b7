//! # Database Migrations
//!
//! Schema migrations live in the crate's `migrations/` directory as
//! `YYYYMMDDHHMMSS_description.sql` files and are embedded at compile time.
//!
//! ```rust,ignore
//! #[sqlx::test(migrator = "runflow_core::database::migrations::MIGRATOR")]
//! async fn test_something(pool: PgPool) { /* ... */ }
//! ```

use super::PersistenceResult;
use sqlx::PgPool;
use tracing::info;

/// Migrator over the embedded `migrations/` directory
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply all pending migrations
pub async fn run_migrations(pool: &PgPool) -> PersistenceResult<()> {
    MIGRATOR.run(pool).await?;
    info!(
        migrations = MIGRATOR.iter().count(),
        "Database migrations applied"
    );
    Ok(())
}
