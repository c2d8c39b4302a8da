pub mod memory;
pub mod models;
pub mod postgres;
pub mod repositories;
pub mod store;
mod error;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::{DatabaseConfig, StorageBackend};

pub use error::DatabaseError;
pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;
pub use store::Store;

/// Build the configured store. The PostgreSQL backend connects and runs
/// pending migrations before it is handed out.
pub async fn init_store(backend: StorageBackend, database: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    match backend {
        StorageBackend::Memory => {
            info!("Using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let url = database
                .url
                .as_deref()
                .context("DATABASE_URL must be set for the postgres backend")?;

            let pool = PgPoolOptions::new()
                .max_connections(database.max_connections)
                .min_connections(database.min_connections)
                .connect(url)
                .await
                .context("Failed to connect to database")?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(DatabaseError::from)
                .context("Failed to run database migrations")?;

            info!("Connected to PostgreSQL and applied migrations");
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}
