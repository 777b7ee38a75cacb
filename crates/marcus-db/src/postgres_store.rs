use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Row};
use tracing::info;

use crate::config::DbConfig;
use crate::error::{PersistenceError, Result};
use crate::kv::{KvEntry, KvStore};

/// `KvStore` backed by a single `kv_store` table in Postgres, keyed on
/// `(collection, key)`. This is the "embedded relational store" backend.
pub struct PostgresKvStore {
    pool: PgPool,
}

impl PostgresKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run migrations in one step.
    pub async fn connect(config: &DbConfig, migrations_dir: &Path) -> Result<Self> {
        let pool = create_pool(config).await?;
        run_migrations(&pool, migrations_dir).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Create a connection pool with sensible defaults.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .map_err(|err| PersistenceError::Backend(format!("failed to connect: {err}")))
}

/// Run all pending migrations from the given directory against the pool.
pub async fn run_migrations(pool: &PgPool, migrations_dir: &Path) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .map_err(|err| PersistenceError::Backend(format!("failed to load migrations: {err}")))?;

    migrator
        .run(pool)
        .await
        .map_err(|err| PersistenceError::Backend(format!("failed to run migrations: {err}")))?;

    info!("kv_store migrations applied");
    Ok(())
}

/// Ensure the target database exists, creating it if necessary.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config
        .database_name()
        .ok_or_else(|| PersistenceError::Backend("could not determine database name".into()))?;

    let maintenance_url = config.maintenance_url();
    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&maintenance_url)
        .await
        .map_err(|err| PersistenceError::Backend(format!("failed to connect to maintenance db: {err}")))?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&maint_pool)
            .await
            .map_err(|err| PersistenceError::Backend(format!("failed to query pg_database: {err}")))?;

    if exists {
        info!(db = db_name, "database already exists");
    } else {
        if !db_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(PersistenceError::Backend(format!(
                "database name {db_name:?} contains invalid characters"
            )));
        }
        let stmt = format!("CREATE DATABASE {db_name}");
        maint_pool
            .execute(stmt.as_str())
            .await
            .map_err(|err| PersistenceError::Backend(format!("failed to create database: {err}")))?;
        info!(db = db_name, "database created");
    }

    maint_pool.close().await;
    Ok(())
}

/// Default path to the migrations directory shipped with `marcus-db`.
pub fn default_migrations_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"))
}

#[async_trait::async_trait]
impl KvStore for PostgresKvStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE collection = $1 AND key = $2")
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| PersistenceError::Backend(err.to_string()))?;

        Ok(row.map(|r| r.get::<Value, _>("value")))
    }

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_store (collection, key, value, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (collection, key) \
             DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(collection)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|err| PersistenceError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE collection = $1 AND key = $2")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|err| PersistenceError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<KvEntry>> {
        let rows = sqlx::query("SELECT collection, key, value FROM kv_store WHERE collection = $1")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| PersistenceError::Backend(err.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| KvEntry {
                collection: r.get("collection"),
                key: r.get("key"),
                value: r.get::<Value, _>("value"),
            })
            .collect())
    }
}
