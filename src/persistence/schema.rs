/// Connection pool setup and schema creation
///
/// One table per entity kind, each holding `(id, rev, data)` with JSON expression
/// indexes on the fields the named statements filter by.

use crate::config::DatabaseConfig;
use crate::persistence::EntityKind;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::{path::Path, str::FromStr};

/// Open the SQLite pool described by the database configuration
///
/// In-memory databases live as long as their connection, so they get exactly one
/// connection that never idles out.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let in_memory = config.is_in_memory();

    if !in_memory {
        if let Some(parent) = database_file(&config.url).and_then(|file| file.parent()) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| anyhow::anyhow!("Failed to create database directory '{}': {}", parent.display(), e))?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?
    };

    tracing::info!("🗄️ Connected to {}", config.url);
    Ok(pool)
}

fn database_file(url: &str) -> Option<&Path> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    Some(Path::new(path))
}

/// Create all entity tables and indexes
///
/// Safe to call multiple times (uses IF NOT EXISTS).
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for kind in EntityKind::ALL {
        let table = kind.table();
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                rev INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#
        ))
        .execute(pool)
        .await?;

        for field in kind.index_fields() {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{field} ON {table}(json_extract(data, '$.{field}'))"
            ))
            .execute(pool)
            .await?;
        }
    }

    tracing::debug!("📐 Entity schema initialized ({} tables)", EntityKind::ALL.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_database_file_from_url() {
        assert_eq!(database_file("sqlite://data/engine.db"), Some(Path::new("data/engine.db")));
        assert_eq!(database_file("sqlite:engine.db?mode=rwc"), Some(Path::new("engine.db")));
        assert_eq!(database_file("postgres://x"), None);
    }

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let pool = connect(&DatabaseConfig::in_memory()).await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, EntityKind::ALL.len() as i64);
    }
}
