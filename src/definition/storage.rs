/// SQLite persistence for process definitions
///
/// Definitions are stored as JSON for flexibility, with indexed key/version columns for
/// the "latest version of key" lookup.

use crate::definition::types::ProcessDefinition;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

/// SQLite-based definition storage
#[derive(Debug, Clone)]
pub struct DefinitionStorage {
    pool: SqlitePool,
}

impl DefinitionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the definition storage schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS re_procdef (
                id TEXT PRIMARY KEY,
                key TEXT NOT NULL,
                version INTEGER NOT NULL,
                name TEXT NOT NULL,
                definition TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (key, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_re_procdef_key ON re_procdef(key)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Store a new definition version
    ///
    /// The (key, version) uniqueness constraint rejects concurrent deployments that
    /// raced for the same version.
    pub async fn save_definition(&self, definition: &ProcessDefinition) -> Result<()> {
        let definition_json = serde_json::to_string(definition)?;

        sqlx::query(
            r#"
            INSERT INTO re_procdef (id, key, version, name, definition)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.key)
        .bind(definition.version)
        .bind(&definition.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a definition by ID
    pub async fn get_definition(&self, id: &str) -> Result<Option<ProcessDefinition>> {
        let row = sqlx::query("SELECT definition FROM re_procdef WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    /// Highest deployed version of a key (0 when never deployed)
    pub async fn latest_version(&self, key: &str) -> Result<i32> {
        let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM re_procdef WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(version.unwrap_or(0))
    }

    /// List all definitions with basic metadata
    pub async fn list_definitions(&self) -> Result<Vec<DefinitionMetadata>> {
        let rows = sqlx::query("SELECT id, key, version, name, created_at FROM re_procdef ORDER BY key, version DESC")
            .fetch_all(&self.pool)
            .await?;

        let mut definitions = Vec::new();
        for row in rows {
            definitions.push(DefinitionMetadata {
                id: row.get("id"),
                key: row.get("key"),
                version: row.get("version"),
                name: row.get("name"),
                created_at: row.get("created_at"),
            });
        }

        Ok(definitions)
    }

    /// Load all definitions for registry initialization
    pub async fn load_all_definitions(&self) -> Result<HashMap<String, ProcessDefinition>> {
        let rows = sqlx::query("SELECT id, definition FROM re_procdef")
            .fetch_all(&self.pool)
            .await?;

        let mut definitions = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            definitions.insert(id, serde_json::from_str(&definition_json)?);
        }

        Ok(definitions)
    }

    /// Delete a definition by ID
    pub async fn delete_definition(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM re_procdef WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Basic definition metadata for listing operations
#[derive(Debug, serde::Serialize)]
pub struct DefinitionMetadata {
    pub id: String,
    pub key: String,
    pub version: i32,
    pub name: String,
    pub created_at: String,
}
