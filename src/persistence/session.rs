/// Unit-of-work session over SQLite
///
/// `DbSqlSession` caches every entity a command touches, keyed by kind and id. Reads
/// consult the cache before the database; writes only touch the cache until `flush`
/// pushes all of them in one transaction with optimistic revision checks.

use crate::error::{EngineError, EngineResult};
use crate::persistence::{Entity, EntityKind, Statement};
use serde_json::Value;
use sqlx::{
    query::Query,
    sqlite::{Sqlite, SqliteArguments, SqlitePool},
    Row,
};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    /// Created in this session, not yet in the database
    Inserted,
    /// Loaded from the database (possibly modified)
    Persistent,
    /// Persisted entity scheduled for deletion
    Deleted,
}

#[derive(Debug, Clone)]
struct CachedEntity {
    data: Value,
    /// Document as loaded; `None` for inserted entities
    snapshot: Option<Value>,
    /// Revision currently stored in the database
    revision: i64,
    state: EntryState,
    /// Position in insertion/deletion order
    order: u64,
}

/// Counts of statements executed by a flush
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl FlushSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Transactional entity cache for a single command
#[derive(Debug)]
pub struct DbSqlSession {
    pool: SqlitePool,
    cache: HashMap<EntityKind, HashMap<String, CachedEntity>>,
    sequence: u64,
}

impl DbSqlSession {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: HashMap::new(),
            sequence: 0,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn next_order(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Register a new entity; it becomes visible to selects in this session immediately
    ///
    /// The id must be unknown to the session: ids that are live or were deleted in
    /// this session are rejected.
    pub fn insert<T: Entity>(&mut self, entity: &T) -> EngineResult<()> {
        let data = serde_json::to_value(entity)?;
        let order = self.next_order();
        let entries = self.cache.entry(T::KIND).or_default();

        if let Some(entry) = entries.get(entity.id()) {
            let status = if entry.state == EntryState::Deleted {
                "was deleted in this session"
            } else {
                "is already part of this session"
            };
            return Err(EngineError::IllegalState(format!("{} '{}' {}", T::KIND, entity.id(), status)));
        }

        tracing::debug!("➕ insert {} '{}'", T::KIND, entity.id());
        entries.insert(
            entity.id().to_string(),
            CachedEntity {
                data,
                snapshot: None,
                revision: entity.revision(),
                state: EntryState::Inserted,
                order,
            },
        );
        Ok(())
    }

    /// Replace the cached state of an entity loaded or inserted in this session
    pub fn update<T: Entity>(&mut self, entity: &T) -> EngineResult<()> {
        let mut data = serde_json::to_value(entity)?;
        let entry = self
            .cache
            .get_mut(&T::KIND)
            .and_then(|entries| entries.get_mut(entity.id()))
            .ok_or_else(|| {
                EngineError::IllegalState(format!(
                    "{} '{}' must be loaded in this session before it is updated",
                    T::KIND,
                    entity.id()
                ))
            })?;

        if entry.state == EntryState::Deleted {
            return Err(EngineError::IllegalState(format!(
                "{} '{}' was deleted in this session",
                T::KIND,
                entity.id()
            )));
        }

        if let Some(obj) = data.as_object_mut() {
            obj.insert("revision".to_string(), Value::from(entry.revision));
        }
        entry.data = data;
        Ok(())
    }

    /// Schedule an entity for deletion
    ///
    /// Entities inserted in this session are forgotten without touching the database.
    pub fn delete<T: Entity>(&mut self, entity: &T) -> EngineResult<()> {
        let order = self.next_order();
        let entries = self.cache.entry(T::KIND).or_default();

        match entries.get(entity.id()).map(|entry| entry.state) {
            Some(EntryState::Inserted) => {
                entries.remove(entity.id());
            }
            Some(EntryState::Persistent) => {
                if let Some(entry) = entries.get_mut(entity.id()) {
                    entry.state = EntryState::Deleted;
                    entry.order = order;
                }
            }
            Some(EntryState::Deleted) => {}
            None => {
                let data = serde_json::to_value(entity)?;
                entries.insert(
                    entity.id().to_string(),
                    CachedEntity {
                        snapshot: Some(data.clone()),
                        data,
                        revision: entity.revision(),
                        state: EntryState::Deleted,
                        order,
                    },
                );
            }
        }
        tracing::debug!("➖ delete {} '{}'", T::KIND, entity.id());
        Ok(())
    }

    /// Whether the entity is scheduled for deletion in this session
    pub fn is_deleted(&self, kind: EntityKind, id: &str) -> bool {
        self.cache
            .get(&kind)
            .and_then(|entries| entries.get(id))
            .is_some_and(|entry| entry.state == EntryState::Deleted)
    }

    /// Load one entity by id, cache first
    pub async fn select_by_id<T: Entity>(&mut self, id: &str) -> EngineResult<Option<T>> {
        if let Some(entry) = self.cache.get(&T::KIND).and_then(|entries| entries.get(id)) {
            if entry.state == EntryState::Deleted {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_value(entry.data.clone())?));
        }

        let sql = format!("SELECT id, rev, data FROM {} WHERE id = ?", T::KIND.table());
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => {
                let rev: i64 = row.get("rev");
                let data: String = row.get("data");
                let data: Value = serde_json::from_str(&data)?;
                let entry = self.cache_loaded(T::KIND, id.to_string(), rev, data);
                Ok(Some(serde_json::from_value(entry.data.clone())?))
            }
            None => Ok(None),
        }
    }

    /// Run a named select, overlaying the session cache on the database result
    pub async fn select_list<T: Entity>(
        &mut self,
        statement: &Statement,
        params: &[Value],
    ) -> EngineResult<Vec<T>> {
        if statement.kind != T::KIND {
            return Err(EngineError::IllegalArgument(format!(
                "statement '{}' selects {} but {} was requested",
                statement.name,
                statement.kind,
                T::KIND
            )));
        }
        statement.check_params(params)?;

        let sql = statement.sql();
        tracing::debug!("🔍 {} {:?}", statement.name, params);
        let mut query = sqlx::query(&sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut seen = HashSet::new();
        let mut results: Vec<(Value, u64)> = Vec::new();
        for row in rows {
            let id: String = row.get("id");
            let rev: i64 = row.get("rev");
            let data: String = row.get("data");
            let data: Value = serde_json::from_str(&data)?;

            let entry = self.cache_loaded(T::KIND, id.clone(), rev, data);
            if entry.state != EntryState::Deleted && statement.matches(&entry.data, params) {
                results.push((entry.data.clone(), entry.order));
            }
            seen.insert(id);
        }

        // Entities created or changed in this command that the database cannot see yet
        if let Some(entries) = self.cache.get(&T::KIND) {
            let mut overlay: Vec<(Value, u64)> = entries
                .iter()
                .filter(|(id, entry)| {
                    entry.state != EntryState::Deleted
                        && !seen.contains(*id)
                        && statement.matches(&entry.data, params)
                })
                .map(|(_, entry)| (entry.data.clone(), entry.order))
                .collect();
            overlay.sort_by_key(|(_, order)| *order);
            results.extend(overlay);
        }

        statement.sort(&mut results);
        results
            .into_iter()
            .map(|(data, _)| serde_json::from_value(data).map_err(EngineError::from))
            .collect()
    }

    pub async fn select_one<T: Entity>(
        &mut self,
        statement: &Statement,
        params: &[Value],
    ) -> EngineResult<Option<T>> {
        Ok(self.select_list(statement, params).await?.into_iter().next())
    }

    pub async fn select_page<T: Entity>(
        &mut self,
        statement: &Statement,
        params: &[Value],
        limit: usize,
    ) -> EngineResult<Vec<T>> {
        let mut list = self.select_list(statement, params).await?;
        list.truncate(limit);
        Ok(list)
    }

    fn cache_loaded(&mut self, kind: EntityKind, id: String, rev: i64, mut data: Value) -> &CachedEntity {
        let order = self.sequence + 1;
        let entries = self.cache.entry(kind).or_default();
        let fresh = !entries.contains_key(&id);
        if let Some(obj) = data.as_object_mut() {
            obj.insert("revision".to_string(), Value::from(rev));
        }
        let entry = entries.entry(id).or_insert_with(|| CachedEntity {
            snapshot: Some(data.clone()),
            data,
            revision: rev,
            state: EntryState::Persistent,
            order,
        });
        if fresh {
            self.sequence = order;
        }
        entry
    }

    /// Push all cached changes in one transaction, consuming the session
    pub async fn flush(self) -> EngineResult<FlushSummary> {
        let mut summary = FlushSummary::default();
        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();

        for kind in EntityKind::ALL {
            let Some(entries) = self.cache.get(&kind) else { continue };

            let mut kind_inserts: Vec<(&String, &CachedEntity)> = entries
                .iter()
                .filter(|(_, e)| e.state == EntryState::Inserted)
                .collect();
            kind_inserts.sort_by_key(|(_, e)| e.order);
            inserts.extend(kind_inserts.into_iter().map(|(id, e)| (kind, id, e)));

            let mut kind_updates: Vec<(&String, &CachedEntity)> = entries
                .iter()
                .filter(|(_, e)| e.state == EntryState::Persistent && e.snapshot.as_ref() != Some(&e.data))
                .collect();
            kind_updates.sort_by_key(|(_, e)| e.order);
            updates.extend(kind_updates.into_iter().map(|(id, e)| (kind, id, e)));
        }

        for kind in EntityKind::ALL.iter().rev() {
            let Some(entries) = self.cache.get(kind) else { continue };
            let mut kind_deletes: Vec<(&String, &CachedEntity)> = entries
                .iter()
                .filter(|(_, e)| e.state == EntryState::Deleted)
                .collect();
            kind_deletes.sort_by_key(|(_, e)| e.order);
            deletes.extend(kind_deletes.into_iter().map(|(id, e)| (*kind, id, e)));
        }

        if inserts.is_empty() && updates.is_empty() && deletes.is_empty() {
            return Ok(summary);
        }

        let mut tx = self.pool.begin().await?;

        for (kind, id, entry) in inserts {
            let sql = format!("INSERT INTO {} (id, rev, data) VALUES (?, ?, ?)", kind.table());
            sqlx::query(&sql)
                .bind(id)
                .bind(entry.revision)
                .bind(serde_json::to_string(&entry.data)?)
                .execute(&mut *tx)
                .await?;
            summary.inserted += 1;
        }

        for (kind, id, entry) in updates {
            let new_revision = entry.revision + 1;
            let mut data = entry.data.clone();
            if let Some(obj) = data.as_object_mut() {
                obj.insert("revision".to_string(), Value::from(new_revision));
            }
            let sql = format!("UPDATE {} SET rev = ?, data = ? WHERE id = ? AND rev = ?", kind.table());
            let result = sqlx::query(&sql)
                .bind(new_revision)
                .bind(serde_json::to_string(&data)?)
                .bind(id)
                .bind(entry.revision)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                tracing::warn!("⚠️ Optimistic locking failure updating {} '{}'", kind, id);
                return Err(EngineError::OptimisticLocking { kind, id: id.clone() });
            }
            summary.updated += 1;
        }

        for (kind, id, entry) in deletes {
            let sql = format!("DELETE FROM {} WHERE id = ? AND rev = ?", kind.table());
            let result = sqlx::query(&sql)
                .bind(id)
                .bind(entry.revision)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                tracing::warn!("⚠️ Optimistic locking failure deleting {} '{}'", kind, id);
                return Err(EngineError::OptimisticLocking { kind, id: id.clone() });
            }
            summary.deleted += 1;
        }

        tx.commit().await?;
        tracing::debug!(
            "💾 Flushed session: {} inserted, {} updated, {} deleted",
            summary.inserted,
            summary.updated,
            summary.deleted
        );
        Ok(summary)
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}
