/// Command context
///
/// One unit of work: a `DbSqlSession`, the shared engine services and the agenda of
/// pending operations. Managers are short-lived views borrowing the context, so they
/// all see the same session cache. Nothing reaches the database until `close`.

use crate::config::EngineConfig;
use crate::definition::DefinitionRegistry;
use crate::error::EngineResult;
use crate::event::{EngineEvent, EventDispatcher};
use crate::history::{HistoryLevel, HistoryManager};
use crate::managers::{
    EventSubscriptionManager, ExecutionManager, IdentityLinkManager, JobManager, TaskManager,
    VariableManager,
};
use crate::persistence::{DbSqlSession, FlushSummary};
use crate::runtime::agenda::Agenda;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

pub struct CommandContext {
    session: DbSqlSession,
    dispatcher: Arc<EventDispatcher>,
    config: Arc<EngineConfig>,
    definitions: Arc<DefinitionRegistry>,
    now: DateTime<Utc>,
    agenda: Agenda,
}

impl CommandContext {
    pub fn new(
        pool: SqlitePool,
        dispatcher: Arc<EventDispatcher>,
        config: Arc<EngineConfig>,
        definitions: Arc<DefinitionRegistry>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session: DbSqlSession::new(pool),
            dispatcher,
            config,
            definitions,
            now,
            agenda: Agenda::default(),
        }
    }

    pub fn session(&mut self) -> &mut DbSqlSession {
        &mut self.session
    }

    /// Time snapshot taken when the command started
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history_level(&self) -> HistoryLevel {
        self.config.history_level
    }

    pub fn definitions(&self) -> &Arc<DefinitionRegistry> {
        &self.definitions
    }

    pub fn agenda(&mut self) -> &mut Agenda {
        &mut self.agenda
    }

    /// Fire an event stamped with the command time
    pub fn dispatch(&self, event: EngineEvent) -> EngineResult<()> {
        if !self.dispatcher.is_enabled() {
            return Ok(());
        }
        self.dispatcher.dispatch(&event.at(self.now))
    }

    pub fn executions(&mut self) -> ExecutionManager<'_> {
        ExecutionManager::new(self)
    }

    pub fn tasks(&mut self) -> TaskManager<'_> {
        TaskManager::new(self)
    }

    pub fn jobs(&mut self) -> JobManager<'_> {
        JobManager::new(self)
    }

    pub fn event_subscriptions(&mut self) -> EventSubscriptionManager<'_> {
        EventSubscriptionManager::new(self)
    }

    pub fn identity_links(&mut self) -> IdentityLinkManager<'_> {
        IdentityLinkManager::new(self)
    }

    pub fn variables(&mut self) -> VariableManager<'_> {
        VariableManager::new(self)
    }

    pub fn history(&mut self) -> HistoryManager<'_> {
        HistoryManager::new(self)
    }

    /// Flush the session in one transaction
    ///
    /// Operations still on the agenda are discarded; callers run the agenda first.
    pub async fn close(self) -> EngineResult<FlushSummary> {
        if !self.agenda.is_empty() {
            tracing::warn!("⚠️ Closing command with {} pending agenda operations", self.agenda.len());
        }
        let summary = self.session.flush().await?;
        tracing::debug!(
            "💾 Command flushed: {} inserted, {} updated, {} deleted",
            summary.inserted,
            summary.updated,
            summary.deleted
        );
        Ok(summary)
    }
}
