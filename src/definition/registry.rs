/// Hot-reload definition registry using ArcSwap
///
/// Provides lock-free reads of compiled definitions. Every deployment swaps the whole
/// map, so commands already running keep the definition snapshot they started with.

use crate::definition::{
    storage::DefinitionStorage,
    types::{Activity, ActivityType, DeploymentRequest, ProcessDefinition},
};
use crate::error::{EngineError, EngineResult};
use crate::runtime::calendar::TimerDeclaration;
use arc_swap::ArcSwap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::{collections::HashMap, sync::Arc};

/// Lock-free process definition registry
#[derive(Debug)]
pub struct DefinitionRegistry {
    /// Key: definition id
    definitions: ArcSwap<HashMap<String, Arc<CompiledDefinition>>>,
    storage: DefinitionStorage,
}

/// Definition with the graph needed to navigate it at runtime
#[derive(Debug)]
pub struct CompiledDefinition {
    pub definition: ProcessDefinition,
    pub start_activity_id: String,
    graph: DiGraph<String, ()>,
    index_by_activity: HashMap<String, NodeIndex>,
}

impl CompiledDefinition {
    /// Validate a definition and build its graph
    ///
    /// Checks:
    /// - exactly one start event
    /// - flows reference known activities
    /// - the graph is acyclic
    /// - mandatory params of each activity type are present
    pub fn compile(definition: ProcessDefinition) -> EngineResult<Self> {
        let mut graph = DiGraph::new();
        let mut index_by_activity = HashMap::new();

        for activity in &definition.activities {
            if index_by_activity.contains_key(&activity.id) {
                return Err(EngineError::IllegalArgument(format!(
                    "duplicate activity id '{}' in definition '{}'",
                    activity.id, definition.key
                )));
            }
            validate_activity(activity)?;
            let index = graph.add_node(activity.id.clone());
            index_by_activity.insert(activity.id.clone(), index);
        }

        for flow in &definition.flows {
            let from = index_by_activity.get(&flow.from).ok_or_else(|| {
                EngineError::IllegalArgument(format!("flow references unknown activity '{}'", flow.from))
            })?;
            let to = index_by_activity.get(&flow.to).ok_or_else(|| {
                EngineError::IllegalArgument(format!("flow references unknown activity '{}'", flow.to))
            })?;
            graph.add_edge(*from, *to, ());
        }

        let starts: Vec<&Activity> = definition
            .activities
            .iter()
            .filter(|a| a.activity_type == ActivityType::StartEvent)
            .collect();
        let start_activity_id = match starts.as_slice() {
            [start] => start.id.clone(),
            _ => {
                return Err(EngineError::IllegalArgument(format!(
                    "definition '{}' must have exactly one start event, found {}",
                    definition.key,
                    starts.len()
                )))
            }
        };

        if toposort(&graph, None).is_err() {
            return Err(EngineError::IllegalArgument(format!(
                "definition '{}' contains cycles - sequence flows must form a DAG",
                definition.key
            )));
        }

        let start_index = index_by_activity[&start_activity_id];
        let mut reachable = 0;
        let mut dfs = Dfs::new(&graph, start_index);
        while dfs.next(&graph).is_some() {
            reachable += 1;
        }
        if reachable < definition.activities.len() {
            tracing::warn!(
                "⚠️ Definition '{}' has {} activities unreachable from the start event",
                definition.key,
                definition.activities.len() - reachable
            );
        }

        Ok(Self {
            definition,
            start_activity_id,
            graph,
            index_by_activity,
        })
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn activity(&self, activity_id: &str) -> Option<&Activity> {
        self.definition.activities.iter().find(|a| a.id == activity_id)
    }

    /// Targets of the outgoing sequence flows of an activity, in declaration order
    pub fn outgoing(&self, activity_id: &str) -> Vec<&Activity> {
        let Some(index) = self.index_by_activity.get(activity_id) else {
            return Vec::new();
        };
        let mut targets: Vec<&Activity> = self
            .graph
            .neighbors(*index)
            .filter_map(|target| self.activity(&self.graph[target]))
            .collect();
        // petgraph yields the most recently added edge first
        targets.reverse();
        targets
    }
}

fn validate_activity(activity: &Activity) -> EngineResult<()> {
    let missing = |param: &str| {
        EngineError::IllegalArgument(format!(
            "{} '{}' requires param '{}'",
            activity.activity_type.as_str(),
            activity.id,
            param
        ))
    };

    match activity.activity_type {
        ActivityType::TimerCatch => {
            TimerDeclaration::from_activity(activity)?;
        }
        ActivityType::MessageCatch if activity.param_str("message").is_none() => return Err(missing("message")),
        ActivityType::SignalCatch if activity.param_str("signal").is_none() => return Err(missing("signal")),
        ActivityType::CallActivity if activity.param_str("called_element").is_none() => {
            return Err(missing("called_element"))
        }
        _ => {}
    }
    Ok(())
}

impl DefinitionRegistry {
    pub fn new(storage: DefinitionStorage) -> Self {
        Self {
            definitions: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    pub fn storage(&self) -> &DefinitionStorage {
        &self.storage
    }

    /// Initialize registry by loading all definitions from storage
    pub async fn init_from_storage(&self) -> anyhow::Result<()> {
        let stored = self.storage.load_all_definitions().await?;
        let mut compiled = HashMap::new();
        for (id, definition) in stored {
            compiled.insert(id, Arc::new(CompiledDefinition::compile(definition)?));
        }

        self.definitions.store(Arc::new(compiled));
        tracing::info!("Initialized definition registry with {} definitions", self.definitions.load().len());
        Ok(())
    }

    /// Deploy a new version of a definition
    ///
    /// Compiles before storing, so invalid definitions never reach the database.
    pub async fn deploy(&self, request: DeploymentRequest) -> EngineResult<Arc<CompiledDefinition>> {
        if request.key.is_empty() {
            return Err(EngineError::IllegalArgument("definition key must not be empty".to_string()));
        }

        let version = self.storage.latest_version(&request.key).await? + 1;
        let definition = ProcessDefinition {
            id: format!("{}:{}:{}", request.key, version, crate::persistence::new_id()),
            key: request.key,
            version,
            name: request.name,
            activities: request.activities,
            flows: request.flows,
            tenant_id: request.tenant_id,
        };

        let compiled = Arc::new(CompiledDefinition::compile(definition)?);
        self.storage.save_definition(&compiled.definition).await?;

        self.definitions.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(compiled.id().to_string(), Arc::clone(&compiled));
            next
        });

        tracing::info!("🚀 Deployed definition {} (version {})", compiled.definition.key, version);
        Ok(compiled)
    }

    /// Get a definition by ID (lock-free read)
    pub fn get(&self, id: &str) -> Option<Arc<CompiledDefinition>> {
        self.definitions.load().get(id).cloned()
    }

    pub fn get_required(&self, id: &str) -> EngineResult<Arc<CompiledDefinition>> {
        self.get(id).ok_or_else(|| EngineError::DefinitionNotFound(id.to_string()))
    }

    /// Latest deployed version of a key
    pub fn latest(&self, key: &str) -> Option<Arc<CompiledDefinition>> {
        self.definitions
            .load()
            .values()
            .filter(|compiled| compiled.definition.key == key)
            .max_by_key(|compiled| compiled.definition.version)
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<CompiledDefinition>> {
        let mut all: Vec<_> = self.definitions.load().values().cloned().collect();
        all.sort_by(|a, b| {
            a.definition
                .key
                .cmp(&b.definition.key)
                .then(b.definition.version.cmp(&a.definition.version))
        });
        all
    }

    /// Remove a definition from registry and storage
    pub async fn remove(&self, id: &str) -> EngineResult<bool> {
        let removed = self.storage.delete_definition(id).await?;
        self.definitions.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(id);
            next
        });
        if removed {
            tracing::info!("Removed definition from registry: {}", id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::types::SequenceFlow;
    use serde_json::json;

    fn activity(id: &str, activity_type: ActivityType, params: serde_json::Value) -> Activity {
        Activity { id: id.to_string(), name: None, activity_type, params }
    }

    fn definition(activities: Vec<Activity>, flows: &[(&str, &str)]) -> ProcessDefinition {
        ProcessDefinition {
            id: "p:1:x".to_string(),
            key: "p".to_string(),
            version: 1,
            name: "P".to_string(),
            activities,
            flows: flows
                .iter()
                .map(|(from, to)| SequenceFlow { from: from.to_string(), to: to.to_string() })
                .collect(),
            tenant_id: None,
        }
    }

    #[test]
    fn compiles_and_navigates_in_declaration_order() {
        let compiled = CompiledDefinition::compile(definition(
            vec![
                activity("start", ActivityType::StartEvent, json!({})),
                activity("a", ActivityType::UserTask, json!({})),
                activity("b", ActivityType::UserTask, json!({})),
                activity("end", ActivityType::EndEvent, json!({})),
            ],
            &[("start", "a"), ("start", "b"), ("a", "end"), ("b", "end")],
        ))
        .unwrap();

        assert_eq!(compiled.start_activity_id, "start");
        let targets: Vec<&str> = compiled.outgoing("start").iter().map(|a| a.id.as_str()).collect();
        assert_eq!(targets, vec!["a", "b"]);
        assert!(compiled.outgoing("end").is_empty());
    }

    #[test]
    fn rejects_invalid_definitions() {
        let no_start = definition(vec![activity("end", ActivityType::EndEvent, json!({}))], &[]);
        assert!(CompiledDefinition::compile(no_start).is_err());

        let cycle = definition(
            vec![
                activity("start", ActivityType::StartEvent, json!({})),
                activity("a", ActivityType::ServiceTask, json!({})),
                activity("b", ActivityType::ServiceTask, json!({})),
            ],
            &[("start", "a"), ("a", "b"), ("b", "a")],
        );
        assert!(CompiledDefinition::compile(cycle).is_err());

        let dangling = definition(vec![activity("start", ActivityType::StartEvent, json!({}))], &[("start", "nowhere")]);
        assert!(CompiledDefinition::compile(dangling).is_err());

        let bad_timer = definition(
            vec![
                activity("start", ActivityType::StartEvent, json!({})),
                activity("wait", ActivityType::TimerCatch, json!({ "duration": "soon" })),
            ],
            &[("start", "wait")],
        );
        assert!(CompiledDefinition::compile(bad_timer).is_err());

        let no_message = definition(
            vec![
                activity("start", ActivityType::StartEvent, json!({})),
                activity("wait", ActivityType::MessageCatch, json!({})),
            ],
            &[("start", "wait")],
        );
        assert!(CompiledDefinition::compile(no_message).is_err());
    }
}
