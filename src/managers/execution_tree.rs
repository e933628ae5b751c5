/// Execution tree of one process instance
///
/// Built from the flat list of executions sharing a process instance id. The delete
/// cascade walks it leaves first so no execution is removed while children still
/// point at it.

use crate::entities::ExecutionEntity;
use crate::error::{EngineError, EngineResult};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, DfsPostOrder};
use std::{collections::HashMap, fmt};

#[derive(Debug)]
pub struct ExecutionTree {
    graph: DiGraph<ExecutionEntity, ()>,
    index_by_id: HashMap<String, NodeIndex>,
    root: NodeIndex,
}

impl ExecutionTree {
    pub fn build(executions: Vec<ExecutionEntity>) -> EngineResult<Self> {
        let mut graph = DiGraph::new();
        let mut index_by_id = HashMap::new();
        let mut root = None;

        for execution in executions {
            let is_root = execution.parent_id.is_none();
            let id = execution.id.clone();
            let index = graph.add_node(execution);
            if is_root {
                if root.is_some() {
                    return Err(EngineError::IllegalState(format!(
                        "execution tree has more than one root (second root '{id}')"
                    )));
                }
                root = Some(index);
            }
            index_by_id.insert(id, index);
        }

        let root = root.ok_or_else(|| EngineError::IllegalState("execution tree has no root".to_string()))?;

        let edges: Vec<(NodeIndex, NodeIndex)> = graph
            .node_indices()
            .filter_map(|index| {
                let parent_id = graph[index].parent_id.as_ref()?;
                Some(
                    index_by_id
                        .get(parent_id)
                        .map(|parent| (*parent, index))
                        .ok_or_else(|| {
                            EngineError::IllegalState(format!(
                                "execution '{}' references missing parent '{}'",
                                graph[index].id, parent_id
                            ))
                        }),
                )
            })
            .collect::<EngineResult<_>>()?;
        for (parent, child) in edges {
            graph.add_edge(parent, child, ());
        }

        let mut reachable = 0;
        let mut dfs = Dfs::new(&graph, root);
        while dfs.next(&graph).is_some() {
            reachable += 1;
        }
        if reachable != graph.node_count() {
            return Err(EngineError::IllegalState(format!(
                "{} executions are not connected to process instance '{}'",
                graph.node_count() - reachable,
                graph[root].id
            )));
        }

        Ok(Self { graph, index_by_id, root })
    }

    pub fn root(&self) -> &ExecutionEntity {
        &self.graph[self.root]
    }

    pub fn node(&self, id: &str) -> Option<&ExecutionEntity> {
        self.index_by_id.get(id).map(|index| &self.graph[*index])
    }

    pub fn children(&self, id: &str) -> Vec<&ExecutionEntity> {
        let Some(index) = self.index_by_id.get(id) else {
            return Vec::new();
        };
        let mut children: Vec<&ExecutionEntity> =
            self.graph.neighbors(*index).map(|child| &self.graph[child]).collect();
        children.reverse();
        children
    }

    /// Every execution, children before their parents, root last
    pub fn leafs_first(&self) -> Vec<&ExecutionEntity> {
        let mut order = Vec::with_capacity(self.graph.node_count());
        let mut dfs = DfsPostOrder::new(&self.graph, self.root);
        while let Some(index) = dfs.next(&self.graph) {
            order.push(&self.graph[index]);
        }
        order
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl fmt::Display for ExecutionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(self.root(), 0usize)];
        while let Some((execution, depth)) = stack.pop() {
            let marker = if depth == 0 { "" } else { "└─ " };
            write!(f, "{}{}{}", "   ".repeat(depth.saturating_sub(1)), marker, execution.id)?;
            if let Some(activity_id) = &execution.activity_id {
                write!(f, " @ {}", activity_id)?;
            }
            if execution.is_concurrent {
                f.write_str(" (concurrent)")?;
            }
            if !execution.is_active {
                f.write_str(" (inactive)")?;
            }
            writeln!(f)?;

            for child in self.children(&execution.id).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        Ok(())
    }
}
