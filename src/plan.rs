//! Subtask dependency graph

use std::collections::{HashMap, VecDeque};

use crate::error::OrchestratorError;
use crate::types::{Subtask, SubtaskId};

/// Node in the dependency graph
#[derive(Debug, Clone)]
struct PlanNode {
    /// Position in the decomposition
    index: usize,
    depends_on: Vec<SubtaskId>,
    dependents: Vec<SubtaskId>,
}

/// Validated dependency DAG over a decomposition.
///
/// Construction rejects duplicate ids, dangling dependencies and cycles, so
/// every `ExecutionPlan` can be walked to completion in [`topological_order`].
///
/// [`topological_order`]: ExecutionPlan::topological_order
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    nodes: HashMap<SubtaskId, PlanNode>,
    order: Vec<SubtaskId>,
}

impl ExecutionPlan {
    pub fn new(subtasks: &[Subtask]) -> Result<Self, OrchestratorError> {
        let mut nodes: HashMap<SubtaskId, PlanNode> = HashMap::with_capacity(subtasks.len());

        for (index, subtask) in subtasks.iter().enumerate() {
            let mut depends_on = subtask.depends_on.clone();
            depends_on.sort();
            depends_on.dedup();

            let node = PlanNode {
                index,
                depends_on,
                dependents: Vec::new(),
            };
            if nodes.insert(subtask.id.clone(), node).is_some() {
                return Err(OrchestratorError::DuplicateSubtask(subtask.id.clone()));
            }
        }

        // Wire dependents in decomposition order
        for subtask in subtasks {
            let deps = nodes[&subtask.id].depends_on.clone();
            for dep in deps {
                let parent = nodes.get_mut(&dep).ok_or_else(|| {
                    OrchestratorError::UnknownDependency {
                        subtask: subtask.id.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                parent.dependents.push(subtask.id.clone());
            }
        }

        let order = Self::kahn(subtasks, &nodes)?;
        Ok(Self { nodes, order })
    }

    fn kahn(
        subtasks: &[Subtask],
        nodes: &HashMap<SubtaskId, PlanNode>,
    ) -> Result<Vec<SubtaskId>, OrchestratorError> {
        let mut remaining: HashMap<&SubtaskId, usize> = nodes
            .iter()
            .map(|(id, node)| (id, node.depends_on.len()))
            .collect();

        let mut queue: VecDeque<&SubtaskId> = subtasks
            .iter()
            .map(|s| &s.id)
            .filter(|id| remaining[id] == 0)
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            for dependent in &nodes[id].dependents {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != nodes.len() {
            let mut stuck: Vec<SubtaskId> = remaining
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(id, _)| id.clone())
                .collect();
            stuck.sort();
            return Err(OrchestratorError::CyclicPlan(stuck));
        }

        Ok(order)
    }

    /// Ids in an order where every subtask follows its dependencies
    pub fn topological_order(&self) -> &[SubtaskId] {
        &self.order
    }

    /// Subtasks with no dependencies, in decomposition order
    pub fn roots(&self) -> Vec<SubtaskId> {
        let mut roots: Vec<(&SubtaskId, &PlanNode)> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.depends_on.is_empty())
            .collect();
        roots.sort_by_key(|(_, node)| node.index);
        roots.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn dependencies(&self, id: &SubtaskId) -> &[SubtaskId] {
        self.nodes.get(id).map(|n| n.depends_on.as_slice()).unwrap_or(&[])
    }

    pub fn dependents(&self, id: &SubtaskId) -> &[SubtaskId] {
        self.nodes.get(id).map(|n| n.dependents.as_slice()).unwrap_or(&[])
    }

    /// Position of the subtask in the decomposition
    pub fn index_of(&self, id: &SubtaskId) -> Option<usize> {
        self.nodes.get(id).map(|n| n.index)
    }

    /// Length of the longest dependency chain above this subtask
    pub fn depth(&self, id: &SubtaskId) -> usize {
        self.dependencies(id)
            .iter()
            .map(|dep| self.depth(dep) + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
