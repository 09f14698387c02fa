//! Validated task DAG
//!
//! Edges point from a dependency to its dependent. Nodes are the tasks'
//! positions in the plan, so iteration order stays the plan order.

use crate::error::OrchestratorError;
use crate::task::Task;
use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::{BTreeSet, VecDeque};

/// Tasks plus their dependency edges, checked to be acyclic
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: IndexMap<String, Task>,
    graph: DiGraphMap<usize, ()>,
    order: Vec<usize>,
}

impl TaskGraph {
    /// Validate `tasks` into a graph.
    ///
    /// Rejects empty plans, duplicate ids, unknown dependencies and cycles
    /// (a task depending on itself included).
    pub fn new(tasks: Vec<Task>) -> Result<Self, OrchestratorError> {
        if tasks.is_empty() {
            return Err(OrchestratorError::EmptyPlan);
        }

        let mut by_id: IndexMap<String, Task> = IndexMap::with_capacity(tasks.len());
        for task in tasks {
            if by_id.contains_key(&task.id) {
                return Err(OrchestratorError::DuplicateTask(task.id));
            }
            by_id.insert(task.id.clone(), task);
        }

        let mut graph = DiGraphMap::new();
        for index in 0..by_id.len() {
            graph.add_node(index);
        }
        for (index, task) in by_id.values().enumerate() {
            for dependency in &task.dependencies {
                let from = by_id.get_index_of(dependency).ok_or_else(|| {
                    OrchestratorError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                graph.add_edge(from, index, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let id = by_id
                .get_index(cycle.node_id())
                .map(|(id, _)| id.clone())
                .unwrap_or_default();
            OrchestratorError::CycleDetected(id)
        })?;

        Ok(Self {
            tasks: by_id,
            graph,
            order,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in plan order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    #[must_use]
    pub fn task(&self, index: usize) -> Option<&Task> {
        self.tasks.get_index(index).map(|(_, t)| t)
    }

    pub(crate) fn task_mut(&mut self, index: usize) -> Option<&mut Task> {
        self.tasks.get_index_mut(index).map(|(_, t)| t)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.tasks.get_index_of(id)
    }

    /// Ids in a dependency-respecting order
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|i| self.tasks.get_index(*i).map(|(id, _)| id.as_str()))
            .collect()
    }

    /// Tasks without dependencies, in plan order
    #[must_use]
    pub fn roots(&self) -> Vec<usize> {
        (0..self.tasks.len())
            .filter(|n| {
                self.graph
                    .neighbors_directed(*n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Number of direct dependencies of each task
    #[must_use]
    pub fn in_degrees(&self) -> Vec<usize> {
        (0..self.tasks.len())
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect()
    }

    /// Direct dependents of a task
    #[must_use]
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        out.sort_unstable();
        out
    }

    /// Everything downstream of a task
    #[must_use]
    pub fn transitive_dependents(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.dependents(index).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Consume into tasks in plan order
    #[must_use]
    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn diamond() -> Vec<Task> {
        vec![
            Task::new("t1", "memo", "a"),
            Task::new("t2", "memo", "b").depends_on(["t1"]),
            Task::new("t3", "schedule", "c").depends_on(["t1"]),
            Task::new("t4", "memo", "d").depends_on(["t2", "t3"]),
        ]
    }

    #[test]
    fn diamond_is_valid() {
        let graph = TaskGraph::new(diamond()).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.roots(), vec![0]);
        assert_eq!(graph.in_degrees(), vec![0, 1, 1, 2]);
        assert_eq!(graph.dependents(0), vec![1, 2]);
        assert_eq!(
            graph.transitive_dependents(1).into_iter().collect::<Vec<_>>(),
            vec![3]
        );

        let order = graph.topological_order();
        assert_eq!(order.first(), Some(&"t1"));
        assert_eq!(order.last(), Some(&"t4"));
    }

    #[test]
    fn rejects_cycles() {
        let tasks = vec![
            Task::new("t1", "memo", "a").depends_on(["t2"]),
            Task::new("t2", "memo", "b").depends_on(["t1"]),
        ];
        assert!(matches!(
            TaskGraph::new(tasks),
            Err(OrchestratorError::CycleDetected(_))
        ));

        let self_loop = vec![Task::new("t1", "memo", "a").depends_on(["t1"])];
        assert!(matches!(
            TaskGraph::new(self_loop),
            Err(OrchestratorError::CycleDetected(_))
        ));
    }

    #[test]
    fn rejects_unknown_dependency_and_duplicates() {
        let unknown = vec![Task::new("t1", "memo", "a").depends_on(["t9"])];
        assert_eq!(
            TaskGraph::new(unknown).unwrap_err(),
            OrchestratorError::UnknownDependency {
                task: "t1".into(),
                dependency: "t9".into()
            }
        );

        let duplicate = vec![Task::new("t1", "memo", "a"), Task::new("t1", "memo", "b")];
        assert_eq!(
            TaskGraph::new(duplicate).unwrap_err(),
            OrchestratorError::DuplicateTask("t1".into())
        );

        assert_eq!(TaskGraph::new(Vec::new()).unwrap_err(), OrchestratorError::EmptyPlan);
    }
}
