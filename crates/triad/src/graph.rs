//! # Dependency Graph
//!
//! Orders the modules of one role so that every module comes after the
//! modules it depends on.
//!
//! Kahn's algorithm over dense node indices: nodes with no unmet dependency
//! are queued in registration order, so the result is deterministic for a
//! fixed input order. Whatever is left with a non-zero in-degree when the
//! queue empties is part of (or downstream of) a cycle.

use std::collections::{HashMap, VecDeque};

use crate::error::KernelError;
use crate::module::ModuleId;

/// Dependency edges between the modules of one role.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<ModuleId>,
    names: Vec<&'static str>,
    dependencies: Vec<Vec<ModuleId>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node with its dependencies. Returns the node index.
    pub fn add(&mut self, id: ModuleId, name: &'static str, dependencies: Vec<ModuleId>) -> usize {
        self.nodes.push(id);
        self.names.push(name);
        self.dependencies.push(dependencies);
        self.nodes.len() - 1
    }

    /// Returns whether `id` is a node.
    #[must_use]
    pub fn contains(&self, id: ModuleId) -> bool {
        self.nodes.contains(&id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sorts the nodes.
    ///
    /// Returns node indices, dependencies first.
    ///
    /// # Errors
    ///
    /// - [`KernelError::MissingDependency`] if an edge targets a type that is
    ///   not a node.
    /// - [`KernelError::DependencyCycle`] listing every node that could not be
    ///   ordered.
    pub fn topological_order(&self) -> Result<Vec<usize>, KernelError> {
        let index: HashMap<ModuleId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        // dependency -> dependents
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut in_degree = vec![0usize; self.nodes.len()];

        for (node, deps) in self.dependencies.iter().enumerate() {
            for dep in deps {
                let Some(&target) = index.get(dep) else {
                    return Err(KernelError::MissingDependency {
                        module: self.names[node],
                        dependency: dep.name(),
                    });
                };
                dependents[target].push(node);
                in_degree[node] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&node| in_degree[node] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let modules = (0..self.nodes.len())
                .filter(|&node| in_degree[node] > 0)
                .map(|node| self.names[node])
                .collect();
            Err(KernelError::DependencyCycle { modules })
        }
    }
}
