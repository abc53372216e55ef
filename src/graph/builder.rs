//! Dependency graph construction and ordering.
//!
//! The graph is built from explicit `depends_on` entries plus implicit
//! `${ref:…}` attribute references. It rejects cycles with the full cycle
//! path and produces a deterministic topological ordering: ties are broken
//! by declaration order in the stack file.

use crate::config::{ResourceSpec, StackConfig};
use crate::error::{ConfigError, Result};
use std::collections::{BinaryHeap, HashMap};

/// An immutable dependency graph over the declared resources.
///
/// Node indices are declaration indices into the stack's resource list.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Logical ids in declaration order.
    nodes: Vec<String>,
    /// Logical id to declaration index.
    index: HashMap<String, usize>,
    /// For each node, the declaration indices it depends on.
    dependencies: Vec<Vec<usize>>,
    /// For each node, the declaration indices that depend on it.
    dependents: Vec<Vec<usize>>,
}

/// DFS node colors for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Builds the graph from a stack specification.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DanglingReference` when an edge target is not
    /// declared, or `ConfigError::DependencyCycle` with the full cycle path
    /// when the graph is cyclic.
    pub fn build(config: &StackConfig) -> Result<Self> {
        Self::from_resources(&config.resources)
    }

    /// Builds the graph from a resource list.
    ///
    /// # Errors
    ///
    /// Same as [`DependencyGraph::build`].
    pub fn from_resources(resources: &[ResourceSpec]) -> Result<Self> {
        let nodes: Vec<String> = resources.iter().map(|r| r.id.clone()).collect();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];

        for (i, resource) in resources.iter().enumerate() {
            for target in resource.referenced_ids() {
                let Some(&dep) = index.get(&target) else {
                    return Err(ConfigError::DanglingReference {
                        from: resource.id.clone(),
                        to: target,
                    }
                    .into());
                };
                if !dependencies[i].contains(&dep) {
                    dependencies[i].push(dep);
                    dependents[dep].push(i);
                }
            }
        }

        let graph = Self {
            nodes,
            index,
            dependencies,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the logical id at a declaration index.
    #[must_use]
    pub fn id_of(&self, node: usize) -> &str {
        &self.nodes[node]
    }

    /// Returns the declaration index of a logical id.
    #[must_use]
    pub fn index_of(&self, logical_id: &str) -> Option<usize> {
        self.index.get(logical_id).copied()
    }

    /// Returns the declaration indices this node depends on.
    #[must_use]
    pub fn dependencies_of(&self, node: usize) -> &[usize] {
        &self.dependencies[node]
    }

    /// Returns the declaration indices that directly depend on this node.
    #[must_use]
    pub fn dependents_of(&self, node: usize) -> &[usize] {
        &self.dependents[node]
    }

    /// Returns all transitive dependents of a node, excluding the node.
    #[must_use]
    pub fn transitive_dependents(&self, node: usize) -> Vec<usize> {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![node];
        let mut result = Vec::new();
        while let Some(current) = stack.pop() {
            for &dependent in &self.dependents[current] {
                if !visited[dependent] {
                    visited[dependent] = true;
                    result.push(dependent);
                    stack.push(dependent);
                }
            }
        }
        result.sort_unstable();
        result
    }

    /// Returns a topological ordering of declaration indices.
    ///
    /// Dependencies come before dependents; among ready nodes the one
    /// declared first is emitted first, so the order is deterministic.
    #[must_use]
    pub fn topological_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();

        // Min-heap on declaration index
        let mut ready: BinaryHeap<std::cmp::Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| std::cmp::Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(std::cmp::Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(std::cmp::Reverse(dependent));
                }
            }
        }
        order
    }

    /// Returns the reverse topological ordering, used for deletes.
    #[must_use]
    pub fn reverse_order(&self) -> Vec<usize> {
        let mut order = self.topological_order();
        order.reverse();
        order
    }

    /// Rejects cyclic graphs, reporting the full cycle path.
    fn check_acyclic(&self) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path = Vec::new();
        for start in 0..self.nodes.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit(&self, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Result<()> {
        marks[node] = Mark::InProgress;
        path.push(node);
        for &dep in &self.dependencies[node] {
            match marks[dep] {
                Mark::InProgress => {
                    // Found a back edge; report the loop from its first occurrence
                    let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<&str> =
                        path[start..].iter().map(|&n| self.id_of(n)).collect();
                    cycle.push(self.id_of(dep));
                    return Err(ConfigError::DependencyCycle {
                        cycle: cycle.join(" -> "),
                    }
                    .into());
                }
                Mark::Unvisited => self.visit(dep, marks, path)?,
                Mark::Done => {}
            }
        }
        path.pop();
        marks[node] = Mark::Done;
        Ok(())
    }
}
