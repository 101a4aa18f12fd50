//! Dependency graph between computed values.
//!
//! Design:
//! - Forward edges: node -> nodes it depends on (its inputs)
//! - Reverse edges: node -> nodes that depend on it (its consumers)
//! - Invariant: edges and reverse_edges are kept in sync
//!
//! Ordered maps keep `topological_order` deterministic for a given graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Dependency graph over nodes of type `N`.
///
/// - `edges`: node -> set of nodes it depends on
/// - `reverse_edges`: node -> set of nodes depending on it
#[derive(Debug, Clone)]
pub struct DependencyGraph<N: Ord + Clone> {
    nodes: BTreeSet<N>,
    edges: BTreeMap<N, BTreeSet<N>>,
    reverse_edges: BTreeMap<N, BTreeSet<N>>,
}

impl<N: Ord + Clone> DependencyGraph<N> {
    pub fn new() -> Self {
        Self {
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
            reverse_edges: BTreeMap::new(),
        }
    }

    /// Add a node with no edges. Adding an existing node is a no-op.
    pub fn add_node(&mut self, node: N) {
        self.nodes.insert(node);
    }

    /// `node` depends on `depends_on`. Both become nodes of the graph.
    ///
    /// add_dependency(b, a) means "b needs a": edges b -> {a}, reverse a -> {b}
    pub fn add_dependency(&mut self, node: N, depends_on: N) {
        self.nodes.insert(node.clone());
        self.nodes.insert(depends_on.clone());
        self.edges
            .entry(node.clone())
            .or_default()
            .insert(depends_on.clone());
        self.reverse_edges.entry(depends_on).or_default().insert(node);
    }

    pub fn contains(&self, node: &N) -> bool {
        self.nodes.contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that consume `node`.
    pub fn dependents(&self, node: &N) -> Vec<N> {
        self.reverse_edges
            .get(node)
            .map(|waiting| waiting.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dependencies(&self, node: &N) -> Vec<N> {
        self.edges
            .get(node)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every node after all of its dependencies (Kahn's algorithm).
    ///
    /// On a cycle, returns `Err` with the nodes that could not be ordered:
    /// the cycle members plus everything downstream of them.
    pub fn topological_order(&self) -> Result<Vec<N>, Vec<N>> {
        let mut in_degree: BTreeMap<&N, usize> = self
            .nodes
            .iter()
            .map(|node| (node, self.edges.get(node).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: VecDeque<&N> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&node, _)| node)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop_front() {
            order.push(node.clone());
            for dependent in self.reverse_edges.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(in_degree
                .into_iter()
                .filter(|&(_, degree)| degree > 0)
                .map(|(node, _)| node.clone())
                .collect())
        }
    }
}

impl<N: Ord + Clone> Default for DependencyGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}
