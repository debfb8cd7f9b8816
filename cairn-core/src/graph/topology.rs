//! Dependency Topology
//!
//! The edge set of the state graph. Edges are discovered, not declared: a
//! derived node's dependencies are whatever it read during its last
//! computation, and are replaced wholesale every time it recomputes.
//!
//! # Propagation
//!
//! When a source changes we only need to know which nodes sit downstream
//! of it:
//!
//! 1. Walk dependents breadth-first from the changed node
//! 2. Collect every node reached
//! 3. Sort them topologically (dependencies before dependents)
//!
//! The graph then marks each of them maybe-dirty and notifies their
//! subscribers in that order. Nothing recomputes here; recomputation is
//! pulled by the next read.

use std::collections::{HashMap, HashSet, VecDeque};

use super::node::{NodeId, NodeKind};

#[derive(Debug)]
struct Edges {
    kind: NodeKind,
    /// Nodes this node read during its last computation.
    dependencies: HashSet<NodeId>,
    /// Nodes that read this node during their last computation.
    dependents: HashSet<NodeId>,
}

#[derive(Debug, Default)]
pub struct Topology {
    nodes: HashMap<NodeId, Edges>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes.entry(id).or_insert_with(|| Edges {
            kind,
            dependencies: HashSet::new(),
            dependents: HashSet::new(),
        });
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(|edges| edges.kind)
    }

    /// Replace the dependency set of `node`.
    pub fn set_dependencies<I>(&mut self, node: NodeId, dependencies: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        let new: HashSet<NodeId> = dependencies
            .into_iter()
            .filter(|dep| *dep != node && self.nodes.contains_key(dep))
            .collect();

        let old = match self.nodes.get_mut(&node) {
            Some(edges) => std::mem::take(&mut edges.dependencies),
            None => return,
        };

        for dep in old.difference(&new) {
            if let Some(edges) = self.nodes.get_mut(dep) {
                edges.dependents.remove(&node);
            }
        }
        for dep in &new {
            if let Some(edges) = self.nodes.get_mut(dep) {
                edges.dependents.insert(node);
            }
        }

        if let Some(edges) = self.nodes.get_mut(&node) {
            edges.dependencies = new;
        }
    }

    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|edges| edges.dependencies.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|edges| edges.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every node transitively downstream of `changed`, dependencies
    /// before dependents. `changed` itself is not included.
    pub fn affected_by(&self, changed: NodeId) -> Vec<NodeId> {
        let mut reached = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.dependents(changed).into();

        while let Some(id) = queue.pop_front() {
            if id == changed || !visited.insert(id) {
                continue;
            }
            reached.push(id);
            queue.extend(self.dependents(id));
        }

        self.topological_sort(reached)
    }

    /// Kahn's algorithm restricted to `nodes`.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        for &id in &nodes {
            let degree = self
                .nodes
                .get(&id)
                .map(|edges| {
                    edges
                        .dependencies
                        .iter()
                        .filter(|dep| node_set.contains(dep))
                        .count()
                })
                .unwrap_or(0);
            in_degree.insert(id, degree);
            if degree == 0 {
                queue.push_back(id);
            }
        }

        while let Some(id) = queue.pop_front() {
            result.push(id);

            if let Some(edges) = self.nodes.get(&id) {
                for dependent in &edges.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        result
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Topology, NodeId, NodeId, NodeId) {
        let mut topology = Topology::new();
        let source = NodeId::new();
        let derived1 = NodeId::new();
        let derived2 = NodeId::new();

        topology.add_node(source, NodeKind::Source);
        topology.add_node(derived1, NodeKind::Derived);
        topology.add_node(derived2, NodeKind::Derived);
        topology.set_dependencies(derived1, [source]);
        topology.set_dependencies(derived2, [derived1]);

        (topology, source, derived1, derived2)
    }

    #[test]
    fn set_dependencies_maintains_both_directions() {
        let (mut topology, source, derived1, _) = chain();

        assert_eq!(topology.dependents(source), vec![derived1]);
        assert_eq!(topology.dependencies(derived1), vec![source]);

        topology.set_dependencies(derived1, []);
        assert!(topology.dependents(source).is_empty());
        assert!(topology.dependencies(derived1).is_empty());
    }

    #[test]
    fn affected_by_is_transitive_and_ordered() {
        let (topology, source, derived1, derived2) = chain();

        let affected = topology.affected_by(source);
        assert_eq!(affected, vec![derived1, derived2]);
        assert!(topology.affected_by(derived2).is_empty());
    }

    #[test]
    fn diamond_orders_join_last() {
        let mut topology = Topology::new();
        let source = NodeId::new();
        let left = NodeId::new();
        let right = NodeId::new();
        let join = NodeId::new();

        topology.add_node(source, NodeKind::Source);
        for id in [left, right, join] {
            topology.add_node(id, NodeKind::Derived);
        }
        topology.set_dependencies(left, [source]);
        topology.set_dependencies(right, [source]);
        topology.set_dependencies(join, [left, right]);

        let affected = topology.affected_by(source);
        assert_eq!(affected.len(), 3);
        assert_eq!(affected.last(), Some(&join));
    }

    #[test]
    fn unknown_and_self_dependencies_are_ignored() {
        let mut topology = Topology::new();
        let node = NodeId::new();
        topology.add_node(node, NodeKind::Derived);

        topology.set_dependencies(node, [node, NodeId::new()]);
        assert!(topology.dependencies(node).is_empty());
        assert_eq!(topology.kind(node), Some(NodeKind::Derived));
        assert!(topology.contains(node));
        assert_eq!(topology.node_count(), 1);
    }
}
