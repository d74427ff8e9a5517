//! Node/edge storage underlying a plan graph
//!
//! [`GraphStore`] keeps nodes in a dense arena (`Vec<PlanNode>`) with an
//! `id → index` lookup table. Resolved edges are stored as index lists in both
//! directions, which keeps traversals allocation-light and makes cloning the
//! whole graph for a snapshot a plain `Vec` copy.
//!
//! # Derived data
//!
//! After every structural change the store rebuilds, from the declared
//! `depends_on` lists:
//!
//! - the index and both adjacency lists
//! - each node's `dependents`
//! - each node's `blocked_by`
//!
//! Nothing is maintained incrementally, so the derived fields cannot drift
//! from the declared ones. Status-only changes call
//! [`refresh_blocked_by`](GraphStore::refresh_blocked_by) instead of a full
//! rebuild.
//!
//! Dependencies naming a node that does not exist are kept in `depends_on`
//! (they surface through validation), always count as blocking, and have no
//! adjacency entry.

use crate::error::{GraphError, Result};
use crate::node::PlanNode;
use std::collections::HashMap;

/// Arena-backed node table with resolved adjacency
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    nodes: Vec<PlanNode>,
    index: HashMap<String, usize>,
    /// `dependencies[i]` = indices node `i` depends on, declaration order, deduplicated
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]` = indices of nodes depending on `i`, insertion order
    dependents: Vec<Vec<usize>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from nodes in insertion order
    pub fn from_nodes(nodes: impl IntoIterator<Item = PlanNode>) -> Result<Self> {
        let mut store = Self::new();
        for node in nodes {
            if store.index.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            store.index.insert(node.id.clone(), store.nodes.len());
            store.nodes.push(node);
        }
        store.rebuild();
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&PlanNode> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut PlanNode> {
        let i = self.index_of(id)?;
        Some(&mut self.nodes[i])
    }

    /// Node at arena index `i`
    ///
    /// Panics if `i` is out of bounds; indices come from this store.
    pub fn node_at(&self, i: usize) -> &PlanNode {
        &self.nodes[i]
    }

    pub(crate) fn node_at_mut(&mut self, i: usize) -> &mut PlanNode {
        &mut self.nodes[i]
    }

    /// Nodes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlanNode> {
        self.nodes.iter_mut()
    }

    /// Resolved dependency indices of node `i`
    pub fn dependencies_of(&self, i: usize) -> &[usize] {
        &self.dependencies[i]
    }

    /// Indices of nodes that depend on node `i`
    pub fn dependents_of(&self, i: usize) -> &[usize] {
        &self.dependents[i]
    }

    /// Number of distinct declared dependencies of node `i`, dangling included
    pub fn declared_dependency_count(&self, i: usize) -> usize {
        let dangling = self.dangling_dependencies_of(i).len();
        self.dependencies[i].len() + dangling
    }

    /// Declared dependencies of node `i` that name no existing node
    pub fn dangling_dependencies_of(&self, i: usize) -> Vec<&str> {
        let mut missing: Vec<&str> = Vec::new();
        for dep in &self.nodes[i].depends_on {
            if !self.index.contains_key(dep) && !missing.contains(&dep.as_str()) {
                missing.push(dep);
            }
        }
        missing
    }

    /// Insert a node, returning its arena index
    pub fn insert(&mut self, mut node: PlanNode) -> Result<usize> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        node.dependents.clear();
        node.blocked_by.clear();

        let i = self.nodes.len();
        self.index.insert(node.id.clone(), i);
        self.nodes.push(node);
        self.rebuild();
        Ok(i)
    }

    /// Remove a node and strip every reference to it from the other nodes
    pub fn remove(&mut self, id: &str) -> Option<PlanNode> {
        let i = self.index_of(id)?;
        let removed = self.nodes.remove(i);
        for node in &mut self.nodes {
            node.depends_on.retain(|dep| dep != id);
        }
        self.rebuild();
        Some(removed)
    }

    /// Make `to` depend on `from`
    ///
    /// Returns `Ok(false)` when the edge already exists. `from` is not
    /// required to exist.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<bool> {
        let Some(i) = self.index_of(to) else {
            return Err(GraphError::MissingDependency {
                from: from.to_string(),
                to: to.to_string(),
            });
        };
        if self.nodes[i].depends_on.iter().any(|dep| dep == from) {
            return Ok(false);
        }
        self.nodes[i].depends_on.push(from.to_string());
        self.rebuild();
        Ok(true)
    }

    /// Recompute the index, adjacency and all derived node fields
    pub fn rebuild(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();

        let n = self.nodes.len();
        self.dependencies = vec![Vec::new(); n];
        self.dependents = vec![Vec::new(); n];

        for i in 0..n {
            for dep in &self.nodes[i].depends_on {
                if let Some(&j) = self.index.get(dep) {
                    if !self.dependencies[i].contains(&j) {
                        self.dependencies[i].push(j);
                        self.dependents[j].push(i);
                    }
                }
            }
        }

        for i in 0..n {
            let ids: Vec<String> = self.dependents[i]
                .iter()
                .map(|&j| self.nodes[j].id.clone())
                .collect();
            self.nodes[i].dependents = ids;
        }

        self.refresh_blocked_by();
    }

    /// Recompute `blocked_by` for every node from current statuses
    pub fn refresh_blocked_by(&mut self) {
        let blocked: Vec<Vec<String>> = self
            .nodes
            .iter()
            .map(|node| {
                let mut blockers: Vec<String> = Vec::new();
                for dep in &node.depends_on {
                    let satisfied = self
                        .index
                        .get(dep)
                        .map(|&j| self.nodes[j].status.satisfies_dependents())
                        .unwrap_or(false);
                    if !satisfied && !blockers.contains(dep) {
                        blockers.push(dep.clone());
                    }
                }
                blockers
            })
            .collect();

        for (node, blockers) in self.nodes.iter_mut().zip(blocked) {
            node.blocked_by = blockers;
        }
    }
}
