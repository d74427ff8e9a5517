//! Pure graph algorithms over a [`GraphStore`]
//!
//! - [`topological_order`] - priority-aware Kahn's algorithm
//! - [`find_cycle`] / [`has_cycle`] - three-color DFS
//! - [`critical_path`] - longest path weighted by estimated duration
//! - [`ready_indices`] - nodes that can be dispatched now
//!
//! All traversals use explicit stacks or queues, so deep plans cannot
//! overflow the call stack.

use crate::graph::GraphStore;
use crate::node::NodeStatus;
use serde::{Deserialize, Serialize};

/// Topological order of node indices
///
/// The ready queue is stable-sorted by ascending priority before every pop,
/// so equal-priority nodes leave in the order they became ready (initially,
/// insertion order). A node's in-degree is the number of distinct ids it
/// declares, so a dangling dependency keeps it out of the result just like a
/// cycle does.
pub fn topological_indices(graph: &GraphStore) -> Vec<usize> {
    let n = graph.len();
    let mut in_degree: Vec<usize> = (0..n).map(|i| graph.declared_dependency_count(i)).collect();
    let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while !queue.is_empty() {
        queue.sort_by_key(|&i| graph.node_at(i).priority);
        let current = queue.remove(0);
        order.push(current);

        for &dependent in graph.dependents_of(current) {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push(dependent);
            }
        }
    }

    order
}

/// Topological order as node ids
pub fn topological_order(graph: &GraphStore) -> Vec<String> {
    topological_indices(graph)
        .into_iter()
        .map(|i| graph.node_at(i).id.clone())
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Find one dependency cycle, returned as the node ids along it
///
/// The walk follows `depends_on` edges from every unvisited node; reaching a
/// node that is still on the DFS stack closes a cycle.
pub fn find_cycle(graph: &GraphStore) -> Option<Vec<String>> {
    let n = graph.len();
    let mut color = vec![Color::White; n];

    for root in 0..n {
        if color[root] != Color::White {
            continue;
        }

        // (node, position of the next dependency to visit)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        color[root] = Color::Gray;

        while let Some(&(node, next)) = stack.last() {
            let deps = graph.dependencies_of(node);
            if next < deps.len() {
                let dep = deps[next];
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match color[dep] {
                    Color::White => {
                        color[dep] = Color::Gray;
                        stack.push((dep, 0));
                    }
                    Color::Gray => {
                        let start = stack.iter().position(|&(i, _)| i == dep).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[start..]
                            .iter()
                            .map(|&(i, _)| graph.node_at(i).id.clone())
                            .collect();
                        cycle.push(graph.node_at(dep).id.clone());
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                stack.pop();
            }
        }
    }

    None
}

pub fn has_cycle(graph: &GraphStore) -> bool {
    find_cycle(graph).is_some()
}

/// Longest duration-weighted chain through the plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalPath {
    /// Node ids from the first dependency to the end node
    pub path: Vec<String>,
    /// Sum of `estimated_duration_ms` along `path`
    pub total_ms: u64,
}

/// Compute the critical path
///
/// Each node's best chain is its own estimate (absent = 0) plus the best chain
/// among its dependencies; results are memoized in topological order. The
/// answer is the best chain ending at a node without dependents.
///
/// Ties are resolved explicitly: among a node's dependencies the first
/// maximal one in `depends_on` order wins, and among end nodes the first
/// maximal one in insertion order wins. Nodes caught in a cycle (or behind a
/// dangling dependency) never get a chain and are ignored.
pub fn critical_path(graph: &GraphStore) -> CriticalPath {
    let n = graph.len();
    // (chain total, predecessor on the chain)
    let mut memo: Vec<Option<(u64, Option<usize>)>> = vec![None; n];

    for i in topological_indices(graph) {
        let own = graph.node_at(i).estimated_duration_ms.unwrap_or(0);
        let mut best: Option<(u64, usize)> = None;
        for &dep in graph.dependencies_of(i) {
            if let Some((total, _)) = memo[dep] {
                if best.map_or(true, |(b, _)| total > b) {
                    best = Some((total, dep));
                }
            }
        }
        memo[i] = Some(match best {
            Some((total, dep)) => (total.saturating_add(own), Some(dep)),
            None => (own, None),
        });
    }

    let mut end: Option<(u64, usize)> = None;
    for i in 0..n {
        if !graph.dependents_of(i).is_empty() {
            continue;
        }
        if let Some((total, _)) = memo[i] {
            if end.map_or(true, |(b, _)| total > b) {
                end = Some((total, i));
            }
        }
    }

    let Some((total_ms, last)) = end else {
        return CriticalPath::default();
    };

    let mut path = Vec::new();
    let mut cursor = Some(last);
    while let Some(i) = cursor {
        path.push(graph.node_at(i).id.clone());
        cursor = memo[i].and_then(|(_, prev)| prev);
    }
    path.reverse();

    CriticalPath { path, total_ms }
}

/// Indices of dispatchable nodes, stably sorted by ascending priority
///
/// A node qualifies when it is already `ready`, or `pending` with nothing
/// left in `blocked_by`.
pub fn ready_indices(graph: &GraphStore) -> Vec<usize> {
    let mut ready: Vec<usize> = graph
        .iter()
        .enumerate()
        .filter(|(_, node)| match node.status {
            NodeStatus::Ready => true,
            NodeStatus::Pending => node.blocked_by.is_empty(),
            _ => false,
        })
        .map(|(i, _)| i)
        .collect();
    ready.sort_by_key(|&i| graph.node_at(i).priority);
    ready
}
