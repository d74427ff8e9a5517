//! Property-based tests for graph ordering invariants
//!
//! Random plans are built so that their shape is known up front (acyclic,
//! or with one injected back edge) and the scheduling algorithms are checked
//! against it.

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use stepgraph_core::{GraphStore, PlanDag, PlanNode};

// Each node gets a priority and a few candidate dependencies; candidates are
// folded onto earlier nodes so the result is always acyclic.
fn acyclic_plan_strategy() -> impl Strategy<Value = Vec<PlanNode>> {
    prop::collection::vec(
        (-3i64..3, prop::collection::vec(any::<usize>(), 0..4), 0u64..50),
        1..24,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (priority, candidates, estimate))| {
                let deps: Vec<String> = if i == 0 {
                    Vec::new()
                } else {
                    candidates.into_iter().map(|c| format!("n{}", c % i)).collect()
                };
                PlanNode::new(format!("n{}", i), "")
                    .with_dependencies(deps)
                    .with_priority(priority)
                    .with_estimated_duration(estimate)
            })
            .collect()
    })
}

proptest! {
    /// Acyclic plans are fully ordered and every dependency comes first
    #[test]
    fn prop_acyclic_plans_are_fully_ordered(nodes in acyclic_plan_strategy()) {
        let mut plan = PlanDag::new("prop");
        plan.add_nodes(nodes.clone()).unwrap();

        prop_assert!(!plan.has_cycle());
        prop_assert!(plan.validate().valid);

        let order = plan.get_execution_order();
        prop_assert_eq!(order.len(), nodes.len());

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        for node in &nodes {
            for dep in &node.depends_on {
                prop_assert!(position[dep.as_str()] < position[node.id.as_str()]);
            }
        }
    }

    /// A back edge over a dependency chain is always detected
    #[test]
    fn prop_back_edge_creates_cycle(len in 2usize..20) {
        let mut plan = PlanDag::new("prop");
        for i in 0..len {
            let node = PlanNode::new(format!("n{}", i), "");
            let node = if i == 0 { node } else { node.with_dependencies([format!("n{}", i - 1)]) };
            plan.add_node(node).unwrap();
        }
        prop_assert!(!plan.has_cycle());

        plan.add_edge(&format!("n{}", len - 1), "n0").unwrap();
        prop_assert!(plan.has_cycle());
        prop_assert!(plan.get_execution_order().len() < len);
        prop_assert!(!plan.validate().valid);
    }

    /// Independent nodes are ordered by priority, ties by insertion
    #[test]
    fn prop_independent_nodes_follow_priority(priorities in prop::collection::vec(-5i64..5, 1..30)) {
        let graph = GraphStore::from_nodes(
            priorities
                .iter()
                .enumerate()
                .map(|(i, &p)| PlanNode::new(format!("n{}", i), "").with_priority(p)),
        )
        .unwrap();

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by_key(|&i| priorities[i]);
        let expected: Vec<String> = expected.into_iter().map(|i| format!("n{}", i)).collect();

        prop_assert_eq!(stepgraph_core::algo::topological_order(&graph), expected);
    }

    /// The critical path is a dependency chain whose estimates sum to its total
    #[test]
    fn prop_critical_path_is_a_chain(nodes in acyclic_plan_strategy()) {
        let mut plan = PlanDag::new("prop");
        plan.add_nodes(nodes).unwrap();

        let cp = plan.get_critical_path();
        prop_assert!(!cp.path.is_empty());

        let mut total = 0;
        for (i, id) in cp.path.iter().enumerate() {
            let node = plan.get_node(id).unwrap();
            total += node.estimated_duration_ms.unwrap_or(0);
            if i > 0 {
                prop_assert!(node.depends_on.contains(&cp.path[i - 1]));
            }
        }
        prop_assert_eq!(total, cp.total_ms);

        let last = plan.get_node(cp.path.last().unwrap()).unwrap();
        prop_assert!(last.dependents.is_empty());
    }

    /// Serialized plans survive a round trip whatever their run state
    #[test]
    fn prop_json_round_trip(
        nodes in acyclic_plan_strategy(),
        marks in prop::collection::vec((any::<usize>(), 0u8..4), 0..16),
    ) {
        let mut plan = PlanDag::with_id("prop", "round trip");
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        plan.add_nodes(nodes).unwrap();

        for (pick, op) in marks {
            let id = &ids[pick % ids.len()];
            match op {
                0 => plan.mark_executing(id).unwrap(),
                1 => plan.mark_completed(id, json!({ "by": id })).unwrap(),
                2 => plan.mark_failed(id, "boom").unwrap(),
                _ => plan.mark_skipped(id, "not needed").unwrap(),
            }
        }

        let text = plan.to_json().unwrap();
        let restored = PlanDag::from_json(&text).unwrap();

        prop_assert_eq!(restored.status(), plan.status());
        prop_assert_eq!(restored.version(), plan.version());
        prop_assert_eq!(restored.get_execution_order(), plan.get_execution_order());
        prop_assert_eq!(
            restored.nodes().cloned().collect::<Vec<_>>(),
            plan.nodes().cloned().collect::<Vec<_>>()
        );
        prop_assert_eq!(restored.to_json().unwrap(), text);
    }
}
