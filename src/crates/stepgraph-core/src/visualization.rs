//! Plan rendering as DOT (Graphviz) or Mermaid
//!
//! Nodes are labelled with their description and status and colored by
//! status; edges point from a dependency to its dependent, so the diagram
//! reads in execution order.
//!
//! ```rust
//! use stepgraph_core::{visualize, PlanDag, PlanNode, VisualizationOptions};
//!
//! let mut plan = PlanDag::new("Ship it");
//! plan.add_node(PlanNode::new("build", "Build")).unwrap();
//! plan.add_node(PlanNode::new("deploy", "Deploy").with_dependencies(["build"])).unwrap();
//!
//! let dot = visualize(&plan, &VisualizationOptions::dot().with_title("Release"));
//! assert!(dot.contains("\"build\" -> \"deploy\""));
//!
//! let mermaid = visualize(&plan, &VisualizationOptions::mermaid());
//! assert!(mermaid.contains("build --> deploy"));
//! ```

use crate::dag::PlanDag;
use crate::node::{NodeStatus, PlanNode};
use std::collections::{HashMap, HashSet};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    /// DOT format for Graphviz
    Dot,
    /// Mermaid flowchart
    Mermaid,
}

/// Visualization options
#[derive(Debug, Clone)]
pub struct VisualizationOptions {
    pub format: VisualizationFormat,
    /// Add tool, priority and estimate to node labels
    pub include_details: bool,
    pub title: Option<String>,
    /// Draw critical path edges in bold
    pub highlight_critical_path: bool,
}

impl Default for VisualizationOptions {
    fn default() -> Self {
        Self {
            format: VisualizationFormat::Dot,
            include_details: false,
            title: None,
            highlight_critical_path: false,
        }
    }
}

impl VisualizationOptions {
    pub fn dot() -> Self {
        Self {
            format: VisualizationFormat::Dot,
            ..Default::default()
        }
    }

    pub fn mermaid() -> Self {
        Self {
            format: VisualizationFormat::Mermaid,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_details(mut self) -> Self {
        self.include_details = true;
        self
    }

    pub fn with_critical_path(mut self) -> Self {
        self.highlight_critical_path = true;
        self
    }
}

/// Render a plan as a string
pub fn visualize(plan: &PlanDag, options: &VisualizationOptions) -> String {
    match options.format {
        VisualizationFormat::Dot => visualize_dot(plan, options),
        VisualizationFormat::Mermaid => visualize_mermaid(plan, options),
    }
}

fn status_color(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Pending => "#F0F0F0",
        NodeStatus::Ready => "#ADD8E6",
        NodeStatus::Executing => "#FFE4B5",
        NodeStatus::Completed => "#90EE90",
        NodeStatus::Failed => "#FFB6C1",
        NodeStatus::Skipped => "#D3D3D3",
        NodeStatus::Cancelled => "#A9A9A9",
    }
}

fn node_label(node: &PlanNode, options: &VisualizationOptions) -> String {
    let title = if node.description.is_empty() {
        node.id.as_str()
    } else {
        node.description.as_str()
    };
    let mut label = format!("{}\n[{}]", title, node.status);
    if options.include_details {
        if let Some(tool) = &node.tool {
            label.push_str(&format!("\ntool: {}", tool));
        }
        label.push_str(&format!("\npriority: {}", node.priority));
        if let Some(ms) = node.estimated_duration_ms {
            label.push_str(&format!("\nestimate: {}ms", ms));
        }
    }
    label
}

/// Edges on the critical path as (dependency, dependent) pairs
fn critical_edges(plan: &PlanDag, options: &VisualizationOptions) -> HashSet<(String, String)> {
    if !options.highlight_critical_path {
        return HashSet::new();
    }
    let path = plan.get_critical_path().path;
    path.windows(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

fn visualize_dot(plan: &PlanDag, options: &VisualizationOptions) -> String {
    let mut output = String::new();

    output.push_str("digraph G {\n");
    output.push_str("    rankdir=TB;\n");
    output.push_str("    node [shape=box, style=\"rounded,filled\"];\n");

    if let Some(title) = &options.title {
        output.push_str("    labelloc=\"t\";\n");
        output.push_str(&format!("    label=\"{}\";\n", escape_dot(title)));
    }

    for node in plan.nodes() {
        let shape = if node.parallel { "" } else { ", shape=box3d" };
        output.push_str(&format!(
            "    \"{}\" [label=\"{}\", fillcolor=\"{}\"{}];\n",
            escape_dot(&node.id),
            escape_dot(&node_label(node, options)),
            status_color(node.status),
            shape
        ));
    }

    let critical = critical_edges(plan, options);
    for node in plan.nodes() {
        for dep in &node.depends_on {
            let style = if critical.contains(&(dep.clone(), node.id.clone())) {
                " [penwidth=3, color=\"#DC143C\"]"
            } else if plan.get_node(dep).is_none() {
                " [style=dashed, color=\"#DC143C\"]"
            } else {
                ""
            };
            output.push_str(&format!(
                "    \"{}\" -> \"{}\"{};\n",
                escape_dot(dep),
                escape_dot(&node.id),
                style
            ));
        }
    }

    output.push_str("}\n");
    output
}

fn visualize_mermaid(plan: &PlanDag, options: &VisualizationOptions) -> String {
    let mut output = String::new();

    if let Some(title) = &options.title {
        output.push_str("---\n");
        output.push_str(&format!("title: {}\n", escape_mermaid(title)));
        output.push_str("---\n");
    }
    output.push_str("graph TD\n");

    let ids = mermaid_ids(plan);
    let id_of = |id: &str| ids.get(id).cloned().unwrap_or_else(|| sanitize_id(id));

    for node in plan.nodes() {
        let (open, close) = if node.parallel { ("[", "]") } else { ("[[", "]]") };
        let label = escape_mermaid(&node_label(node, options)).replace('\n', "<br/>");
        output.push_str(&format!(
            "    {}{}\"{}\"{}\n",
            id_of(&node.id),
            open,
            label,
            close
        ));
        output.push_str(&format!(
            "    style {} fill:{},stroke:#666,stroke-width:2px\n",
            id_of(&node.id),
            status_color(node.status)
        ));
    }

    let critical = critical_edges(plan, options);
    for node in plan.nodes() {
        for dep in &node.depends_on {
            let arrow = if critical.contains(&(dep.clone(), node.id.clone())) {
                "==>"
            } else if plan.get_node(dep).is_none() {
                "-.->"
            } else {
                "-->"
            };
            output.push_str(&format!(
                "    {} {} {}\n",
                id_of(dep),
                arrow,
                id_of(&node.id)
            ));
        }
    }

    output
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_mermaid(s: &str) -> String {
    s.replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Mermaid ids must be alphanumeric + underscore
fn sanitize_id(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Distinct Mermaid id for every node and dangling dependency
///
/// Ids that sanitize to the same string get a numeric suffix, in insertion
/// order, so `a-b` and `a_b` stay separate nodes.
fn mermaid_ids(plan: &PlanDag) -> HashMap<String, String> {
    let mut ids = HashMap::new();
    let mut taken = HashSet::new();

    let names = plan
        .nodes()
        .flat_map(|node| std::iter::once(&node.id).chain(node.depends_on.iter()));
    for name in names {
        if ids.contains_key(name) {
            continue;
        }
        let base = sanitize_id(name);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while !taken.insert(candidate.clone()) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        ids.insert(name.clone(), candidate);
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> PlanDag {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(
            PlanNode::new("fetch-data", "Fetch \"raw\" data")
                .with_tool("http", json!({}))
                .with_estimated_duration(10),
        )
        .unwrap();
        plan.add_node(
            PlanNode::new("render", "Render")
                .with_dependencies(["fetch-data"])
                .with_estimated_duration(5)
                .sequential(),
        )
        .unwrap();
        plan
    }

    #[test]
    fn test_dot_output() {
        let plan = sample();
        let dot = visualize(&plan, &VisualizationOptions::dot().with_title("Demo"));
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("label=\"Demo\""));
        assert!(dot.contains("\"fetch-data\" -> \"render\";"));
        assert!(dot.contains("Fetch \\\"raw\\\" data"));
        assert!(dot.contains("[ready]"));
        assert!(dot.contains("shape=box3d"));
    }

    #[test]
    fn test_mermaid_output() {
        let plan = sample();
        let mermaid = visualize(&plan, &VisualizationOptions::mermaid().with_details());
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("fetch_data --> render"));
        assert!(mermaid.contains("render[[\""));
        assert!(mermaid.contains("tool: http"));
        assert!(mermaid.contains("&quot;raw&quot;"));
    }

    #[test]
    fn test_critical_path_highlight() {
        let plan = sample();
        let dot = visualize(&plan, &VisualizationOptions::dot().with_critical_path());
        assert!(dot.contains("\"fetch-data\" -> \"render\" [penwidth=3"));

        let mermaid = visualize(&plan, &VisualizationOptions::mermaid().with_critical_path());
        assert!(mermaid.contains("fetch_data ==> render"));
    }

    #[test]
    fn test_missing_dependency_is_dashed() {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(PlanNode::new("a", "A").with_dependencies(["ghost"]))
            .unwrap();
        let mermaid = visualize(&plan, &VisualizationOptions::mermaid());
        assert!(mermaid.contains("ghost -.-> a"));
    }

    #[test]
    fn test_colliding_mermaid_ids_stay_distinct() {
        let mut plan = PlanDag::with_id("p", "g");
        plan.add_node(PlanNode::new("a-b", "dash")).unwrap();
        plan.add_node(PlanNode::new("a_b", "underscore").with_dependencies(["a-b"]))
            .unwrap();

        let mermaid = visualize(&plan, &VisualizationOptions::mermaid());
        assert!(mermaid.contains("a_b[\"dash"));
        assert!(mermaid.contains("a_b_1[\"underscore"));
        assert!(mermaid.contains("a_b --> a_b_1"));
    }
}
