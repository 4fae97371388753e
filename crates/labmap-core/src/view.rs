//! Named view projection over a rendered graph.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::{FlowGraph, FlowNode, ViewConfig};

/// `include` entry meaning "everything".
pub const WILDCARD: &str = "*";

/// Project `graph` down to the nodes named by `view`.
///
/// With `expand_children`, descendants of every listed id are pulled in
/// through `data.parent`. Edges survive only when both ends do.
pub fn apply_view(graph: &FlowGraph, view: &ViewConfig) -> FlowGraph {
    if view.is_wildcard() {
        return graph.clone();
    }

    let mut visible: HashSet<&str> = view.include.iter().map(String::as_str).collect();

    if view.expand_children {
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &graph.nodes {
            if let Some(parent) = node.data.parent.as_deref() {
                children.entry(parent).or_default().push(node.id.as_str());
            }
        }

        // `visible` doubles as the visited set, so looping parent data
        // still terminates.
        let mut queue: VecDeque<&str> = view.include.iter().map(String::as_str).collect();
        while let Some(id) = queue.pop_front() {
            for &child in children.get(id).into_iter().flatten() {
                if visible.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }

    let nodes: Vec<FlowNode> = graph
        .nodes
        .iter()
        .filter(|n| visible.contains(n.id.as_str()))
        .cloned()
        .collect();
    let edges = graph
        .edges
        .iter()
        .filter(|e| visible.contains(e.source.as_str()) && visible.contains(e.target.as_str()))
        .cloned()
        .collect();

    debug!(view = %view.name, nodes = nodes.len(), "view applied");
    FlowGraph { nodes, edges }
}

/// Nodes a view is anchored on: parentless nodes for a wildcard view,
/// otherwise the listed ids that exist.
pub fn view_roots<'g>(graph: &'g FlowGraph, view: &ViewConfig) -> Vec<&'g FlowNode> {
    if view.is_wildcard() {
        return graph
            .nodes
            .iter()
            .filter(|n| n.data.parent.is_none())
            .collect();
    }
    graph
        .nodes
        .iter()
        .filter(|n| view.include.iter().any(|id| *id == n.id))
        .collect()
}

/// Look up `name` and apply it. `None` when the view does not exist; the
/// caller keeps whatever it showed before.
pub fn select_view(
    graph: &FlowGraph,
    views: &BTreeMap<String, ViewConfig>,
    name: &str,
) -> Option<FlowGraph> {
    match views.get(name) {
        Some(view) => Some(apply_view(graph, view)),
        None => {
            warn!(view = name, "unknown view, leaving graph unfiltered");
            None
        }
    }
}
