//! Automatic centered tree layout.
//!
//! Leaves take the next slot of a shared horizontal cursor; every internal
//! node sits halfway between its leftmost and rightmost child, one row above
//! them. Disjoint trees are separated by an extra double gap.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::tree::{InfraTree, NodeIx};
use crate::{
    connection_edge_id, structural_edge_id, Connection, EdgeKind, FlowEdge, FlowGraph, FlowNode,
    FlowNodeData, LabError, Position, Presentation,
};

pub const X_GAP: f64 = 220.0;
pub const Y_GAP: f64 = 160.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutConfig {
    pub x_gap: f64,
    pub y_gap: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            x_gap: X_GAP,
            y_gap: Y_GAP,
        }
    }
}

/// Horizontal placement cursor. Only leaves advance it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cursor {
    x: f64,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(x: f64) -> Self {
        Self { x }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    fn take_leaf_slot(&mut self, gap: f64) -> f64 {
        let x = self.x;
        self.x += gap;
        x
    }

    fn separate_trees(&mut self, gap: f64) {
        self.x += gap * 2.0;
    }
}

pub struct LayoutEngine<'p> {
    config: LayoutConfig,
    presentation: &'p Presentation,
}

impl<'p> LayoutEngine<'p> {
    pub fn new(presentation: &'p Presentation) -> Self {
        Self {
            config: LayoutConfig::default(),
            presentation,
        }
    }

    pub fn with_config(mut self, config: LayoutConfig) -> Self {
        self.config = config;
        self
    }

    /// Lay out the whole forest, then add connection edges whose endpoints
    /// both exist.
    pub fn layout(
        &self,
        tree: &InfraTree,
        connections: &[Connection],
    ) -> Result<FlowGraph, LabError> {
        let mut walk = Walk::new(self.config, self.presentation, tree);
        let mut cursor = Cursor::new();
        for &root in tree.roots() {
            walk.place(root, &mut cursor)?;
            cursor.separate_trees(self.config.x_gap);
        }
        walk.check_unplaced()?;

        let mut graph = walk.finish();
        let placed: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        let mut links = Vec::new();
        for conn in connections {
            if !placed.contains(conn.from.as_str()) || !placed.contains(conn.to.as_str()) {
                debug!(from = %conn.from, to = %conn.to, "dropping connection with unknown endpoint");
                continue;
            }
            links.push(FlowEdge {
                id: connection_edge_id(&conn.from, &conn.to),
                source: conn.from.clone(),
                target: conn.to.clone(),
                kind: EdgeKind::Connection,
                label: (!conn.label.is_empty()).then(|| conn.label.clone()),
                animated: true,
            });
        }
        graph.edges.extend(links);

        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "layout complete"
        );
        Ok(graph)
    }

    /// Lay out a single subtree starting from `cursor`, structural edges only.
    /// `root` gets no incoming edge.
    pub fn layout_subtree(
        &self,
        tree: &InfraTree,
        root: NodeIx,
        cursor: &mut Cursor,
    ) -> Result<FlowGraph, LabError> {
        let mut walk = Walk::new(self.config, self.presentation, tree);
        walk.place(root, cursor)?;
        Ok(walk.finish())
    }
}

/// Lay out a forest with the default gaps.
pub fn tree_to_flow(
    tree: &InfraTree,
    connections: &[Connection],
    presentation: &Presentation,
) -> Result<FlowGraph, LabError> {
    LayoutEngine::new(presentation).layout(tree, connections)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    OnPath,
    Placed,
}

struct Frame {
    ix: NodeIx,
    depth: usize,
    next_child: usize,
    /// min/max x of the children placed so far
    span: Option<(f64, f64)>,
}

impl Frame {
    fn new(ix: NodeIx, depth: usize) -> Self {
        Self {
            ix,
            depth,
            next_child: 0,
            span: None,
        }
    }

    fn record(&mut self, x: f64) {
        self.span = Some(match self.span {
            Some((lo, hi)) => (lo.min(x), hi.max(x)),
            None => (x, x),
        });
    }
}

struct Walk<'a> {
    config: LayoutConfig,
    presentation: &'a Presentation,
    tree: &'a InfraTree,
    visits: Vec<Visit>,
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
}

impl<'a> Walk<'a> {
    fn new(config: LayoutConfig, presentation: &'a Presentation, tree: &'a InfraTree) -> Self {
        Self {
            config,
            presentation,
            tree,
            visits: vec![Visit::Unseen; tree.len()],
            nodes: Vec::with_capacity(tree.len()),
            edges: Vec::with_capacity(tree.len()),
        }
    }

    /// Depth-first, children before parent. Uses an explicit stack so deep
    /// chains cannot exhaust the call stack. Returns the x of `root`.
    fn place(&mut self, root: NodeIx, cursor: &mut Cursor) -> Result<f64, LabError> {
        let tree = self.tree;
        let mut stack: Vec<Frame> = Vec::new();
        self.enter(root, &stack)?;
        stack.push(Frame::new(root, 0));

        let mut x = cursor.x();
        while let Some(top) = stack.last_mut() {
            if let Some(&child) = tree.node(top.ix).children.get(top.next_child) {
                top.next_child += 1;
                let depth = top.depth + 1;
                self.enter(child, &stack)?;
                stack.push(Frame::new(child, depth));
                continue;
            }

            let Some(frame) = stack.pop() else { break };
            x = match frame.span {
                Some((lo, hi)) => (lo + hi) / 2.0,
                None => cursor.take_leaf_slot(self.config.x_gap),
            };
            let parent = stack.last().map(|f| f.ix);
            self.emit(frame.ix, frame.depth, x, parent);
            if let Some(up) = stack.last_mut() {
                up.record(x);
            }
        }
        Ok(x)
    }

    fn enter(&mut self, ix: NodeIx, stack: &[Frame]) -> Result<(), LabError> {
        match self.visits[ix] {
            Visit::Unseen => {
                self.visits[ix] = Visit::OnPath;
                Ok(())
            }
            Visit::OnPath => {
                let start = stack.iter().position(|f| f.ix == ix).unwrap_or(0);
                let mut path: Vec<String> = stack[start..]
                    .iter()
                    .map(|f| self.tree.node(f.ix).item.id.clone())
                    .collect();
                path.push(self.tree.node(ix).item.id.clone());
                Err(LabError::CyclicTopology { path })
            }
            Visit::Placed => Err(LabError::SharedNode {
                id: self.tree.node(ix).item.id.clone(),
            }),
        }
    }

    fn emit(&mut self, ix: NodeIx, depth: usize, x: f64, parent: Option<NodeIx>) {
        let tree = self.tree;
        let item = &tree.node(ix).item;
        let parent_id = parent.map(|p| tree.node(p).item.id.clone());
        let style = self.presentation.styles.resolve(&item.id, &item.kind);

        if let Some(pid) = &parent_id {
            self.edges.push(FlowEdge {
                id: structural_edge_id(pid, &item.id),
                source: pid.clone(),
                target: item.id.clone(),
                kind: EdgeKind::Structural,
                label: None,
                animated: false,
            });
        }
        self.nodes.push(FlowNode {
            id: item.id.clone(),
            node_type: "infra".to_string(),
            position: Position {
                x,
                y: depth as f64 * self.config.y_gap,
            },
            data: FlowNodeData {
                label: item.name.clone(),
                role: item.purpose.clone(),
                color: style.color,
                icon: style.icon,
                status: self.presentation.status_of(&item.id),
                parent: parent_id,
                ip: item.ip.clone(),
                dns: item.dns.clone(),
                port: item.port.clone(),
            },
        });
        self.visits[ix] = Visit::Placed;
    }

    /// Anything the roots never reached either hangs off a parent loop or
    /// was never attached at all.
    fn check_unplaced(&self) -> Result<(), LabError> {
        for (ix, visit) in self.visits.iter().enumerate() {
            if *visit != Visit::Unseen {
                continue;
            }
            match parent_cycle(self.tree, ix) {
                Some(path) => return Err(LabError::CyclicTopology { path }),
                None => warn!(
                    id = %self.tree.node(ix).item.id,
                    "node is not reachable from any root, skipping"
                ),
            }
        }
        Ok(())
    }

    fn finish(self) -> FlowGraph {
        FlowGraph {
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

/// Follow parent links from `start`; returns the loop as ids if there is one.
fn parent_cycle(tree: &InfraTree, start: NodeIx) -> Option<Vec<String>> {
    let mut seen_at: HashMap<NodeIx, usize> = HashMap::new();
    let mut chain: Vec<NodeIx> = Vec::new();
    let mut cur = Some(start);
    while let Some(ix) = cur {
        if let Some(&pos) = seen_at.get(&ix) {
            let mut path: Vec<String> = chain[pos..]
                .iter()
                .map(|&i| tree.node(i).item.id.clone())
                .collect();
            path.push(tree.node(ix).item.id.clone());
            return Some(path);
        }
        seen_at.insert(ix, chain.len());
        chain.push(ix);
        cur = tree.node(ix).parent;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::build_infra_tree;
    use crate::{InfraItem, NodeStatus};

    fn item(id: &str, parent: Option<&str>) -> InfraItem {
        let item = InfraItem::new(id, format!("{id} name"), "vm");
        match parent {
            Some(p) => item.with_parent(p),
            None => item,
        }
    }

    fn pos(graph: &FlowGraph, id: &str) -> (f64, f64) {
        let node = graph.node(id).unwrap();
        (node.position.x, node.position.y)
    }

    fn edge_ids(graph: &FlowGraph) -> Vec<&str> {
        graph.edges.iter().map(|e| e.id.as_str()).collect()
    }

    fn layout(items: &[InfraItem], connections: &[Connection]) -> FlowGraph {
        let tree = build_infra_tree(items);
        tree_to_flow(&tree, connections, &Presentation::default()).unwrap()
    }

    #[test]
    fn chain_stacks_vertically_at_zero() {
        let graph = layout(&[item("a", None), item("b", Some("a")), item("c", Some("b"))], &[]);
        assert_eq!(pos(&graph, "c"), (0.0, 320.0));
        assert_eq!(pos(&graph, "b"), (0.0, 160.0));
        assert_eq!(pos(&graph, "a"), (0.0, 0.0));

        let ids = edge_ids(&graph);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a-b"));
        assert!(ids.contains(&"b-c"));
    }

    #[test]
    fn parent_centers_over_children() {
        let graph = layout(
            &[
                item("p", None),
                item("l", Some("p")),
                item("m", Some("p")),
                item("r", Some("p")),
            ],
            &[],
        );
        assert_eq!(pos(&graph, "l"), (0.0, 160.0));
        assert_eq!(pos(&graph, "m"), (220.0, 160.0));
        assert_eq!(pos(&graph, "r"), (440.0, 160.0));
        assert_eq!(pos(&graph, "p"), (220.0, 0.0));
    }

    #[test]
    fn trees_are_separated_by_double_gap() {
        let graph = layout(&[item("a", None), item("b", None)], &[]);
        // a takes 0, cursor moves to 220, then +440 between trees
        assert_eq!(pos(&graph, "a"), (0.0, 0.0));
        assert_eq!(pos(&graph, "b"), (660.0, 0.0));
    }

    #[test]
    fn children_are_emitted_before_parents() {
        let graph = layout(&[item("a", None), item("b", Some("a"))], &[]);
        let order: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(graph.node("b").unwrap().data.parent.as_deref(), Some("a"));
        assert_eq!(graph.node("a").unwrap().data.parent, None);
    }

    #[test]
    fn node_data_is_enriched() {
        let mut kali = item("kali", None);
        kali.purpose = Some("Offensive lab".into());
        kali.ip = Some("10.10.10.5".into());
        let tree = build_infra_tree(&[kali]);
        let mut presentation = Presentation::default();
        presentation.status.insert("kali".into(), NodeStatus::Down);

        let graph = tree_to_flow(&tree, &[], &presentation).unwrap();
        let node = graph.node("kali").unwrap();
        assert_eq!(node.node_type, "infra");
        assert_eq!(node.data.label, "kali name");
        assert_eq!(node.data.role.as_deref(), Some("Offensive lab"));
        assert_eq!(node.data.icon, "terminal");
        assert_eq!(node.data.status, NodeStatus::Down);
        assert_eq!(node.data.ip.as_deref(), Some("10.10.10.5"));
    }

    #[test]
    fn connection_to_missing_node_is_dropped() {
        let graph = layout(
            &[item("a", None)],
            &[Connection {
                from: "a".into(),
                to: "z".into(),
                label: "ssh".into(),
            }],
        );
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn connection_edges_carry_labels() {
        let graph = layout(
            &[item("a", None), item("b", None)],
            &[Connection {
                from: "a".into(),
                to: "b".into(),
                label: "ssh".into(),
            }],
        );
        assert_eq!(graph.edges.len(), 1);
        let edge = &graph.edges[0];
        assert_eq!(edge.id, "link-a-b");
        assert_eq!(edge.kind, EdgeKind::Connection);
        assert_eq!(edge.label.as_deref(), Some("ssh"));
        assert!(edge.animated);
    }

    #[test]
    fn custom_gaps_are_honoured() {
        let tree = build_infra_tree(&[item("a", None), item("b", Some("a")), item("c", Some("a"))]);
        let presentation = Presentation::default();
        let graph = LayoutEngine::new(&presentation)
            .with_config(LayoutConfig {
                x_gap: 100.0,
                y_gap: 50.0,
            })
            .layout(&tree, &[])
            .unwrap();
        assert_eq!(pos(&graph, "c"), (100.0, 50.0));
        assert_eq!(pos(&graph, "a"), (50.0, 0.0));
    }

    #[test]
    fn subtree_layout_starts_at_given_cursor() {
        let tree = build_infra_tree(&[item("a", None), item("b", Some("a")), item("c", Some("b"))]);
        let presentation = Presentation::default();
        let b = tree.find("b").unwrap();
        let mut cursor = Cursor::starting_at(1000.0);

        let graph = LayoutEngine::new(&presentation)
            .layout_subtree(&tree, b, &mut cursor)
            .unwrap();
        assert_eq!(pos(&graph, "b"), (1000.0, 0.0));
        assert_eq!(pos(&graph, "c"), (1000.0, 160.0));
        assert_eq!(edge_ids(&graph), vec!["b-c"]);
        assert_eq!(cursor.x(), 1220.0);
    }

    #[test]
    fn manual_cycle_is_reported() {
        let mut tree = InfraTree::new();
        let a = tree.add(item("a", None));
        let b = tree.add(item("b", None));
        tree.push_root(a);
        tree.attach(a, b);
        tree.attach(b, a);

        let err = tree_to_flow(&tree, &[], &Presentation::default()).unwrap_err();
        match err {
            LabError::CyclicTopology { path } => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn shared_child_is_reported() {
        let mut tree = InfraTree::new();
        let a = tree.add(item("a", None));
        let b = tree.add(item("b", None));
        let c = tree.add(item("c", None));
        tree.push_root(a);
        tree.push_root(b);
        tree.attach(a, c);
        tree.attach(b, c);

        let err = tree_to_flow(&tree, &[], &Presentation::default()).unwrap_err();
        assert!(matches!(err, LabError::SharedNode { id } if id == "c"));
    }

    #[test]
    fn parent_loop_in_records_is_reported() {
        let tree = build_infra_tree(&[item("root", None), item("a", Some("b")), item("b", Some("a"))]);
        let err = tree_to_flow(&tree, &[], &Presentation::default()).unwrap_err();
        assert!(matches!(err, LabError::CyclicTopology { .. }));
        assert!(err.to_string().starts_with("cyclic topology: "));
    }

    #[test]
    fn self_parent_is_reported() {
        let tree = build_infra_tree(&[item("a", Some("a"))]);
        let err = tree_to_flow(&tree, &[], &Presentation::default()).unwrap_err();
        match err {
            LabError::CyclicTopology { path } => assert_eq!(path, vec!["a", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn very_deep_chain_does_not_overflow() {
        let mut items = vec![item("n0", None)];
        for i in 1..50_000 {
            items.push(item(&format!("n{i}"), Some(&format!("n{}", i - 1))));
        }
        let graph = layout(&items, &[]);
        assert_eq!(graph.nodes.len(), 50_000);
        assert_eq!(pos(&graph, "n49999"), (0.0, 49_999.0 * 160.0));
    }
}
