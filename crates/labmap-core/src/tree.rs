//! Flat item list to forest.
//!
//! Nodes live in an arena; parents and children refer to each other by
//! index, so the rest of the crate never has to re-derive the hierarchy from
//! flattened output.

use std::collections::HashMap;

use tracing::warn;

use crate::InfraItem;

pub type NodeIx = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub item: InfraItem,
    pub parent: Option<NodeIx>,
    /// In record-store order.
    pub children: Vec<NodeIx>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfraTree {
    nodes: Vec<TreeNode>,
    roots: Vec<NodeIx>,
    promoted: Vec<NodeIx>,
}

impl InfraTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unattached node. It is neither a root nor anyone's child until
    /// `push_root` or `attach` is called.
    pub fn add(&mut self, item: InfraItem) -> NodeIx {
        self.nodes.push(TreeNode {
            item,
            parent: None,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn push_root(&mut self, ix: NodeIx) {
        self.roots.push(ix);
    }

    /// Append `child` to `parent`'s children. Nothing stops callers from
    /// building loops this way; the layout engine rejects them.
    pub fn attach(&mut self, parent: NodeIx, child: NodeIx) {
        self.nodes[parent].children.push(child);
        self.nodes[child].parent = Some(parent);
    }

    pub fn roots(&self) -> &[NodeIx] {
        &self.roots
    }

    /// Roots that only became roots because their parent id did not resolve.
    pub fn promoted(&self) -> &[NodeIx] {
        &self.promoted
    }

    pub fn node(&self, ix: NodeIx) -> &TreeNode {
        &self.nodes[ix]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<NodeIx> {
        self.nodes.iter().position(|n| n.item.id == id)
    }

    /// Ids of `ix` and everything below it, pre-order. Stops at nodes
    /// already seen, so loops cannot trap it.
    pub fn subtree_ids(&self, ix: NodeIx) -> Vec<&str> {
        let mut seen = vec![false; self.nodes.len()];
        let mut out = Vec::new();
        let mut stack = vec![ix];
        while let Some(cur) = stack.pop() {
            if std::mem::replace(&mut seen[cur], true) {
                continue;
            }
            out.push(self.nodes[cur].item.id.as_str());
            stack.extend(self.nodes[cur].children.iter().rev());
        }
        out
    }
}

/// Turn a flat, parent-referencing record list into a forest.
///
/// Children and roots keep input order. A `parent` that names no item makes
/// the item a root.
pub fn build_infra_tree(items: &[InfraItem]) -> InfraTree {
    let mut tree = InfraTree::new();
    let mut index: HashMap<&str, NodeIx> = HashMap::with_capacity(items.len());

    for item in items {
        if let Some(&ix) = index.get(item.id.as_str()) {
            warn!(
                id = %item.id,
                "duplicate item id, later record replaces the earlier one in place"
            );
            tree.nodes[ix].item = item.clone();
            continue;
        }
        let ix = tree.add(item.clone());
        index.insert(item.id.as_str(), ix);
    }

    for ix in 0..tree.len() {
        let mut dangling = false;
        let parent = match tree.node(ix).item.parent.as_deref() {
            Some(parent_id) => match index.get(parent_id) {
                Some(&parent_ix) => Some(parent_ix),
                None => {
                    warn!(
                        id = %tree.node(ix).item.id,
                        parent = parent_id,
                        "parent not found, treating item as a root"
                    );
                    dangling = true;
                    None
                }
            },
            None => None,
        };
        match parent {
            Some(parent_ix) => tree.attach(parent_ix, ix),
            None => tree.push_root(ix),
        }
        if dangling {
            tree.promoted.push(ix);
        }
    }

    tree
}
