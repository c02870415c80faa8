use core_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One node of a serialized tree.
///
/// `root_id` is set for nodes that live inside a nested (frame) document and
/// names that document; `is_shadow` marks direct children of a shadow root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_shadow: bool,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Document {
        children: Vec<SnapshotNode>,
    },
    DocumentType {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
        children: Vec<SnapshotNode>,
        #[serde(default, skip_serializing_if = "is_false")]
        is_svg: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        blocked: bool,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "is_false")]
        is_style: bool,
    },
    #[serde(rename = "cdata")]
    CData {
        text: String,
    },
    Comment {
        text: String,
    },
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl SnapshotNode {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            root_id: None,
            is_shadow: false,
            kind,
        }
    }

    pub fn children(&self) -> &[SnapshotNode] {
        match &self.kind {
            NodeKind::Document { children } | NodeKind::Element { children, .. } => children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<SnapshotNode>> {
        match &mut self.kind {
            NodeKind::Document { children } | NodeKind::Element { children, .. } => {
                Some(children)
            }
            _ => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text { text, .. } | NodeKind::CData { text } | NodeKind::Comment { text } => {
                Some(text)
            }
            _ => None,
        }
    }

    /// Pre-order visit of this node and its descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a SnapshotNode)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    pub fn ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk(&mut |n| out.push(n.id));
        out
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    pub fn find(&self, id: NodeId) -> Option<&SnapshotNode> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(id))
    }

    /// Rewrite every id (and root id) in the subtree through `map`.
    pub fn remap_ids(&mut self, map: &mut impl FnMut(NodeId) -> NodeId) {
        self.id = map(self.id);
        self.root_id = self.root_id.map(&mut *map);
        if let Some(children) = self.children_mut() {
            for child in children {
                child.remap_ids(map);
            }
        }
    }
}
