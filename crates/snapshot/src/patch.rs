use crate::node::SnapshotNode;
use core_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Changes collected over one flush cycle.
///
/// Readers apply the lists in field order: texts, attributes, removes, then
/// adds in list order. Every `parent_id`/`next_id` of an add is known to the
/// reader once the adds before it have been applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchBatch {
    pub texts: Vec<TextChange>,
    pub attributes: Vec<AttributeChange>,
    pub removes: Vec<RemovedNode>,
    pub adds: Vec<AddedNode>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    pub id: NodeId,
    pub value: String,
}

/// New attribute values of one element; `None` removes the attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub id: NodeId,
    pub attributes: BTreeMap<String, Option<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedNode {
    pub parent_id: NodeId,
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_shadow: bool,
}

/// Insert `node` under `parent_id`, before `next_id` (or at the end).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedNode {
    pub parent_id: NodeId,
    pub next_id: Option<NodeId>,
    pub node: SnapshotNode,
}

impl PatchBatch {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
            && self.attributes.is_empty()
            && self.removes.is_empty()
            && self.adds.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.texts.len() + self.attributes.len() + self.removes.len() + self.adds.len()
    }

    /// Ids of every node introduced by the adds, in emission order.
    pub fn added_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for add in &self.adds {
            add.node.walk(&mut |n| out.push(n.id));
        }
        out
    }
}
