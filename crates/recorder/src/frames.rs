//! Id translation for frames recorded by their own recorder.
//!
//! A cross-origin frame cannot be read from the embedding page, so its
//! content arrives as a second event stream with its own id space. Every
//! remote id is given a fresh local id the first time it appears; after
//! that the mapping is stable until the frame sends a new checkpoint.

use core_types::NodeId;
use snapshot::{
    AddedNode, AttributeChange, IncrementalData, PatchBatch, RemovedNode, SnapshotNode, TextChange,
};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct FrameRemap {
    ids: HashMap<NodeId, NodeId>,
    document: Option<NodeId>,
}

impl FrameRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local id of the frame's current document.
    pub fn document(&self) -> Option<NodeId> {
        self.document
    }

    pub fn local(&self, remote: NodeId) -> Option<NodeId> {
        self.ids.get(&remote).copied()
    }

    /// Start over from a frame checkpoint: earlier mappings are dropped and
    /// the tree comes back in local ids, tagged as living in the frame
    /// document.
    pub fn adopt_checkpoint(
        &mut self,
        mut node: SnapshotNode,
        allocate: &mut impl FnMut() -> NodeId,
    ) -> SnapshotNode {
        self.ids.clear();
        self.map_new(&mut node, allocate);
        let document = node.id;
        node.root_id = None;
        if let Some(children) = node.children_mut() {
            for child in children {
                tag_root(child, document);
            }
        }
        self.document = Some(document);
        node
    }

    /// Rewrite a remote patch into local ids. Entries that refer to ids this
    /// frame never introduced are dropped.
    pub fn translate_batch(
        &mut self,
        batch: PatchBatch,
        allocate: &mut impl FnMut() -> NodeId,
    ) -> PatchBatch {
        let mut out = PatchBatch::default();
        for text in batch.texts {
            if let Some(id) = self.local(text.id) {
                out.texts.push(TextChange { id, ..text });
            }
        }
        for change in batch.attributes {
            if let Some(id) = self.local(change.id) {
                out.attributes.push(AttributeChange { id, ..change });
            }
        }
        for remove in batch.removes {
            if let (Some(parent_id), Some(id)) = (self.local(remove.parent_id), self.local(remove.id)) {
                out.removes.push(RemovedNode {
                    parent_id,
                    id,
                    ..remove
                });
            }
        }
        for add in batch.adds {
            let Some(parent_id) = self.local(add.parent_id) else {
                log::debug!(target: "recorder.frames", "frame add under unknown parent {}", add.parent_id);
                continue;
            };
            let next_id = match add.next_id {
                Some(next) => match self.local(next) {
                    Some(id) => Some(id),
                    None => {
                        log::debug!(target: "recorder.frames", "frame add before unknown sibling {next}");
                        continue;
                    }
                },
                None => None,
            };
            let mut node = add.node;
            self.map_new(&mut node, allocate);
            if let Some(document) = self.document {
                tag_root(&mut node, document);
            }
            out.adds.push(AddedNode {
                parent_id,
                next_id,
                node,
            });
        }
        out
    }

    /// Rewrite a remote non-mutation event. Events about unknown nodes and
    /// the frame's own viewport changes are dropped.
    pub fn translate_incremental(&self, data: IncrementalData) -> Option<IncrementalData> {
        let translated = match data {
            IncrementalData::Pointer { kind, id, x, y } => IncrementalData::Pointer {
                kind,
                id: self.local(id)?,
                x,
                y,
            },
            IncrementalData::Scroll { id, x, y } => IncrementalData::Scroll {
                id: self.local(id)?,
                x,
                y,
            },
            IncrementalData::Input {
                id,
                text,
                is_checked,
            } => IncrementalData::Input {
                id: self.local(id)?,
                text,
                is_checked,
            },
            IncrementalData::StyleSheetRule { id, change } => IncrementalData::StyleSheetRule {
                id: self.local(id)?,
                change,
            },
            IncrementalData::CanvasMutation { id, property, args } => {
                IncrementalData::CanvasMutation {
                    id: self.local(id)?,
                    property,
                    args,
                }
            }
            IncrementalData::ViewportResize { .. } | IncrementalData::Mutation(_) => return None,
        };
        Some(translated)
    }

    fn map_new(&mut self, node: &mut SnapshotNode, allocate: &mut impl FnMut() -> NodeId) {
        let ids = &mut self.ids;
        node.remap_ids(&mut |remote| *ids.entry(remote).or_insert_with(&mut *allocate));
    }
}

fn tag_root(node: &mut SnapshotNode, document: NodeId) {
    if node.root_id.is_none() {
        node.root_id = Some(document);
    }
    if let Some(children) = node.children_mut() {
        for child in children {
            tag_root(child, document);
        }
    }
}
