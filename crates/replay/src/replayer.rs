use core_types::NodeId;
use snapshot::{
    AddedNode, AttributeChange, Event, EventData, IncrementalData, NodeKind, PatchBatch,
    RemovedNode, SnapshotNode, TextChange,
};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum ReplayError {
    /// A patch arrived before any checkpoint.
    NoCheckpoint,
    UnknownId(NodeId),
    DuplicateId(NodeId),
    WrongNodeKind(NodeId),
    InvalidParent(NodeId),
    NotAChild { parent: NodeId, child: NodeId },
    InvalidSibling { parent: NodeId, next: NodeId },
    CycleDetected { parent: NodeId, child: NodeId },
    MissingRoot,
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::NoCheckpoint => f.write_str("patch before the first checkpoint"),
            ReplayError::UnknownId(id) => write!(f, "unknown node {id}"),
            ReplayError::DuplicateId(id) => write!(f, "node {id} already exists"),
            ReplayError::WrongNodeKind(id) => write!(f, "node {id} has the wrong kind"),
            ReplayError::InvalidParent(id) => write!(f, "node {id} cannot have children"),
            ReplayError::NotAChild { parent, child } => {
                write!(f, "node {child} is not a child of {parent}")
            }
            ReplayError::InvalidSibling { parent, next } => {
                write!(f, "next sibling {next} is not a child of {parent}")
            }
            ReplayError::CycleDetected { parent, child } => {
                write!(f, "inserting {child} under {parent} creates a cycle")
            }
            ReplayError::MissingRoot => f.write_str("no root node"),
        }
    }
}

impl std::error::Error for ReplayError {}

/// Rebuilds the recorded tree from the event log.
///
/// Application is strict: every id a patch refers to must be known when the
/// entry is applied, so a log that replays without error has no dangling
/// references.
#[derive(Debug, Default)]
pub struct Replayer {
    arena: ReplayArena,
    root: Option<NodeId>,
    href: Option<String>,
    viewport: (u32, u32),
    generation: u32,
    scroll: HashMap<NodeId, (f64, f64)>,
    applied: usize,
}

impl Replayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_event(&mut self, event: &Event) -> Result<(), ReplayError> {
        match &event.data {
            EventData::Meta {
                href,
                width,
                height,
            } => {
                self.href = Some(href.clone());
                self.viewport = (*width, *height);
            }
            EventData::FullSnapshot {
                node, generation, ..
            } => {
                self.apply_checkpoint(node)?;
                self.generation = *generation;
            }
            EventData::Incremental(data) => self.apply_incremental(data)?,
            EventData::Custom { .. } => {}
        }
        self.applied += 1;
        Ok(())
    }

    pub fn apply_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> Result<(), ReplayError> {
        for event in events {
            self.apply_event(event)?;
        }
        Ok(())
    }

    /// Replace the whole tree.
    pub fn apply_checkpoint(&mut self, node: &SnapshotNode) -> Result<(), ReplayError> {
        self.arena = ReplayArena::default();
        self.scroll.clear();
        self.arena.insert_subtree(node, None)?;
        self.root = Some(node.id);
        log::trace!(target: "replay", "checkpoint with {} nodes", self.arena.nodes.len());
        Ok(())
    }

    /// Apply the four lists in order: texts, attributes, removes, adds.
    pub fn apply_patch(&mut self, batch: &PatchBatch) -> Result<(), ReplayError> {
        if self.root.is_none() {
            return Err(ReplayError::NoCheckpoint);
        }
        for TextChange { id, value } in &batch.texts {
            self.arena.set_text(*id, value)?;
        }
        for AttributeChange { id, attributes } in &batch.attributes {
            self.arena.set_attributes(*id, attributes)?;
        }
        for RemovedNode { parent_id, id, .. } in &batch.removes {
            self.arena.remove_child(*parent_id, *id)?;
            self.scroll.retain(|k, _| self.arena.nodes.contains_key(k));
        }
        for AddedNode {
            parent_id,
            next_id,
            node,
        } in &batch.adds
        {
            self.arena.insert_child(*parent_id, *next_id, node)?;
        }
        Ok(())
    }

    fn apply_incremental(&mut self, data: &IncrementalData) -> Result<(), ReplayError> {
        match data {
            IncrementalData::Mutation(batch) => self.apply_patch(batch),
            IncrementalData::Scroll { id, x, y } => {
                self.arena.get(*id)?;
                self.scroll.insert(*id, (*x, *y));
                Ok(())
            }
            IncrementalData::Input {
                id,
                text,
                is_checked,
            } => self.arena.apply_input(*id, text, *is_checked),
            IncrementalData::ViewportResize { width, height } => {
                self.viewport = (*width, *height);
                Ok(())
            }
            IncrementalData::Pointer { id, .. }
            | IncrementalData::StyleSheetRule { id, .. }
            | IncrementalData::CanvasMutation { id, .. } => self.arena.get(*id).map(|_| ()),
        }
    }

    pub fn href(&self) -> Option<&str> {
        self.href.as_deref()
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn events_applied(&self) -> usize {
        self.applied
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.arena.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.nodes.is_empty()
    }

    pub fn scroll_of(&self, id: NodeId) -> Option<(f64, f64)> {
        self.scroll.get(&id).copied()
    }

    pub fn materialize(&self) -> Result<SnapshotNode, ReplayError> {
        let root = self.root.ok_or(ReplayError::MissingRoot)?;
        self.arena.materialize(root)
    }
}

/// Replay a whole log and return the final tree.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Result<SnapshotNode, ReplayError> {
    let mut replayer = Replayer::new();
    replayer.apply_all(events)?;
    replayer.materialize()
}

#[derive(Debug)]
struct ReplayNode {
    // Children live in `children`; the kind's own child list stays empty.
    kind: NodeKind,
    root_id: Option<NodeId>,
    is_shadow: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl ReplayNode {
    fn allows_children(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Document { .. } | NodeKind::Element { .. }
        )
    }
}

#[derive(Debug, Default)]
struct ReplayArena {
    nodes: HashMap<NodeId, ReplayNode>,
}

impl ReplayArena {
    fn get(&self, id: NodeId) -> Result<&ReplayNode, ReplayError> {
        self.nodes.get(&id).ok_or(ReplayError::UnknownId(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut ReplayNode, ReplayError> {
        self.nodes.get_mut(&id).ok_or(ReplayError::UnknownId(id))
    }

    fn insert_subtree(
        &mut self,
        node: &SnapshotNode,
        parent: Option<NodeId>,
    ) -> Result<(), ReplayError> {
        if self.nodes.contains_key(&node.id) {
            return Err(ReplayError::DuplicateId(node.id));
        }
        let mut kind = node.kind.clone();
        if let Some(children) = kind_children_mut(&mut kind) {
            children.clear();
        }
        self.nodes.insert(
            node.id,
            ReplayNode {
                kind,
                root_id: node.root_id,
                is_shadow: node.is_shadow,
                parent,
                children: node.children().iter().map(|c| c.id).collect(),
            },
        );
        for child in node.children() {
            self.insert_subtree(child, Some(node.id))?;
        }
        Ok(())
    }

    fn insert_child(
        &mut self,
        parent: NodeId,
        next: Option<NodeId>,
        node: &SnapshotNode,
    ) -> Result<(), ReplayError> {
        if !self.get(parent)?.allows_children() {
            return Err(ReplayError::InvalidParent(parent));
        }
        if node.ids().contains(&parent) {
            return Err(ReplayError::CycleDetected {
                parent,
                child: node.id,
            });
        }
        let position = match next {
            Some(next) => {
                let siblings = &self.get(parent)?.children;
                Some(
                    siblings
                        .iter()
                        .position(|c| *c == next)
                        .ok_or(ReplayError::InvalidSibling { parent, next })?,
                )
            }
            // Appended light children still precede the host's shadow children.
            None if !node.is_shadow => self
                .get(parent)?
                .children
                .iter()
                .position(|c| self.nodes.get(c).is_some_and(|n| n.is_shadow)),
            None => None,
        };
        self.insert_subtree(node, Some(parent))?;
        let siblings = &mut self.get_mut(parent)?.children;
        match position {
            Some(at) => siblings.insert(at, node.id),
            None => siblings.push(node.id),
        }
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ReplayError> {
        if self.get(child)?.parent != Some(parent) {
            return Err(ReplayError::NotAChild { parent, child });
        }
        self.get_mut(parent)?.children.retain(|c| *c != child);
        self.drop_subtree(child);
        Ok(())
    }

    fn drop_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.drop_subtree(child);
            }
        }
    }

    fn set_text(&mut self, id: NodeId, value: &str) -> Result<(), ReplayError> {
        match &mut self.get_mut(id)?.kind {
            NodeKind::Text { text, .. } | NodeKind::CData { text } | NodeKind::Comment { text } => {
                text.clear();
                text.push_str(value);
                Ok(())
            }
            _ => Err(ReplayError::WrongNodeKind(id)),
        }
    }

    fn set_attributes(
        &mut self,
        id: NodeId,
        changes: &std::collections::BTreeMap<String, Option<String>>,
    ) -> Result<(), ReplayError> {
        let NodeKind::Element { attributes, .. } = &mut self.get_mut(id)?.kind else {
            return Err(ReplayError::WrongNodeKind(id));
        };
        for (name, value) in changes {
            match value {
                Some(value) => attributes.insert(name.clone(), value.clone()),
                None => attributes.remove(name),
            };
        }
        Ok(())
    }

    fn apply_input(&mut self, id: NodeId, text: &str, is_checked: bool) -> Result<(), ReplayError> {
        let NodeKind::Element {
            tag, attributes, ..
        } = &mut self.get_mut(id)?.kind
        else {
            return Err(ReplayError::WrongNodeKind(id));
        };
        let kind = attributes
            .get("type")
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_else(|| tag.clone());
        if kind == "radio" || kind == "checkbox" {
            if is_checked {
                attributes.insert("checked".to_string(), "true".to_string());
            } else {
                attributes.remove("checked");
            }
        }
        if !matches!(kind.as_str(), "radio" | "checkbox" | "submit" | "button") {
            if text.is_empty() {
                attributes.remove("value");
            } else {
                attributes.insert("value".to_string(), text.to_string());
            }
        }
        Ok(())
    }

    fn materialize(&self, id: NodeId) -> Result<SnapshotNode, ReplayError> {
        let node = self.get(id)?;
        let mut kind = node.kind.clone();
        if let Some(children) = kind_children_mut(&mut kind) {
            for child in &node.children {
                children.push(self.materialize(*child)?);
            }
        }
        Ok(SnapshotNode {
            id,
            root_id: node.root_id,
            is_shadow: node.is_shadow,
            kind,
        })
    }
}

fn kind_children_mut(kind: &mut NodeKind) -> Option<&mut Vec<SnapshotNode>> {
    match kind {
        NodeKind::Document { children } | NodeKind::Element { children, .. } => Some(children),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Timestamp;
    use std::collections::BTreeMap;

    fn element(id: u32, tag: &str, children: Vec<SnapshotNode>) -> SnapshotNode {
        SnapshotNode::new(
            NodeId(id),
            NodeKind::Element {
                tag: tag.to_string(),
                attributes: BTreeMap::new(),
                children,
                is_svg: false,
                blocked: false,
            },
        )
    }

    fn text(id: u32, value: &str) -> SnapshotNode {
        SnapshotNode::new(
            NodeId(id),
            NodeKind::Text {
                text: value.to_string(),
                is_style: false,
            },
        )
    }

    fn checkpoint() -> SnapshotNode {
        SnapshotNode::new(
            NodeId(1),
            NodeKind::Document {
                children: vec![element(2, "div", vec![element(3, "span", vec![text(4, "hi")])])],
            },
        )
    }

    fn replayer() -> Replayer {
        let mut replayer = Replayer::new();
        replayer.apply_checkpoint(&checkpoint()).expect("checkpoint");
        replayer
    }

    #[test]
    fn checkpoint_materializes_unchanged() {
        let replayer = replayer();
        assert_eq!(replayer.materialize().expect("tree"), checkpoint());
        assert_eq!(replayer.len(), 4);
    }

    #[test]
    fn patch_lists_apply_in_order() {
        let mut replayer = replayer();
        let mut attrs = BTreeMap::new();
        attrs.insert("class".to_string(), Some("x".to_string()));
        let batch = PatchBatch {
            texts: vec![TextChange {
                id: NodeId(4),
                value: "bye".into(),
            }],
            attributes: vec![AttributeChange {
                id: NodeId(2),
                attributes: attrs,
            }],
            removes: vec![RemovedNode {
                parent_id: NodeId(2),
                id: NodeId(3),
                is_shadow: false,
            }],
            adds: vec![
                AddedNode {
                    parent_id: NodeId(2),
                    next_id: None,
                    node: element(5, "b", vec![text(6, "yo")]),
                },
                AddedNode {
                    parent_id: NodeId(2),
                    next_id: Some(NodeId(5)),
                    node: element(7, "i", vec![]),
                },
            ],
        };
        replayer.apply_patch(&batch).expect("patch");
        assert!(!replayer.contains(NodeId(3)));
        assert!(!replayer.contains(NodeId(4)));
        let tree = replayer.materialize().expect("tree");
        let div = tree.find(NodeId(2)).expect("div");
        assert_eq!(div.attribute("class"), Some("x"));
        let tags: Vec<_> = div.children().iter().filter_map(|c| c.tag()).collect();
        assert_eq!(tags, vec!["i", "b"]);
    }

    #[test]
    fn dangling_references_are_rejected() {
        let mut replayer = replayer();
        let add = |parent: u32, next: Option<u32>, id: u32| PatchBatch {
            adds: vec![AddedNode {
                parent_id: NodeId(parent),
                next_id: next.map(NodeId),
                node: element(id, "p", vec![]),
            }],
            ..PatchBatch::default()
        };
        assert_eq!(
            replayer.apply_patch(&add(99, None, 10)),
            Err(ReplayError::UnknownId(NodeId(99)))
        );
        assert_eq!(
            replayer.apply_patch(&add(2, Some(4), 10)),
            Err(ReplayError::InvalidSibling {
                parent: NodeId(2),
                next: NodeId(4),
            })
        );
        assert_eq!(
            replayer.apply_patch(&add(2, None, 3)),
            Err(ReplayError::DuplicateId(NodeId(3)))
        );
        assert_eq!(
            replayer.apply_patch(&add(4, None, 10)),
            Err(ReplayError::InvalidParent(NodeId(4)))
        );
    }

    #[test]
    fn removing_from_the_wrong_parent_fails() {
        let mut replayer = replayer();
        let batch = PatchBatch {
            removes: vec![RemovedNode {
                parent_id: NodeId(1),
                id: NodeId(3),
                is_shadow: false,
            }],
            ..PatchBatch::default()
        };
        assert_eq!(
            replayer.apply_patch(&batch),
            Err(ReplayError::NotAChild {
                parent: NodeId(1),
                child: NodeId(3),
            })
        );
    }

    #[test]
    fn patches_need_a_checkpoint() {
        let mut replayer = Replayer::new();
        assert_eq!(
            replayer.apply_patch(&PatchBatch::default()),
            Err(ReplayError::NoCheckpoint)
        );
        assert_eq!(replayer.materialize(), Err(ReplayError::MissingRoot));
    }

    #[test]
    fn events_drive_meta_scroll_and_input() {
        let mut input = element(5, "input", vec![]);
        if let NodeKind::Element { attributes, .. } = &mut input.kind {
            attributes.insert("type".into(), "text".into());
        }
        let events = vec![
            Event::new(
                Timestamp(0),
                EventData::Meta {
                    href: "https://example.com/".into(),
                    width: 800,
                    height: 600,
                },
            ),
            Event::new(
                Timestamp(0),
                EventData::FullSnapshot {
                    node: SnapshotNode::new(
                        NodeId(1),
                        NodeKind::Document {
                            children: vec![input],
                        },
                    ),
                    initial_offset: Default::default(),
                    generation: 1,
                },
            ),
            Event::new(
                Timestamp(5),
                EventData::Incremental(IncrementalData::Input {
                    id: NodeId(5),
                    text: "abc".into(),
                    is_checked: false,
                }),
            ),
            Event::new(
                Timestamp(6),
                EventData::Incremental(IncrementalData::Scroll {
                    id: NodeId(1),
                    x: 0.0,
                    y: 40.0,
                }),
            ),
        ];
        let mut replayer = Replayer::new();
        replayer.apply_all(&events).expect("replay");
        assert_eq!(replayer.href(), Some("https://example.com/"));
        assert_eq!(replayer.viewport(), (800, 600));
        assert_eq!(replayer.generation(), 1);
        assert_eq!(replayer.scroll_of(NodeId(1)), Some((0.0, 40.0)));
        let tree = replayer.materialize().expect("tree");
        assert_eq!(tree.find(NodeId(5)).and_then(|n| n.attribute("value")), Some("abc"));
        assert_eq!(replayer.events_applied(), 4);
    }

    #[test]
    fn event_log_survives_json() {
        let events = vec![Event::new(
            Timestamp(0),
            EventData::FullSnapshot {
                node: checkpoint(),
                initial_offset: Default::default(),
                generation: 1,
            },
        )];
        let json = serde_json::to_string(&events).expect("json");
        let back: Vec<Event> = serde_json::from_str(&json).expect("parse");
        assert_eq!(replay(&back).expect("tree"), checkpoint());
    }
}
