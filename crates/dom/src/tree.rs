//! In-memory live document.
//!
//! `Dom` is an arena of nodes addressed by [`NodeRef`]. Nodes are never freed
//! while the arena lives; a removed node simply becomes detached. Structural
//! and attribute writes on connected nodes are reported to every observer
//! created with [`Dom::observe`].

use crate::host::{
    CanvasCapture, Doctype, HostError, HostTree, MediaState, NodeType, Rect, ScrollOffset,
    Viewport,
};
use crate::mutation::{MutationKind, MutationObserver, MutationRecord};
use std::borrow::Cow;
use std::fmt;
use std::sync::mpsc::Sender;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(u32);

impl NodeRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TreeError {
    WrongNodeKind(NodeRef),
    InvalidParent(NodeRef),
    InvalidChild(NodeRef),
    NotAChild { parent: NodeRef, child: NodeRef },
    CycleDetected { parent: NodeRef, child: NodeRef },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::WrongNodeKind(node) => write!(f, "node {node:?} has the wrong kind"),
            TreeError::InvalidParent(node) => write!(f, "node {node:?} cannot have children"),
            TreeError::InvalidChild(node) => write!(f, "node {node:?} cannot be inserted"),
            TreeError::NotAChild { parent, child } => {
                write!(f, "node {child:?} is not a child of {parent:?}")
            }
            TreeError::CycleDetected { parent, child } => {
                write!(f, "inserting {child:?} under {parent:?} would create a cycle")
            }
        }
    }
}

impl std::error::Error for TreeError {}

#[derive(Debug)]
struct NodeRecord {
    data: NodeData,
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
}

#[derive(Debug)]
enum NodeData {
    Document(DocumentData),
    Doctype {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element(Box<ElementData>),
    Text(String),
    CData(String),
    Comment(String),
    ShadowRoot {
        host: NodeRef,
    },
}

#[derive(Debug, Default)]
struct DocumentData {
    url: Option<String>,
    base: Option<String>,
    frame: Option<NodeRef>,
    viewport: Viewport,
}

#[derive(Debug, Default)]
struct ElementData {
    tag: String,
    attributes: Vec<(String, String)>,
    value: Option<String>,
    checked: Option<bool>,
    rect: Rect,
    scroll: Option<ScrollOffset>,
    shadow_root: Option<NodeRef>,
    frame: FrameContent,
    canvas: Option<Result<CanvasCapture, HostError>>,
    media: Option<MediaState>,
    stylesheet: Option<Result<Vec<String>, HostError>>,
}

#[derive(Debug, Default)]
enum FrameContent {
    #[default]
    Empty,
    Loaded(NodeRef),
    Denied,
}

const FORM_CONTROLS: [&str; 3] = ["input", "textarea", "select"];

#[derive(Debug, Default)]
pub struct Dom {
    nodes: Vec<NodeRecord>,
    main: Option<NodeRef>,
    observers: Vec<Sender<MutationRecord<NodeRef>>>,
}

impl Dom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start observing every connected node (subtree, attributes, character
    /// data and child lists, with old values).
    pub fn observe(&mut self) -> MutationObserver<NodeRef> {
        let (tx, observer) = MutationObserver::pair();
        self.observers.push(tx);
        observer
    }

    /// Top-level document: the first document created in this arena.
    pub fn document(&self) -> Option<NodeRef> {
        self.main
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn create_document(&mut self, url: Option<&str>) -> NodeRef {
        let node = self.push(NodeData::Document(DocumentData {
            url: url.map(str::to_string),
            viewport: Viewport {
                width: 1280,
                height: 720,
            },
            ..DocumentData::default()
        }));
        if self.main.is_none() {
            self.main = Some(node);
        }
        node
    }

    pub fn create_doctype(&mut self, name: &str, public_id: &str, system_id: &str) -> NodeRef {
        self.push(NodeData::Doctype {
            name: name.to_string(),
            public_id: public_id.to_string(),
            system_id: system_id.to_string(),
        })
    }

    pub fn create_element(&mut self, tag: &str) -> NodeRef {
        self.push(NodeData::Element(Box::new(ElementData {
            tag: tag.to_ascii_lowercase(),
            ..ElementData::default()
        })))
    }

    pub fn create_text(&mut self, text: &str) -> NodeRef {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeRef {
        self.push(NodeData::Comment(text.to_string()))
    }

    pub fn create_cdata(&mut self, text: &str) -> NodeRef {
        self.push(NodeData::CData(text.to_string()))
    }

    pub fn append_child(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), TreeError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (or at the end). A child that already
    /// has a parent is detached first, which is reported as a separate removal.
    pub fn insert_before(
        &mut self,
        parent: NodeRef,
        child: NodeRef,
        reference: Option<NodeRef>,
    ) -> Result<(), TreeError> {
        if !self.node_type(parent).allows_children() {
            return Err(TreeError::InvalidParent(parent));
        }
        if matches!(
            self.node_type(child),
            NodeType::Document | NodeType::ShadowRoot
        ) {
            return Err(TreeError::InvalidChild(child));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(TreeError::CycleDetected { parent, child });
        }
        let mut reference = reference;
        if let Some(r) = reference {
            if self.nodes[r.index()].parent != Some(parent) {
                return Err(TreeError::NotAChild { parent, child: r });
            }
            if r == child {
                reference = self.next_sibling(child);
            }
        }

        self.detach(child);

        let siblings = &mut self.nodes[parent.index()].children;
        let pos = match reference {
            Some(r) => siblings
                .iter()
                .position(|n| *n == r)
                .ok_or(TreeError::NotAChild { parent, child: r })?,
            None => siblings.len(),
        };
        siblings.insert(pos, child);
        let previous = pos.checked_sub(1).map(|p| siblings[p]);
        let next = siblings.get(pos + 1).copied();
        self.nodes[child.index()].parent = Some(parent);
        self.notify(MutationRecord::added(parent, child, previous, next));
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), TreeError> {
        if self.nodes[child.index()].parent != Some(parent) {
            return Err(TreeError::NotAChild { parent, child });
        }
        self.detach(child);
        Ok(())
    }

    /// Detach `node` from its parent, if it has one.
    pub fn remove(&mut self, node: NodeRef) {
        self.detach(node);
    }

    pub fn set_attribute(&mut self, node: NodeRef, name: &str, value: &str) -> Result<(), TreeError> {
        let name = name.to_ascii_lowercase();
        let element = self.element_mut(node)?;
        let old = match element.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value.to_string())),
            None => {
                element.attributes.push((name.clone(), value.to_string()));
                None
            }
        };
        self.notify(MutationRecord::attributes(node, name, old));
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeRef, name: &str) -> Result<(), TreeError> {
        let name = name.to_ascii_lowercase();
        let element = self.element_mut(node)?;
        let Some(pos) = element.attributes.iter().position(|(k, _)| *k == name) else {
            return Ok(());
        };
        let (_, old) = element.attributes.remove(pos);
        self.notify(MutationRecord::attributes(node, name, Some(old)));
        Ok(())
    }

    pub fn set_character_data(&mut self, node: NodeRef, data: &str) -> Result<(), TreeError> {
        let old = match &mut self.nodes[node.index()].data {
            NodeData::Text(text) | NodeData::CData(text) | NodeData::Comment(text) => {
                std::mem::replace(text, data.to_string())
            }
            _ => return Err(TreeError::WrongNodeKind(node)),
        };
        self.notify(MutationRecord::character_data(node, Some(old)));
        Ok(())
    }

    /// Set the live value of a form control, as typing would. Reported as a
    /// `value` attribute notification.
    pub fn set_value(&mut self, node: NodeRef, value: &str) -> Result<(), TreeError> {
        if !self.is_form_control(node) {
            return Err(TreeError::WrongNodeKind(node));
        }
        let old = self.form_value(node).map(Cow::into_owned);
        self.element_mut(node)?.value = Some(value.to_string());
        self.notify(MutationRecord::attributes(node, "value", old));
        Ok(())
    }

    pub fn set_checked(&mut self, node: NodeRef, checked: bool) -> Result<(), TreeError> {
        if !self.is_element_named(node, "input") {
            return Err(TreeError::WrongNodeKind(node));
        }
        let old = self.is_checked(node).then(|| "true".to_string());
        self.element_mut(node)?.checked = Some(checked);
        self.notify(MutationRecord::attributes(node, "checked", old));
        Ok(())
    }

    pub fn attach_shadow(&mut self, host: NodeRef) -> Result<NodeRef, TreeError> {
        if let Some(existing) = self.element(host).and_then(|e| e.shadow_root) {
            return Ok(existing);
        }
        self.element_mut(host)?;
        let root = self.push(NodeData::ShadowRoot { host });
        self.element_mut(host)?.shadow_root = Some(root);
        Ok(root)
    }

    /// Navigate a frame element to a fresh, same-origin document.
    pub fn load_frame(&mut self, frame: NodeRef, url: Option<&str>) -> Result<NodeRef, TreeError> {
        if !self.is_frame(frame) {
            return Err(TreeError::WrongNodeKind(frame));
        }
        let document = self.push(NodeData::Document(DocumentData {
            url: url.map(str::to_string),
            frame: Some(frame),
            viewport: Viewport {
                width: 300,
                height: 150,
            },
            ..DocumentData::default()
        }));
        let previous = std::mem::replace(
            &mut self.element_mut(frame)?.frame,
            FrameContent::Loaded(document),
        );
        let mut removed = Vec::new();
        if let FrameContent::Loaded(old) = previous {
            if let NodeData::Document(data) = &mut self.nodes[old.index()].data {
                data.frame = None;
            }
            removed.push(old);
        }
        self.notify(MutationRecord {
            target: frame,
            kind: MutationKind::ChildList {
                added: vec![document],
                removed,
                previous_sibling: None,
                next_sibling: None,
            },
        });
        Ok(document)
    }

    /// Make the frame's content unreadable, as a cross-origin navigation would.
    pub fn deny_frame_access(&mut self, frame: NodeRef) -> Result<(), TreeError> {
        if !self.is_frame(frame) {
            return Err(TreeError::WrongNodeKind(frame));
        }
        self.element_mut(frame)?.frame = FrameContent::Denied;
        Ok(())
    }

    pub fn set_bounding_box(&mut self, node: NodeRef, rect: Rect) -> Result<(), TreeError> {
        self.element_mut(node)?.rect = rect;
        Ok(())
    }

    pub fn set_scroll_offset(&mut self, node: NodeRef, offset: ScrollOffset) -> Result<(), TreeError> {
        self.element_mut(node)?.scroll = Some(offset);
        Ok(())
    }

    pub fn set_viewport(&mut self, document: NodeRef, viewport: Viewport) -> Result<(), TreeError> {
        self.document_mut(document)?.viewport = viewport;
        Ok(())
    }

    pub fn set_base_url(&mut self, document: NodeRef, base: &str) -> Result<(), TreeError> {
        self.document_mut(document)?.base = Some(base.to_string());
        Ok(())
    }

    pub fn set_canvas(
        &mut self,
        node: NodeRef,
        capture: Result<CanvasCapture, HostError>,
    ) -> Result<(), TreeError> {
        self.element_mut(node)?.canvas = Some(capture);
        Ok(())
    }

    pub fn set_media_state(&mut self, node: NodeRef, state: MediaState) -> Result<(), TreeError> {
        self.element_mut(node)?.media = Some(state);
        Ok(())
    }

    pub fn set_stylesheet_rules(
        &mut self,
        node: NodeRef,
        rules: Result<Vec<String>, HostError>,
    ) -> Result<(), TreeError> {
        self.element_mut(node)?.stylesheet = Some(rules);
        Ok(())
    }

    /// Link without validation or notification; only for freshly built nodes.
    pub(crate) fn link(&mut self, parent: NodeRef, child: NodeRef) {
        self.nodes[parent.index()].children.push(child);
        self.nodes[child.index()].parent = Some(parent);
    }

    fn push(&mut self, data: NodeData) -> NodeRef {
        let node = NodeRef(self.nodes.len() as u32);
        self.nodes.push(NodeRecord {
            data,
            parent: None,
            children: Vec::new(),
        });
        node
    }

    fn detach(&mut self, child: NodeRef) {
        let Some(parent) = self.nodes[child.index()].parent.take() else {
            return;
        };
        let siblings = &mut self.nodes[parent.index()].children;
        let Some(pos) = siblings.iter().position(|n| *n == child) else {
            return;
        };
        siblings.remove(pos);
        let previous = pos.checked_sub(1).map(|p| siblings[p]);
        let next = siblings.get(pos).copied();
        self.notify(MutationRecord::removed(parent, child, previous, next));
    }

    fn notify(&mut self, record: MutationRecord<NodeRef>) {
        if self.observers.is_empty() || !self.is_connected(record.target) {
            return;
        }
        self.observers.retain(|tx| tx.send(record.clone()).is_ok());
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeRef, node: NodeRef) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.nodes[n.index()].parent;
        }
        false
    }

    fn element(&self, node: NodeRef) -> Option<&ElementData> {
        match &self.nodes.get(node.index())?.data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node: NodeRef) -> Result<&mut ElementData, TreeError> {
        match self.nodes.get_mut(node.index()).map(|r| &mut r.data) {
            Some(NodeData::Element(element)) => Ok(element),
            _ => Err(TreeError::WrongNodeKind(node)),
        }
    }

    fn document_data(&self, node: NodeRef) -> Option<&DocumentData> {
        match &self.nodes.get(node.index())?.data {
            NodeData::Document(data) => Some(data),
            _ => None,
        }
    }

    fn document_mut(&mut self, node: NodeRef) -> Result<&mut DocumentData, TreeError> {
        match self.nodes.get_mut(node.index()).map(|r| &mut r.data) {
            Some(NodeData::Document(data)) => Ok(data),
            _ => Err(TreeError::WrongNodeKind(node)),
        }
    }

    fn is_form_control(&self, node: NodeRef) -> bool {
        self.element(node)
            .is_some_and(|e| FORM_CONTROLS.contains(&e.tag.as_str()))
    }

    fn is_frame(&self, node: NodeRef) -> bool {
        self.element(node)
            .is_some_and(|e| e.tag == "iframe" || e.tag == "frame")
    }

    fn text_children(&self, node: NodeRef) -> String {
        let mut out = String::new();
        for child in &self.nodes[node.index()].children {
            if let NodeData::Text(text) = &self.nodes[child.index()].data {
                out.push_str(text);
            }
        }
        out
    }
}

impl HostTree for Dom {
    type Node = NodeRef;

    fn node_type(&self, node: NodeRef) -> NodeType {
        match &self.nodes[node.index()].data {
            NodeData::Document(_) => NodeType::Document,
            NodeData::Doctype { .. } => NodeType::DocumentType,
            NodeData::Element(_) => NodeType::Element,
            NodeData::Text(_) => NodeType::Text,
            NodeData::CData(_) => NodeType::CData,
            NodeData::Comment(_) => NodeType::Comment,
            NodeData::ShadowRoot { .. } => NodeType::ShadowRoot,
        }
    }

    fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.nodes.get(node.index())?.parent
    }

    fn children(&self, node: NodeRef) -> &[NodeRef] {
        self.nodes
            .get(node.index())
            .map(|r| r.children.as_slice())
            .unwrap_or(&[])
    }

    fn tag_name(&self, node: NodeRef) -> Option<&str> {
        self.element(node).map(|e| e.tag.as_str())
    }

    fn attributes(&self, node: NodeRef) -> &[(String, String)] {
        self.element(node)
            .map(|e| e.attributes.as_slice())
            .unwrap_or(&[])
    }

    fn character_data(&self, node: NodeRef) -> Option<&str> {
        match &self.nodes.get(node.index())?.data {
            NodeData::Text(text) | NodeData::CData(text) | NodeData::Comment(text) => Some(text),
            _ => None,
        }
    }

    fn doctype(&self, node: NodeRef) -> Option<Doctype<'_>> {
        match &self.nodes.get(node.index())?.data {
            NodeData::Doctype {
                name,
                public_id,
                system_id,
            } => Some(Doctype {
                name,
                public_id,
                system_id,
            }),
            _ => None,
        }
    }

    fn shadow_root(&self, host: NodeRef) -> Option<NodeRef> {
        self.element(host).and_then(|e| e.shadow_root)
    }

    fn shadow_host(&self, root: NodeRef) -> Option<NodeRef> {
        match &self.nodes.get(root.index())?.data {
            NodeData::ShadowRoot { host } => Some(*host),
            _ => None,
        }
    }

    fn content_document(&self, frame: NodeRef) -> Result<Option<NodeRef>, HostError> {
        match self.element(frame).map(|e| &e.frame) {
            Some(FrameContent::Loaded(document)) => Ok(Some(*document)),
            Some(FrameContent::Denied) => Err(HostError::CrossOrigin),
            Some(FrameContent::Empty) | None => Ok(None),
        }
    }

    fn frame_element(&self, document: NodeRef) -> Option<NodeRef> {
        self.document_data(document).and_then(|d| d.frame)
    }

    fn owner_document(&self, node: NodeRef) -> Option<NodeRef> {
        let mut current = node;
        loop {
            match &self.nodes.get(current.index())?.data {
                NodeData::Document(_) => return Some(current),
                NodeData::ShadowRoot { host } => current = *host,
                _ => current = self.nodes[current.index()].parent?,
            }
        }
    }

    fn is_connected(&self, node: NodeRef) -> bool {
        let mut current = node;
        loop {
            let Some(record) = self.nodes.get(current.index()) else {
                return false;
            };
            if let Some(parent) = record.parent {
                current = parent;
                continue;
            }
            match &record.data {
                NodeData::Document(_) if self.main == Some(current) => return true,
                NodeData::Document(data) => match data.frame {
                    Some(frame) => current = frame,
                    None => return false,
                },
                NodeData::ShadowRoot { host } => current = *host,
                _ => return false,
            }
        }
    }

    fn document_url(&self, document: NodeRef) -> Option<&str> {
        self.document_data(document).and_then(|d| d.url.as_deref())
    }

    fn base_url(&self, document: NodeRef) -> Option<&str> {
        let data = self.document_data(document)?;
        data.base.as_deref().or(data.url.as_deref())
    }

    fn viewport(&self, document: NodeRef) -> Viewport {
        self.document_data(document)
            .map(|d| d.viewport)
            .unwrap_or_default()
    }

    fn scroll_offset(&self, node: NodeRef) -> Option<ScrollOffset> {
        self.element(node).and_then(|e| e.scroll)
    }

    fn form_value(&self, node: NodeRef) -> Option<Cow<'_, str>> {
        let element = self.element(node)?;
        if !FORM_CONTROLS.contains(&element.tag.as_str()) {
            return None;
        }
        if let Some(value) = &element.value {
            return Some(Cow::Borrowed(value));
        }
        if element.tag == "textarea" {
            return Some(Cow::Owned(self.text_children(node)));
        }
        self.attribute(node, "value").map(Cow::Borrowed)
    }

    fn is_checked(&self, node: NodeRef) -> bool {
        match self.element(node) {
            Some(element) => element
                .checked
                .unwrap_or_else(|| element.attributes.iter().any(|(k, _)| k == "checked")),
            None => false,
        }
    }

    fn bounding_box(&self, node: NodeRef) -> Rect {
        self.element(node).map(|e| e.rect).unwrap_or_default()
    }

    fn canvas_capture(&self, node: NodeRef) -> Result<Option<CanvasCapture>, HostError> {
        match self.element(node).and_then(|e| e.canvas.as_ref()) {
            Some(Ok(capture)) => Ok(Some(capture.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(None),
        }
    }

    fn media_state(&self, node: NodeRef) -> Result<Option<MediaState>, HostError> {
        Ok(self.element(node).and_then(|e| e.media))
    }

    fn stylesheet_rules(&self, node: NodeRef) -> Result<Option<Vec<String>>, HostError> {
        match self.element(node).and_then(|e| e.stylesheet.as_ref()) {
            Some(Ok(rules)) => Ok(Some(rules.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(None),
        }
    }
}
