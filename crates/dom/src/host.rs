//! Read-only view of a live document tree.
//!
//! The recorder never owns nodes: it holds whatever `Copy` handle the host
//! hands out and asks the host for structure and live state on demand.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::hash::Hash;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    Document,
    DocumentType,
    Element,
    Text,
    CData,
    Comment,
    ShadowRoot,
}

impl NodeType {
    pub fn allows_children(self) -> bool {
        matches!(self, Self::Document | Self::Element | Self::ShadowRoot)
    }

    pub fn is_character_data(self) -> bool {
        matches!(self, Self::Text | Self::CData | Self::Comment)
    }
}

/// Failure to read part of the live tree, e.g. a cross-origin frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostError {
    CrossOrigin,
    Tainted,
    Detached,
    Unsupported(&'static str),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::CrossOrigin => f.write_str("cross-origin access denied"),
            HostError::Tainted => f.write_str("resource is tainted"),
            HostError::Detached => f.write_str("node is detached"),
            HostError::Unsupported(what) => write!(f, "unsupported host read: {what}"),
        }
    }
}

impl std::error::Error for HostError {}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollOffset {
    pub left: f64,
    pub top: f64,
}

impl ScrollOffset {
    pub fn is_origin(self) -> bool {
        self.left == 0.0 && self.top == 0.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Pixel content of a canvas as the host exposes it.
#[derive(Clone, Debug, PartialEq)]
pub struct CanvasCapture {
    pub data_url: String,
    pub is_blank: bool,
}

/// Playback state of an audio/video element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MediaState {
    pub paused: bool,
    pub current_time: f64,
    pub playback_rate: f64,
    pub muted: bool,
    pub looping: bool,
    pub volume: f64,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            paused: true,
            current_time: 0.0,
            playback_rate: 1.0,
            muted: false,
            looping: false,
            volume: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Doctype<'a> {
    pub name: &'a str,
    pub public_id: &'a str,
    pub system_id: &'a str,
}

pub trait HostTree {
    type Node: Copy + Eq + Hash + fmt::Debug;

    fn node_type(&self, node: Self::Node) -> NodeType;

    /// Structural parent. Shadow roots and documents have none; see
    /// [`HostTree::composed_parent`] for the boundary-crossing walk.
    fn parent(&self, node: Self::Node) -> Option<Self::Node>;

    fn children(&self, node: Self::Node) -> &[Self::Node];

    /// Lowercase tag name for elements.
    fn tag_name(&self, node: Self::Node) -> Option<&str>;

    fn attributes(&self, node: Self::Node) -> &[(String, String)];

    /// Data of text, CDATA and comment nodes.
    fn character_data(&self, node: Self::Node) -> Option<&str>;

    fn doctype(&self, node: Self::Node) -> Option<Doctype<'_>>;

    fn shadow_root(&self, host: Self::Node) -> Option<Self::Node>;

    fn shadow_host(&self, root: Self::Node) -> Option<Self::Node>;

    /// Document loaded in a frame element. `Ok(None)` when nothing is loaded.
    fn content_document(&self, frame: Self::Node) -> Result<Option<Self::Node>, HostError>;

    /// Frame element hosting `document`, if it is a nested document.
    fn frame_element(&self, document: Self::Node) -> Option<Self::Node>;

    fn owner_document(&self, node: Self::Node) -> Option<Self::Node>;

    /// True when the node is reachable from the top-level document, crossing
    /// shadow and frame boundaries.
    fn is_connected(&self, node: Self::Node) -> bool;

    fn document_url(&self, document: Self::Node) -> Option<&str>;

    fn base_url(&self, document: Self::Node) -> Option<&str> {
        self.document_url(document)
    }

    fn viewport(&self, document: Self::Node) -> Viewport;

    fn scroll_offset(&self, node: Self::Node) -> Option<ScrollOffset>;

    /// Live value of a form control (which may differ from its attribute).
    fn form_value(&self, node: Self::Node) -> Option<Cow<'_, str>>;

    fn is_checked(&self, node: Self::Node) -> bool;

    fn bounding_box(&self, node: Self::Node) -> Rect;

    fn canvas_capture(&self, node: Self::Node) -> Result<Option<CanvasCapture>, HostError>;

    fn media_state(&self, node: Self::Node) -> Result<Option<MediaState>, HostError>;

    /// Live rule list of a `<style>` or `<link rel=stylesheet>` element.
    fn stylesheet_rules(&self, node: Self::Node) -> Result<Option<Vec<String>>, HostError>;

    fn attribute(&self, node: Self::Node, name: &str) -> Option<&str> {
        self.attributes(node)
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn next_sibling(&self, node: Self::Node) -> Option<Self::Node> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|n| *n == node)?;
        siblings.get(pos + 1).copied()
    }

    fn previous_sibling(&self, node: Self::Node) -> Option<Self::Node> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|n| *n == node)?;
        pos.checked_sub(1).and_then(|p| siblings.get(p).copied())
    }

    fn is_element_named(&self, node: Self::Node, name: &str) -> bool {
        self.tag_name(node)
            .is_some_and(|tag| tag.eq_ignore_ascii_case(name))
    }

    /// Parent that crosses shadow-root and frame boundaries.
    fn composed_parent(&self, node: Self::Node) -> Option<Self::Node> {
        if let Some(parent) = self.parent(node) {
            return Some(parent);
        }
        match self.node_type(node) {
            NodeType::ShadowRoot => self.shadow_host(node),
            NodeType::Document => self.frame_element(node),
            _ => None,
        }
    }

    /// Root of the tree the node lives in: its document, frame document or
    /// shadow root (or the top of a detached fragment).
    fn observation_root(&self, node: Self::Node) -> Self::Node {
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    fn contains(&self, ancestor: Self::Node, node: Self::Node) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.composed_parent(n);
        }
        false
    }
}
