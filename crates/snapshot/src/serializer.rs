//! Full-tree serialization.
//!
//! Walks a live subtree in pre-order, binding every visited node in the
//! [`Mirror`] (reusing ids it already has) and producing a [`SnapshotNode`]
//! tree. Privacy decisions come from the injected [`PrivacyPolicy`].

use crate::mirror::{Mirror, MirrorError, NodeMeta};
use crate::node::{NodeKind, SnapshotNode};
use crate::policy::PrivacyPolicy;
use crate::url::absolute_css_urls;
use crate::values::{self, author_attributes, base_url_of, render_text};
use core_types::NodeId;
use dom::{HostError, HostTree, NodeType};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Elements left out entirely to keep recordings small.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlimDomOptions {
    pub script: bool,
    pub comment: bool,
    pub head_favicon: bool,
    pub head_whitespace: bool,
    pub head_meta_desc_keywords: bool,
    pub head_meta_social: bool,
    pub head_meta_robots: bool,
    pub head_meta_http_equiv: bool,
    pub head_meta_authorship: bool,
    pub head_meta_verification: bool,
}

impl SlimDomOptions {
    /// Every exclusion switched on.
    pub fn all() -> Self {
        Self {
            script: true,
            comment: true,
            head_favicon: true,
            head_whitespace: true,
            head_meta_desc_keywords: true,
            head_meta_social: true,
            head_meta_robots: true,
            head_meta_http_equiv: true,
            head_meta_authorship: true,
            head_meta_verification: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerializeOptions {
    pub slim_dom: SlimDomOptions,
    pub record_canvas: bool,
    pub inline_stylesheet: bool,
    pub preserve_whitespace: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            slim_dom: SlimDomOptions::default(),
            record_canvas: false,
            inline_stylesheet: true,
            preserve_whitespace: true,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SerializeError {
    Host(HostError),
    Registry(MirrorError),
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializeError::Host(err) => write!(f, "host read failed: {err}"),
            SerializeError::Registry(err) => write!(f, "registry rejected node: {err}"),
        }
    }
}

impl std::error::Error for SerializeError {}

impl From<HostError> for SerializeError {
    fn from(err: HostError) -> Self {
        SerializeError::Host(err)
    }
}

impl From<MirrorError> for SerializeError {
    fn from(err: MirrorError) -> Self {
        SerializeError::Registry(err)
    }
}

/// Context inherited from the ancestors of the node being serialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerializeScope {
    pub preserve_whitespace: bool,
    pub mask_text: bool,
    pub in_svg: bool,
    /// Id of the nested document the node lives in.
    pub root_id: Option<NodeId>,
    /// The node is a direct child of a shadow root.
    pub is_shadow: bool,
}

impl SerializeScope {
    pub fn document(options: &SerializeOptions) -> Self {
        Self {
            preserve_whitespace: options.preserve_whitespace,
            mask_text: false,
            in_svg: false,
            root_id: None,
            is_shadow: false,
        }
    }
}

#[derive(Debug)]
pub struct SerializedSubtree<N> {
    pub node: SnapshotNode,
    /// Every node bound to a real id by this walk, in pre-order.
    pub visited: Vec<N>,
    pub shadow_roots: Vec<N>,
    pub frame_documents: Vec<N>,
    /// Descendant subtrees skipped after a host read failure.
    pub failures: usize,
}

struct Visit<N> {
    visited: Vec<N>,
    shadow_roots: Vec<N>,
    frame_documents: Vec<N>,
    failures: usize,
}

#[derive(Clone, Copy)]
struct Mark {
    visited: usize,
    shadow_roots: usize,
    frame_documents: usize,
}

impl<N: Copy + Eq + std::hash::Hash> Visit<N> {
    fn new() -> Self {
        Self {
            visited: Vec::new(),
            shadow_roots: Vec::new(),
            frame_documents: Vec::new(),
            failures: 0,
        }
    }

    fn mark(&self) -> Mark {
        Mark {
            visited: self.visited.len(),
            shadow_roots: self.shadow_roots.len(),
            frame_documents: self.frame_documents.len(),
        }
    }

    /// Unbind everything visited since `mark`; the reader never sees it.
    fn rollback(&mut self, mirror: &mut Mirror<N>, mark: Mark) {
        for node in self.visited.drain(mark.visited..) {
            mirror.remove(node);
        }
        self.shadow_roots.truncate(mark.shadow_roots);
        self.frame_documents.truncate(mark.frame_documents);
    }
}

pub struct Serializer<'a, T: HostTree> {
    tree: &'a T,
    policy: &'a dyn PrivacyPolicy,
    options: &'a SerializeOptions,
}

impl<'a, T: HostTree> Serializer<'a, T> {
    pub fn new(tree: &'a T, policy: &'a dyn PrivacyPolicy, options: &'a SerializeOptions) -> Self {
        Self {
            tree,
            policy,
            options,
        }
    }

    pub fn tree(&self) -> &'a T {
        self.tree
    }

    pub fn policy(&self) -> &'a dyn PrivacyPolicy {
        self.policy
    }

    /// Serialize `node` and its subtree. `Ok(None)` means the node itself is
    /// excluded and now bound to the sentinel. On error nothing stays bound.
    pub fn serialize(
        &self,
        mirror: &mut Mirror<T::Node>,
        node: T::Node,
        scope: SerializeScope,
    ) -> Result<Option<SerializedSubtree<T::Node>>, SerializeError> {
        let mut visit = Visit::new();
        let result = self.walk(mirror, node, &scope, &mut visit);
        match result {
            Ok(Some(snapshot)) => Ok(Some(SerializedSubtree {
                node: snapshot,
                visited: visit.visited,
                shadow_roots: visit.shadow_roots,
                frame_documents: visit.frame_documents,
                failures: visit.failures,
            })),
            Ok(None) => Ok(None),
            Err(err) => {
                let start = Mark {
                    visited: 0,
                    shadow_roots: 0,
                    frame_documents: 0,
                };
                visit.rollback(mirror, start);
                Err(err)
            }
        }
    }

    /// Serialize a node at its current position, deriving the scope from its
    /// ancestors.
    pub fn serialize_in_place(
        &self,
        mirror: &mut Mirror<T::Node>,
        node: T::Node,
    ) -> Result<Option<SerializedSubtree<T::Node>>, SerializeError> {
        let scope = self.scope_of(mirror, node);
        self.serialize(mirror, node, scope)
    }

    pub fn scope_of(&self, mirror: &Mirror<T::Node>, node: T::Node) -> SerializeScope {
        let tree = self.tree;
        let mut scope = SerializeScope::document(self.options);
        for ancestor in values::element_ancestors(tree, node) {
            match tree.tag_name(ancestor) {
                Some("head") if self.options.slim_dom.head_whitespace => {
                    scope.preserve_whitespace = false
                }
                Some("svg") => scope.in_svg = true,
                _ => {}
            }
        }
        scope.mask_text = values::ancestor_masks_text(tree, self.policy, node);
        scope.root_id = tree
            .owner_document(node)
            .filter(|doc| *doc != node && tree.frame_element(*doc).is_some())
            .and_then(|doc| mirror.id_of(doc))
            .filter(|id| !id.is_excluded());
        scope.is_shadow = tree
            .parent(node)
            .is_some_and(|p| tree.node_type(p) == NodeType::ShadowRoot);
        scope
    }

    fn walk(
        &self,
        mirror: &mut Mirror<T::Node>,
        node: T::Node,
        scope: &SerializeScope,
        visit: &mut Visit<T::Node>,
    ) -> Result<Option<SnapshotNode>, SerializeError> {
        let tree = self.tree;
        let node_type = tree.node_type(node);
        if node_type == NodeType::ShadowRoot || self.is_excluded(node, node_type, scope) {
            if node_type != NodeType::ShadowRoot {
                log::trace!(target: "snapshot.serializer", "excluding {node:?}");
                mirror.exclude(node);
            }
            return Ok(None);
        }

        let mut meta = NodeMeta::new(node_type);
        meta.is_shadow = scope.is_shadow;
        meta.root_id = match node_type {
            NodeType::Document => None,
            _ => scope.root_id,
        };
        let id = self.claim_id(mirror, node, meta, visit)?;

        let kind = match node_type {
            NodeType::Document => {
                let mut child_scope = SerializeScope::document(self.options);
                if tree.frame_element(node).is_some() {
                    child_scope.root_id = Some(id);
                }
                NodeKind::Document {
                    children: self.walk_children(mirror, tree.children(node), &child_scope, visit),
                }
            }
            NodeType::DocumentType => {
                let doctype = tree.doctype(node);
                NodeKind::DocumentType {
                    name: doctype.map(|d| d.name.to_string()).unwrap_or_default(),
                    public_id: doctype.map(|d| d.public_id.to_string()).unwrap_or_default(),
                    system_id: doctype.map(|d| d.system_id.to_string()).unwrap_or_default(),
                }
            }
            NodeType::Element => self.element(mirror, node, id, scope, visit)?,
            NodeType::Text => {
                let parent_tag = tree.parent(node).and_then(|p| tree.tag_name(p));
                let data = tree.character_data(node).unwrap_or_default();
                NodeKind::Text {
                    text: render_text(
                        self.policy,
                        parent_tag,
                        scope.mask_text,
                        base_url_of(tree, node),
                        data,
                    ),
                    is_style: parent_tag == Some("style"),
                }
            }
            NodeType::CData => NodeKind::CData {
                text: tree.character_data(node).unwrap_or_default().to_string(),
            },
            NodeType::Comment => NodeKind::Comment {
                text: tree.character_data(node).unwrap_or_default().to_string(),
            },
            NodeType::ShadowRoot => return Ok(None),
        };

        if let NodeKind::Element {
            tag, attributes, ..
        } = &kind
            && let Some(meta) = mirror.meta_mut(id)
        {
            meta.tag = Some(tag.clone());
            meta.attributes = attributes.clone();
        }

        Ok(Some(SnapshotNode {
            id,
            root_id: mirror.meta(id).and_then(|m| m.root_id),
            is_shadow: scope.is_shadow,
            kind,
        }))
    }

    fn claim_id(
        &self,
        mirror: &mut Mirror<T::Node>,
        node: T::Node,
        meta: NodeMeta,
        visit: &mut Visit<T::Node>,
    ) -> Result<NodeId, SerializeError> {
        let id = match mirror.id_of(node) {
            Some(id) if !id.is_excluded() => {
                let generation = mirror.generation();
                if let Some(existing) = mirror.meta_mut(id) {
                    *existing = NodeMeta { generation, ..meta };
                }
                id
            }
            previous => {
                if previous.is_some() {
                    mirror.remove(node);
                }
                let id = mirror.allocate_id();
                mirror.register(node, id, meta)?;
                id
            }
        };
        visit.visited.push(node);
        Ok(id)
    }

    fn walk_children(
        &self,
        mirror: &mut Mirror<T::Node>,
        children: &[T::Node],
        scope: &SerializeScope,
        visit: &mut Visit<T::Node>,
    ) -> Vec<SnapshotNode> {
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            let mark = visit.mark();
            match self.walk(mirror, *child, scope, visit) {
                Ok(Some(snapshot)) => out.push(snapshot),
                Ok(None) => {}
                Err(err) => {
                    log::warn!(
                        target: "snapshot.serializer",
                        "skipping subtree of {child:?}: {err}"
                    );
                    visit.rollback(mirror, mark);
                    mirror.exclude(*child);
                    visit.failures += 1;
                }
            }
        }
        out
    }

    fn element(
        &self,
        mirror: &mut Mirror<T::Node>,
        node: T::Node,
        id: NodeId,
        scope: &SerializeScope,
        visit: &mut Visit<T::Node>,
    ) -> Result<NodeKind, SerializeError> {
        let tree = self.tree;
        let tag = tree.tag_name(node).unwrap_or_default().to_ascii_lowercase();
        let is_svg = scope.in_svg || tag == "svg";

        if self.policy.is_blocked(&tag, tree.attributes(node)) {
            let rect = tree.bounding_box(node);
            let mut attributes = BTreeMap::new();
            attributes.insert("rr_width".to_string(), format!("{}px", rect.width));
            attributes.insert("rr_height".to_string(), format!("{}px", rect.height));
            return Ok(NodeKind::Element {
                tag,
                attributes,
                children: Vec::new(),
                is_svg,
                blocked: true,
            });
        }

        let mut attributes = author_attributes(tree, self.policy, node);
        self.capture_live_state(node, &tag, &mut attributes)?;

        let mut child_scope = SerializeScope {
            preserve_whitespace: scope.preserve_whitespace,
            mask_text: scope.mask_text || self.policy.masks_text(&tag, tree.attributes(node)),
            in_svg: is_svg && tag != "foreignobject",
            root_id: scope.root_id,
            is_shadow: false,
        };
        if tag == "head" && self.options.slim_dom.head_whitespace {
            child_scope.preserve_whitespace = false;
        }

        let children = match tree.content_document(node) {
            Ok(Some(document)) => {
                visit.frame_documents.push(document);
                let frame_scope = SerializeScope {
                    root_id: None,
                    ..SerializeScope::document(self.options)
                };
                self.walk_children(mirror, &[document], &frame_scope, visit)
            }
            Ok(None) | Err(HostError::CrossOrigin) => {
                let mut children = if tag == "textarea" {
                    Vec::new()
                } else {
                    self.walk_children(mirror, tree.children(node), &child_scope, visit)
                };
                if let Some(shadow) = tree.shadow_root(node) {
                    visit.shadow_roots.push(shadow);
                    let shadow_scope = SerializeScope {
                        is_shadow: true,
                        ..child_scope
                    };
                    children.extend(self.walk_children(
                        mirror,
                        tree.children(shadow),
                        &shadow_scope,
                        visit,
                    ));
                }
                children
            }
            Err(err) => return Err(err.into()),
        };
        log::trace!(target: "snapshot.serializer", "element <{tag}> as {id}");

        Ok(NodeKind::Element {
            tag,
            attributes,
            children,
            is_svg,
            blocked: false,
        })
    }

    /// State the host keeps outside the attribute list: canvas pixels, media
    /// playback, stylesheet rules and scroll position.
    fn capture_live_state(
        &self,
        node: T::Node,
        tag: &str,
        attributes: &mut BTreeMap<String, String>,
    ) -> Result<(), HostError> {
        let tree = self.tree;
        if tag == "canvas"
            && self.options.record_canvas
            && let Some(capture) = tree.canvas_capture(node)?
            && !capture.is_blank
        {
            attributes.insert("rr_dataURL".to_string(), capture.data_url);
        }

        if (tag == "audio" || tag == "video")
            && let Some(media) = tree.media_state(node)?
        {
            let state = if media.paused { "paused" } else { "played" };
            attributes.insert("rr_mediaState".to_string(), state.to_string());
            attributes.insert("rr_mediaCurrentTime".to_string(), media.current_time.to_string());
            attributes.insert("rr_mediaPlaybackRate".to_string(), media.playback_rate.to_string());
            attributes.insert("rr_mediaMuted".to_string(), media.muted.to_string());
            attributes.insert("rr_mediaLoop".to_string(), media.looping.to_string());
            attributes.insert("rr_mediaVolume".to_string(), media.volume.to_string());
        }

        let is_stylesheet_link = tag == "link"
            && tree
                .attribute(node, "rel")
                .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")));
        if self.options.inline_stylesheet
            && (tag == "style" || is_stylesheet_link)
            && let Some(rules) = tree.stylesheet_rules(node)?
        {
            let base = if is_stylesheet_link {
                attributes.get("href").cloned()
            } else {
                base_url_of(tree, node).map(str::to_string)
            };
            let css = absolute_css_urls(base.as_deref(), &rules.concat());
            attributes.insert("_cssText".to_string(), css);
            if is_stylesheet_link {
                attributes.remove("href");
                attributes.remove("rel");
            }
        }

        if let Some(offset) = tree.scroll_offset(node)
            && !offset.is_origin()
        {
            attributes.insert("rr_scrollLeft".to_string(), offset.left.to_string());
            attributes.insert("rr_scrollTop".to_string(), offset.top.to_string());
        }
        Ok(())
    }

    fn is_excluded(&self, node: T::Node, node_type: NodeType, scope: &SerializeScope) -> bool {
        let tree = self.tree;
        match node_type {
            NodeType::Comment => self.options.slim_dom.comment,
            NodeType::Text => {
                !scope.preserve_whitespace
                    && tree
                        .character_data(node)
                        .is_none_or(|t| t.trim().is_empty())
            }
            NodeType::Element => self.slim_dom_excludes(node),
            _ => false,
        }
    }

    fn slim_dom_excludes(&self, node: T::Node) -> bool {
        let slim = &self.options.slim_dom;
        let tree = self.tree;
        let attr = |name: &str| -> String {
            tree.attribute(node, name)
                .map(str::to_ascii_lowercase)
                .unwrap_or_default()
        };
        match tree.tag_name(node) {
            Some("script") => slim.script,
            Some("link") => {
                let rel = attr("rel");
                let script_preload = (rel == "preload" || rel == "modulepreload") && attr("as") == "script";
                let script_prefetch = rel == "prefetch" && attr("href").ends_with(".js");
                (slim.script && (script_preload || script_prefetch))
                    || (slim.head_favicon && rel.contains("icon"))
            }
            Some("meta") => {
                let name = attr("name");
                let property = attr("property");
                (slim.head_favicon
                    && (name.starts_with("msapplication-tile")
                        || name == "msapplication-config"))
                    || (slim.head_meta_desc_keywords
                        && (name == "description" || name == "keywords"))
                    || (slim.head_meta_social
                        && (property.starts_with("og:")
                            || property.starts_with("twitter:")
                            || property.starts_with("fb:")
                            || name.starts_with("twitter:")
                            || name == "pinterest"))
                    || (slim.head_meta_robots
                        && matches!(name.as_str(), "robots" | "googlebot" | "bingbot"))
                    || (slim.head_meta_http_equiv && tree.attribute(node, "http-equiv").is_some())
                    || (slim.head_meta_authorship
                        && (matches!(
                            name.as_str(),
                            "author" | "generator" | "framework" | "publisher" | "progid"
                        ) || property.starts_with("article:")
                            || property.starts_with("product:")))
                    || (slim.head_meta_verification
                        && matches!(
                            name.as_str(),
                            "google-site-verification"
                                | "yandex-verification"
                                | "csrf-token"
                                | "p:domain_verify"
                                | "verify-v1"
                                | "verification"
                                | "shopify-checkout-api-token"
                        ))
            }
            _ => false,
        }
    }
}
