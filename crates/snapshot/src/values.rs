//! Recorded form of attribute and text values.
//!
//! Checkpoints and incremental patches must agree on how a live value is
//! written, so both the serializer and the mutation buffer go through these
//! helpers.

use crate::policy::PrivacyPolicy;
use crate::url::{absolute_css_urls, absolute_srcset, absolute_url};
use dom::{HostTree, NodeType};
use std::collections::BTreeMap;

pub const SCRIPT_PLACEHOLDER: &str = "SCRIPT_PLACEHOLDER";

const FORM_CONTROLS: [&str; 3] = ["input", "textarea", "select"];
const UNMASKED_INPUT_TYPES: [&str; 4] = ["radio", "checkbox", "submit", "button"];

pub fn is_form_control(tag: &str) -> bool {
    FORM_CONTROLS.contains(&tag)
}

/// Masking kind of a form control: the lowercase `type` of an input
/// (defaulting to `text`), otherwise the tag name.
pub fn input_type<T: HostTree>(tree: &T, node: T::Node) -> String {
    match tree.tag_name(node) {
        Some("input") => tree
            .attribute(node, "type")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "text".to_string()),
        Some(tag) => tag.to_string(),
        None => String::new(),
    }
}

/// Base URL of the document `node` belongs to.
pub fn base_url_of<T: HostTree>(tree: &T, node: T::Node) -> Option<&str> {
    tree.owner_document(node).and_then(|d| tree.base_url(d))
}

/// Element ancestors of `node` up to (not across) its document, stepping
/// from shadow roots to their hosts.
pub fn element_ancestors<T: HostTree>(tree: &T, node: T::Node) -> impl Iterator<Item = T::Node> + '_ {
    let mut current = node;
    std::iter::from_fn(move || {
        loop {
            let next = match tree.parent(current) {
                Some(parent) => parent,
                None if tree.node_type(current) == NodeType::ShadowRoot => {
                    tree.shadow_host(current)?
                }
                None => return None,
            };
            current = next;
            match tree.node_type(next) {
                NodeType::Element => return Some(next),
                NodeType::Document => return None,
                _ => continue,
            }
        }
    })
}

/// True when text beneath `node` is masked by one of its ancestors.
pub fn ancestor_masks_text<T: HostTree>(tree: &T, policy: &dyn PrivacyPolicy, node: T::Node) -> bool {
    element_ancestors(tree, node).any(|el| {
        tree.tag_name(el)
            .is_some_and(|tag| policy.masks_text(tag, tree.attributes(el)))
    })
}

/// True when `node` or one of its element ancestors is blocked.
pub fn is_blocked_or_inside_blocked<T: HostTree>(
    tree: &T,
    policy: &dyn PrivacyPolicy,
    node: T::Node,
) -> bool {
    let blocked = |el: T::Node| {
        tree.tag_name(el)
            .is_some_and(|tag| policy.is_blocked(tag, tree.attributes(el)))
    };
    blocked(node) || element_ancestors(tree, node).any(blocked)
}

/// Recorded text for character data under a parent with tag `parent_tag`.
pub fn render_text(
    policy: &dyn PrivacyPolicy,
    parent_tag: Option<&str>,
    masked: bool,
    base: Option<&str>,
    text: &str,
) -> String {
    match parent_tag {
        Some("script") => SCRIPT_PLACEHOLDER.to_string(),
        Some("style") => absolute_css_urls(base, text),
        _ if masked => policy.mask_text(text),
        _ => text.to_string(),
    }
}

/// Recorded text of a character-data node in its current position.
pub fn text_value<T: HostTree>(tree: &T, policy: &dyn PrivacyPolicy, node: T::Node) -> Option<String> {
    let data = tree.character_data(node)?;
    let parent_tag = tree.parent(node).and_then(|p| tree.tag_name(p));
    let masked = tree.node_type(node) == NodeType::Text && ancestor_masks_text(tree, policy, node);
    Some(render_text(
        policy,
        parent_tag,
        masked,
        base_url_of(tree, node),
        data,
    ))
}

/// Name under which author attribute `name` with current `value` is
/// recorded. Frame sources the policy does not keep become `rr_src`.
pub fn recorded_attribute_name(
    policy: &dyn PrivacyPolicy,
    tag: &str,
    name: &str,
    value: Option<&str>,
    base: Option<&str>,
) -> String {
    match value {
        Some(src) if tag == "iframe" && name == "src" && !policy.keep_iframe_src(base, src) => {
            "rr_src".to_string()
        }
        _ => name.to_string(),
    }
}

/// Author-visible attributes of an element as recorded: paths made absolute,
/// live form state captured and masked, frame sources renamed.
pub fn author_attributes<T: HostTree>(
    tree: &T,
    policy: &dyn PrivacyPolicy,
    node: T::Node,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(tag) = tree.tag_name(node) else {
        return out;
    };
    let base = base_url_of(tree, node);

    for (name, value) in tree.attributes(node) {
        let name = name.to_ascii_lowercase();
        let value = rewrite_attribute(tag, &name, value, base);
        let key = recorded_attribute_name(policy, tag, &name, Some(&value), base);
        out.insert(key, value);
    }

    if is_form_control(tag) {
        let kind = input_type(tree, node);
        if !UNMASKED_INPUT_TYPES.contains(&kind.as_str()) {
            let live = tree.form_value(node).unwrap_or_default();
            let value = policy.mask_input_value(&kind, &live);
            if value.is_empty() {
                out.remove("value");
            } else {
                out.insert("value".to_string(), value);
            }
        }
        if kind == "radio" || kind == "checkbox" {
            if tree.is_checked(node) {
                out.insert("checked".to_string(), "true".to_string());
            } else {
                out.remove("checked");
            }
        }
    }
    out
}

fn rewrite_attribute(tag: &str, name: &str, value: &str, base: Option<&str>) -> String {
    match name {
        "src" | "xlink:href" => absolute_url(base, value),
        "href" if !(tag == "use" && value.starts_with('#')) => absolute_url(base, value),
        "background" if matches!(tag, "table" | "td" | "th") => absolute_url(base, value),
        "srcset" => absolute_srcset(base, value),
        "style" => absolute_css_urls(base, value),
        _ => value.to_string(),
    }
}
