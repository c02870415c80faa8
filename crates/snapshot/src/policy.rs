//! Blocking and masking decisions.
//!
//! The recorder never decides what is private; it asks a [`PrivacyPolicy`].
//! [`PrivacyConfig`] is the stock policy: class names plus simple selector
//! lists, loadable from configuration.

use crate::url::same_origin;
use serde::Deserialize;
use std::sync::OnceLock;

/// Replacement written for masked input values.
pub const MASK_TOKEN: &str = "********";

pub trait PrivacyPolicy {
    /// The element and its subtree are replaced by a sized placeholder.
    fn is_blocked(&self, tag: &str, attributes: &[(String, String)]) -> bool;

    /// Value to record for a form control of the given kind (`input_type` is
    /// the lowercase `type` attribute for inputs, otherwise the tag name).
    fn mask_input_value(&self, input_type: &str, value: &str) -> String;

    /// Text beneath this element is masked.
    fn masks_text(&self, tag: &str, attributes: &[(String, String)]) -> bool;

    fn mask_text(&self, text: &str) -> String {
        text.chars()
            .map(|c| if c.is_whitespace() { c } else { '*' })
            .collect()
    }

    /// Frame source `src` (in a document with base `base`) is recorded under
    /// its own name rather than as `rr_src`.
    fn keep_iframe_src(&self, base: Option<&str>, src: &str) -> bool;
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub block_class: String,
    pub block_selector: Option<String>,
    pub mask_text_class: String,
    pub mask_text_selector: Option<String>,
    pub mask_all_inputs: bool,
    pub mask_input_types: Vec<String>,
    /// Keep every frame source, not only same-origin ones.
    pub keep_iframe_src: bool,
    #[serde(skip)]
    pub(crate) compiled: OnceLock<Compiled>,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            block_class: "rr-block".to_string(),
            block_selector: None,
            mask_text_class: "rr-mask".to_string(),
            mask_text_selector: None,
            mask_all_inputs: false,
            mask_input_types: vec!["password".to_string()],
            keep_iframe_src: false,
            compiled: OnceLock::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Compiled {
    block: Vec<Vec<Selector>>,
    mask_text: Vec<Vec<Selector>>,
}

impl PrivacyConfig {
    fn compiled(&self) -> &Compiled {
        self.compiled.get_or_init(|| Compiled {
            block: parse_selector_list(self.block_selector.as_deref()),
            mask_text: parse_selector_list(self.mask_text_selector.as_deref()),
        })
    }
}

impl PrivacyPolicy for PrivacyConfig {
    fn is_blocked(&self, tag: &str, attributes: &[(String, String)]) -> bool {
        has_class(attributes, &self.block_class)
            || self
                .compiled()
                .block
                .iter()
                .any(|compound| matches_compound(tag, attributes, compound))
    }

    fn mask_input_value(&self, input_type: &str, value: &str) -> String {
        let masked = self.mask_all_inputs
            || self
                .mask_input_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(input_type));
        if masked && !value.is_empty() {
            MASK_TOKEN.to_string()
        } else {
            value.to_string()
        }
    }

    fn masks_text(&self, tag: &str, attributes: &[(String, String)]) -> bool {
        has_class(attributes, &self.mask_text_class)
            || self
                .compiled()
                .mask_text
                .iter()
                .any(|compound| matches_compound(tag, attributes, compound))
    }

    fn keep_iframe_src(&self, base: Option<&str>, src: &str) -> bool {
        self.keep_iframe_src || same_origin(base, src)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Selector {
    Universal,
    Type(String),
    Id(String),
    Class(String),
    Attribute { name: String, value: Option<String> },
}

fn has_class(attributes: &[(String, String)], class: &str) -> bool {
    !class.is_empty()
        && attribute(attributes, "class").is_some_and(|list| list.split_whitespace().any(|c| c == class))
}

fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn matches_compound(tag: &str, attributes: &[(String, String)], compound: &[Selector]) -> bool {
    compound
        .iter()
        .all(|selector| matches_selector(tag, attributes, selector))
}

fn matches_selector(tag: &str, attributes: &[(String, String)], selector: &Selector) -> bool {
    match selector {
        Selector::Universal => true,
        Selector::Type(t) => tag.eq_ignore_ascii_case(t),
        Selector::Id(want) => attribute(attributes, "id") == Some(want.as_str()),
        Selector::Class(want) => has_class(attributes, want),
        Selector::Attribute { name, value } => match (attribute(attributes, name), value) {
            (Some(_), None) => true,
            (Some(actual), Some(want)) => actual == want,
            (None, _) => false,
        },
    }
}

// input: "div.ad, [data-private], #card"
// output: one compound selector per comma-separated entry; unsupported
// entries (combinators, pseudo-classes) are dropped.
fn parse_selector_list(input: Option<&str>) -> Vec<Vec<Selector>> {
    let Some(input) = input else {
        return Vec::new();
    };
    input
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| {
            let parsed = parse_compound(s);
            if parsed.is_none() {
                log::warn!(target: "snapshot.policy", "ignoring unsupported selector {s:?}");
            }
            parsed
        })
        .collect()
}

fn parse_compound(s: &str) -> Option<Vec<Selector>> {
    const STARTS: [char; 3] = ['#', '.', '['];
    let s = s.trim();
    let mut out = Vec::new();

    let end = s.find(STARTS).unwrap_or(s.len());
    let head = &s[..end];
    if head == "*" {
        out.push(Selector::Universal);
    } else if !head.is_empty() {
        if !is_ident(head) {
            return None;
        }
        out.push(Selector::Type(head.to_ascii_lowercase()));
    }

    let mut rest = &s[end..];
    while let Some(first) = rest.chars().next() {
        match first {
            '#' | '.' => {
                let body = &rest[1..];
                let end = body.find(STARTS).unwrap_or(body.len());
                let name = &body[..end];
                if !is_ident(name) {
                    return None;
                }
                out.push(if first == '#' {
                    Selector::Id(name.to_string())
                } else {
                    Selector::Class(name.to_string())
                });
                rest = &body[end..];
            }
            '[' => {
                let close = rest.find(']')?;
                let inner = &rest[1..close];
                let (name, value) = match inner.split_once('=') {
                    Some((n, v)) => (n.trim(), Some(v.trim().trim_matches(['"', '\'']).to_string())),
                    None => (inner.trim(), None),
                };
                if !is_ident(name) {
                    return None;
                }
                out.push(Selector::Attribute {
                    name: name.to_ascii_lowercase(),
                    value,
                });
                rest = &rest[close + 1..];
            }
            _ => return None,
        }
    }
    (!out.is_empty()).then_some(out)
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
