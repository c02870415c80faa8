//! Deterministic text outline of a snapshot tree, and structural comparison.
//!
//! Used to check that a replayed tree matches a fresh serialization of the
//! live document.
//!
//! Equivalence rules:
//! - Node kinds must match.
//! - Element tags, attribute maps and svg/blocked flags must match.
//! - Text, CDATA, comment and doctype content must match exactly.
//! - Ids, root ids and shadow flags can be ignored by options.

use crate::node::{NodeKind, SnapshotNode};
use std::fmt::{self, Write};
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug)]
pub struct OutlineOptions {
    pub ignore_ids: bool,
}

impl Default for OutlineOptions {
    fn default() -> Self {
        Self { ignore_ids: true }
    }
}

#[derive(Debug)]
pub struct Outline {
    lines: Vec<String>,
}

impl Outline {
    pub fn new(root: &SnapshotNode, options: OutlineOptions) -> Self {
        let mut lines = Vec::new();
        walk_outline(root, &options, 0, &mut lines);
        Self { lines }
    }

    pub fn as_lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

impl fmt::Display for Outline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug)]
pub struct SnapshotMismatch<'a> {
    path: String,
    detail: String,
    expected_node: &'a SnapshotNode,
    actual_node: &'a SnapshotNode,
    options: OutlineOptions,
    expected_subtree: OnceLock<String>,
    actual_subtree: OnceLock<String>,
}

impl fmt::Display for SnapshotMismatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected_subtree = self
            .expected_subtree
            .get_or_init(|| Outline::new(self.expected_node, self.options).render());
        let actual_subtree = self
            .actual_subtree
            .get_or_init(|| Outline::new(self.actual_node, self.options).render());
        writeln!(f, "snapshot mismatch at {}: {}", self.path, self.detail)?;
        writeln!(f, "expected subtree:\n{expected_subtree}")?;
        writeln!(f, "actual subtree:\n{actual_subtree}")?;
        Ok(())
    }
}

impl std::error::Error for SnapshotMismatch<'_> {}

pub fn assert_snapshot_eq(expected: &SnapshotNode, actual: &SnapshotNode, options: OutlineOptions) {
    if let Err(mismatch) = compare_snapshots(expected, actual, options) {
        panic!("{mismatch}");
    }
}

pub fn compare_snapshots<'a>(
    expected: &'a SnapshotNode,
    actual: &'a SnapshotNode,
    options: OutlineOptions,
) -> Result<(), Box<SnapshotMismatch<'a>>> {
    let mut path = vec![node_label(expected)];
    compare_nodes(expected, actual, &options, &mut path)
}

fn compare_nodes<'a>(
    expected: &'a SnapshotNode,
    actual: &'a SnapshotNode,
    options: &OutlineOptions,
    path: &mut Vec<String>,
) -> Result<(), Box<SnapshotMismatch<'a>>> {
    let fail = |detail: &str| {
        Err(Box::new(mismatch(
            &path[..],
            detail,
            expected,
            actual,
            options,
        )))
    };
    if !options.ignore_ids {
        if expected.id != actual.id {
            return fail("id");
        }
        if expected.root_id != actual.root_id {
            return fail("root id");
        }
        if expected.is_shadow != actual.is_shadow {
            return fail("shadow flag");
        }
    }
    match (&expected.kind, &actual.kind) {
        (NodeKind::Document { .. }, NodeKind::Document { .. }) => {}
        (
            NodeKind::DocumentType {
                name: en,
                public_id: ep,
                system_id: es,
            },
            NodeKind::DocumentType {
                name: an,
                public_id: ap,
                system_id: as_,
            },
        ) => {
            if (en, ep, es) != (an, ap, as_) {
                return fail("doctype");
            }
        }
        (
            NodeKind::Element {
                tag: et,
                attributes: ea,
                is_svg: esvg,
                blocked: eb,
                ..
            },
            NodeKind::Element {
                tag: at,
                attributes: aa,
                is_svg: asvg,
                blocked: ab,
                ..
            },
        ) => {
            if et != at {
                return fail("element tag");
            }
            if ea.len() != aa.len() {
                return fail("attribute count");
            }
            for ((en, ev), (an, av)) in ea.iter().zip(aa.iter()) {
                if en != an {
                    return fail(&format!("attribute name {en:?}"));
                }
                if ev != av {
                    return fail(&format!("attribute value of {en:?}"));
                }
            }
            if esvg != asvg {
                return fail("svg flag");
            }
            if eb != ab {
                return fail("blocked flag");
            }
        }
        (
            NodeKind::Text {
                text: et,
                is_style: es,
            },
            NodeKind::Text {
                text: at,
                is_style: as_,
            },
        ) => {
            if et != at || es != as_ {
                return fail("text");
            }
        }
        (NodeKind::CData { text: et }, NodeKind::CData { text: at }) => {
            if et != at {
                return fail("cdata");
            }
        }
        (NodeKind::Comment { text: et }, NodeKind::Comment { text: at }) => {
            if et != at {
                return fail("comment");
            }
        }
        _ => return fail("node kind"),
    }
    compare_children(expected, actual, options, path)
}

fn compare_children<'a>(
    expected: &'a SnapshotNode,
    actual: &'a SnapshotNode,
    options: &OutlineOptions,
    path: &mut Vec<String>,
) -> Result<(), Box<SnapshotMismatch<'a>>> {
    let (exp_children, act_children) = (expected.children(), actual.children());
    if exp_children.len() != act_children.len() {
        return Err(Box::new(mismatch(
            path,
            &format!(
                "child count (expected {}, actual {})",
                exp_children.len(),
                act_children.len()
            ),
            expected,
            actual,
            options,
        )));
    }
    for (idx, (exp, act)) in exp_children.iter().zip(act_children.iter()).enumerate() {
        path.push(format!("{}[{}]", node_label(exp), idx));
        let result = compare_nodes(exp, act, options, path);
        path.pop();
        result?;
    }
    Ok(())
}

fn mismatch<'a>(
    path: &[String],
    detail: &str,
    expected: &'a SnapshotNode,
    actual: &'a SnapshotNode,
    options: &OutlineOptions,
) -> SnapshotMismatch<'a> {
    SnapshotMismatch {
        path: format!("/{}", path.join("/")),
        detail: detail.to_string(),
        expected_node: expected,
        actual_node: actual,
        options: *options,
        expected_subtree: OnceLock::new(),
        actual_subtree: OnceLock::new(),
    }
}

fn node_label(node: &SnapshotNode) -> String {
    match &node.kind {
        NodeKind::Document { .. } => "#document".to_string(),
        NodeKind::DocumentType { .. } => "#doctype".to_string(),
        NodeKind::Element {
            tag, attributes, ..
        } => {
            let mut label = tag.clone();
            if let Some(id) = attributes.get("id").filter(|v| !v.is_empty()) {
                label.push('#');
                write_escaped(&mut label, id);
            } else if let Some(class) = attributes.get("class").filter(|v| !v.is_empty()) {
                label.push_str(".class=");
                write_escaped(&mut label, class);
            }
            label
        }
        NodeKind::Text { .. } => "#text".to_string(),
        NodeKind::CData { .. } => "#cdata".to_string(),
        NodeKind::Comment { .. } => "#comment".to_string(),
    }
}

fn walk_outline(node: &SnapshotNode, options: &OutlineOptions, depth: usize, out: &mut Vec<String>) {
    const INDENT_STEP: usize = 2;
    let mut line = " ".repeat(depth * INDENT_STEP);
    write_node_line(&mut line, node, options);
    out.push(line);
    for child in node.children() {
        walk_outline(child, options, depth + 1, out);
    }
}

fn write_node_line(out: &mut String, node: &SnapshotNode, options: &OutlineOptions) {
    if node.is_shadow {
        out.push_str("(shadow) ");
    }
    match &node.kind {
        NodeKind::Document { .. } => out.push_str("#document"),
        NodeKind::DocumentType { name, .. } => {
            out.push_str("<!DOCTYPE ");
            write_escaped(out, name);
            out.push('>');
        }
        NodeKind::Element {
            tag,
            attributes,
            blocked,
            ..
        } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attributes {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                write_escaped(out, value);
                out.push('"');
            }
            out.push('>');
            if *blocked {
                out.push_str(" [blocked]");
            }
        }
        NodeKind::Text { text, .. } | NodeKind::CData { text } => {
            out.push('"');
            write_escaped(out, text);
            out.push('"');
        }
        NodeKind::Comment { text } => {
            out.push_str("<!-- ");
            write_escaped(out, text);
            out.push_str(" -->");
        }
    }
    if !options.ignore_ids {
        let _ = write!(out, " {}", node.id);
        if let Some(root) = node.root_id {
            let _ = write!(out, " root={root}");
        }
    }
}

fn write_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ if ch.is_ascii() => out.push(ch),
            _ => {
                let _ = write!(out, "\\u{{{:X}}}", ch as u32);
            }
        }
    }
}
