use crate::host::{HostTree, NodeType};

/// Pre-order walk of `root`'s light tree (shadow roots and frame documents
/// are not entered).
pub fn descendants<T: HostTree>(tree: &T, root: T::Node) -> Vec<T::Node> {
    fn walk<T: HostTree>(tree: &T, node: T::Node, out: &mut Vec<T::Node>) {
        out.push(node);
        for child in tree.children(node) {
            walk(tree, *child, out);
        }
    }

    let mut out = Vec::new();
    walk(tree, root, &mut out);
    out
}

/// Pre-order walk that also enters shadow roots (after light children) and
/// loaded frame documents.
pub fn composed_descendants<T: HostTree>(tree: &T, root: T::Node) -> Vec<T::Node> {
    fn walk<T: HostTree>(tree: &T, node: T::Node, out: &mut Vec<T::Node>) {
        out.push(node);
        for child in tree.children(node) {
            walk(tree, *child, out);
        }
        if let Some(shadow) = tree.shadow_root(node) {
            walk(tree, shadow, out);
        }
        if let Ok(Some(document)) = tree.content_document(node) {
            walk(tree, document, out);
        }
    }

    let mut out = Vec::new();
    walk(tree, root, &mut out);
    out
}

pub fn find_element_by_id<T: HostTree>(tree: &T, root: T::Node, id: &str) -> Option<T::Node> {
    if tree.node_type(root) == NodeType::Element && tree.attribute(root, "id") == Some(id) {
        return Some(root);
    }
    for child in tree.children(root) {
        if let Some(found) = find_element_by_id(tree, *child, id) {
            return Some(found);
        }
    }
    None
}

pub fn find_first_element<T: HostTree>(tree: &T, root: T::Node, tag: &str) -> Option<T::Node> {
    descendants(tree, root)
        .into_iter()
        .find(|n| tree.is_element_named(*n, tag))
}

/// Concatenated data of all descendant text nodes.
pub fn text_content<T: HostTree>(tree: &T, node: T::Node) -> String {
    let mut out = String::new();
    for n in descendants(tree, node) {
        if tree.node_type(n) == NodeType::Text
            && let Some(text) = tree.character_data(n)
        {
            out.push_str(text);
        }
    }
    out
}
