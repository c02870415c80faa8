//! Declarative construction of detached subtrees.
//!
//! Built nodes are linked directly, so nothing is reported to observers until
//! the finished subtree is inserted into a connected parent.

use crate::tree::{Dom, NodeRef};

#[derive(Clone, Debug, PartialEq)]
pub enum NodeSpec {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        children: Vec<NodeSpec>,
    },
    Text(String),
    Comment(String),
    CData(String),
}

pub fn el(tag: &str) -> NodeSpec {
    NodeSpec::Element {
        tag: tag.to_string(),
        attributes: Vec::new(),
        children: Vec::new(),
    }
}

pub fn text(text: &str) -> NodeSpec {
    NodeSpec::Text(text.to_string())
}

pub fn comment(text: &str) -> NodeSpec {
    NodeSpec::Comment(text.to_string())
}

pub fn cdata(text: &str) -> NodeSpec {
    NodeSpec::CData(text.to_string())
}

impl NodeSpec {
    /// Add an attribute; ignored on non-element specs.
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        if let NodeSpec::Element { attributes, .. } = &mut self {
            attributes.push((name.to_string(), value.to_string()));
        }
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        if let NodeSpec::Element { children, .. } = &mut self {
            children.push(child);
        }
        self
    }

    pub fn children(mut self, more: impl IntoIterator<Item = NodeSpec>) -> Self {
        if let NodeSpec::Element { children, .. } = &mut self {
            children.extend(more);
        }
        self
    }
}

impl Dom {
    /// Create a detached subtree from `spec` and return its root.
    pub fn build(&mut self, spec: &NodeSpec) -> NodeRef {
        match spec {
            NodeSpec::Element {
                tag,
                attributes,
                children,
            } => {
                let node = self.create_element(tag);
                for (name, value) in attributes {
                    // Detached, so this cannot notify; an element target cannot fail.
                    let _ = self.set_attribute(node, name, value);
                }
                for child in children {
                    let built = self.build(child);
                    self.link(node, built);
                }
                node
            }
            NodeSpec::Text(t) => self.create_text(t),
            NodeSpec::Comment(t) => self.create_comment(t),
            NodeSpec::CData(t) => self.create_cdata(t),
        }
    }

    /// Create a document holding an html doctype followed by `children`.
    pub fn build_document(&mut self, url: Option<&str>, children: &[NodeSpec]) -> NodeRef {
        let document = self.create_document(url);
        let doctype = self.create_doctype("html", "", "");
        self.link(document, doctype);
        for child in children {
            let built = self.build(child);
            self.link(document, built);
        }
        document
    }

    /// Build `spec` and append it under `parent`, reporting one addition.
    pub fn append_spec(
        &mut self,
        parent: NodeRef,
        spec: &NodeSpec,
    ) -> Result<NodeRef, crate::TreeError> {
        let node = self.build(spec);
        self.append_child(parent, node)?;
        Ok(node)
    }
}
