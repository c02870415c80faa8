pub mod builder;
pub mod host;
pub mod mutation;
pub mod traverse;
pub mod tree;

pub use builder::{NodeSpec, cdata, comment, el, text};
pub use host::{
    CanvasCapture, Doctype, HostError, HostTree, MediaState, NodeType, Rect, ScrollOffset,
    Viewport,
};
pub use mutation::{MutationKind, MutationObserver, MutationRecord};
pub use tree::{Dom, NodeRef, TreeError};
