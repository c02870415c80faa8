pub mod event;
pub mod mirror;
pub mod node;
pub mod outline;
pub mod patch;
pub mod policy;
pub mod serializer;
pub mod url;
pub mod values;

pub use event::{Event, EventData, IncrementalData, PointerKind, StyleRuleChange};
pub use mirror::{Mirror, MirrorError, NodeMeta};
pub use node::{NodeKind, SnapshotNode};
pub use outline::{OutlineOptions, assert_snapshot_eq, compare_snapshots};
pub use patch::{AddedNode, AttributeChange, PatchBatch, RemovedNode, TextChange};
pub use policy::{MASK_TOKEN, PrivacyConfig, PrivacyPolicy};
pub use serializer::{
    SerializeError, SerializeOptions, SerializeScope, SerializedSubtree, Serializer,
    SlimDomOptions,
};
