//! Timestamped log entries.

use crate::node::SnapshotNode;
use crate::patch::PatchBatch;
use core_types::{NodeId, Timestamp};
use dom::ScrollOffset;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: Timestamp,
    pub data: EventData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventData {
    /// Precedes every checkpoint.
    Meta { href: String, width: u32, height: u32 },
    FullSnapshot {
        node: SnapshotNode,
        initial_offset: ScrollOffset,
        generation: u32,
    },
    Incremental(IncrementalData),
    Custom {
        tag: String,
        payload: serde_json::Value,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum IncrementalData {
    Mutation(PatchBatch),
    Pointer {
        kind: PointerKind,
        id: NodeId,
        x: f64,
        y: f64,
    },
    Scroll {
        id: NodeId,
        x: f64,
        y: f64,
    },
    ViewportResize {
        width: u32,
        height: u32,
    },
    Input {
        id: NodeId,
        text: String,
        is_checked: bool,
    },
    StyleSheetRule {
        id: NodeId,
        change: StyleRuleChange,
    },
    CanvasMutation {
        id: NodeId,
        property: String,
        args: Vec<serde_json::Value>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerKind {
    Move,
    MouseDown,
    MouseUp,
    Click,
    DoubleClick,
    ContextMenu,
    Focus,
    Blur,
    TouchStart,
    TouchMove,
    TouchEnd,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StyleRuleChange {
    Insert { rule: String, index: Option<u32> },
    Delete { index: u32 },
}

impl Event {
    pub fn new(timestamp: Timestamp, data: EventData) -> Self {
        Self { timestamp, data }
    }

    pub fn is_full_snapshot(&self) -> bool {
        matches!(self.data, EventData::FullSnapshot { .. })
    }

    pub fn as_mutation(&self) -> Option<&PatchBatch> {
        match &self.data {
            EventData::Incremental(IncrementalData::Mutation(batch)) => Some(batch),
            _ => None,
        }
    }

    pub fn is_incremental(&self) -> bool {
        matches!(self.data, EventData::Incremental(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_events_are_tagged_by_source() {
        let event = Event::new(
            Timestamp(42),
            EventData::Incremental(IncrementalData::Scroll {
                id: NodeId(3),
                x: 0.0,
                y: 120.0,
            }),
        );
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["data"]["type"], "incremental");
        assert_eq!(json["data"]["data"]["source"], "scroll");
        let back: Event = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn mutation_accessor_only_matches_patches() {
        let patch = Event::new(
            Timestamp(1),
            EventData::Incremental(IncrementalData::Mutation(PatchBatch::default())),
        );
        let meta = Event::new(
            Timestamp(1),
            EventData::Meta {
                href: "https://example.com/".into(),
                width: 800,
                height: 600,
            },
        );
        assert!(patch.as_mutation().is_some());
        assert!(meta.as_mutation().is_none());
        assert!(!meta.is_incremental());
    }
}
