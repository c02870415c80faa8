//! Where recorded events go.
//!
//! Emission is fire-and-forget: a sink never reports failure back to the
//! recorder, and nothing is rolled back if delivery fails.

use core_types::Timestamp;
use snapshot::{Event, EventData, IncrementalData, PatchBatch, SnapshotNode};
use std::sync::mpsc::Sender;

pub trait EventSink {
    /// Every event, in log order.
    fn emit(&mut self, event: Event);

    /// Called just before the `FullSnapshot` event carrying `node` is emitted.
    fn on_checkpoint(&mut self, _node: &SnapshotNode, _timestamp: Timestamp) {}

    /// Called just before the mutation event carrying `batch` is emitted.
    fn on_patch(&mut self, _batch: &PatchBatch, _timestamp: Timestamp) {}
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

impl EventSink for Sender<Event> {
    fn emit(&mut self, event: Event) {
        if self.send(event).is_err() {
            log::trace!(target: "recorder.sink", "receiver gone; event discarded");
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: Event) {
        (**self).emit(event);
    }

    fn on_checkpoint(&mut self, node: &SnapshotNode, timestamp: Timestamp) {
        (**self).on_checkpoint(node, timestamp);
    }

    fn on_patch(&mut self, batch: &PatchBatch, timestamp: Timestamp) {
        (**self).on_patch(batch, timestamp);
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn emit(&mut self, event: Event) {
        (**self).emit(event);
    }

    fn on_checkpoint(&mut self, node: &SnapshotNode, timestamp: Timestamp) {
        (**self).on_checkpoint(node, timestamp);
    }

    fn on_patch(&mut self, batch: &PatchBatch, timestamp: Timestamp) {
        (**self).on_patch(batch, timestamp);
    }
}

/// In-memory log with per-kind counters.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
    checkpoints: usize,
    patches: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints
    }

    pub fn patches(&self) -> usize {
        self.patches
    }

    pub fn mutations(&self) -> impl Iterator<Item = &PatchBatch> + '_ {
        self.events.iter().filter_map(Event::as_mutation)
    }

    pub fn last_checkpoint(&self) -> Option<&SnapshotNode> {
        self.events.iter().rev().find_map(|e| match &e.data {
            EventData::FullSnapshot { node, .. } => Some(node),
            _ => None,
        })
    }

    /// One JSON document per line.
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: Event) {
        match &event.data {
            EventData::FullSnapshot { .. } => self.checkpoints += 1,
            EventData::Incremental(IncrementalData::Mutation(_)) => self.patches += 1,
            _ => {}
        }
        self.events.push(event);
    }
}
