//! Recording orchestrator.
//!
//! Owns the session's [`Mirror`] and one [`MutationBuffer`] per observed root
//! (the document, each same-origin frame document and each shadow root).
//! Every host callback is routed, flushed and emitted as at most one
//! mutation event, so removals from one root always precede additions to
//! another within the same callback.

use crate::buffer::{MutationBuffer, Peers};
use crate::clock::{Clock, SystemClock};
use crate::config::RecorderConfig;
use crate::error::{RecordError, RecorderStats, Recovered};
use crate::frames::FrameRemap;
use crate::sink::EventSink;
use core_types::{NodeId, Timestamp};
use dom::{HostTree, MutationRecord, NodeType, ScrollOffset};
use snapshot::values;
use snapshot::{
    AddedNode, Event, EventData, IncrementalData, Mirror, PatchBatch, PointerKind, PrivacyPolicy,
    RemovedNode, SerializeScope, Serializer, StyleRuleChange,
};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    NotStarted,
    Recording,
    Checkpointing,
    Stopped,
}

pub struct Recorder<N, S> {
    config: RecorderConfig,
    policy: Box<dyn PrivacyPolicy>,
    clock: Box<dyn Clock>,
    sink: S,
    state: RecorderState,
    mirror: Mirror<N>,
    buffers: Vec<MutationBuffer<N>>,
    document: Option<N>,
    frozen: bool,
    started_at: u64,
    last_checkpoint_at: u64,
    since_checkpoint: u64,
    frames: HashMap<N, FrameRemap>,
    stats: RecorderStats,
}

impl<N: Copy + Eq + Hash + Debug, S: EventSink> Recorder<N, S> {
    pub fn new(config: RecorderConfig, sink: S) -> Self {
        let policy = Box::new(config.privacy.clone());
        Self {
            config,
            policy,
            clock: Box::new(SystemClock::new()),
            sink,
            state: RecorderState::NotStarted,
            mirror: Mirror::new(),
            buffers: Vec::new(),
            document: None,
            frozen: false,
            started_at: 0,
            last_checkpoint_at: 0,
            since_checkpoint: 0,
            frames: HashMap::new(),
            stats: RecorderStats::default(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace the policy built from `config.privacy`.
    pub fn with_policy(mut self, policy: impl PrivacyPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn mirror(&self) -> &Mirror<N> {
        &self.mirror
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Roots that currently have a buffer, the document first.
    pub fn observed_roots(&self) -> Vec<N> {
        self.buffers.iter().map(MutationBuffer::root).collect()
    }

    /// Inserts waiting for their parent or sibling, across all buffers.
    pub fn pending_inserts(&self) -> usize {
        self.buffers.iter().map(MutationBuffer::pending_len).sum()
    }

    /// Begin recording `document`: `Meta` and `FullSnapshot` are emitted
    /// before this returns.
    pub fn start<T: HostTree<Node = N>>(&mut self, tree: &T, document: N) -> Result<(), RecordError> {
        if self.state != RecorderState::NotStarted {
            return Err(RecordError::AlreadyStarted);
        }
        if tree.node_type(document) != NodeType::Document {
            return Err(RecordError::NotADocument);
        }
        self.started_at = self.clock.now_ms();
        self.document = Some(document);
        self.mirror.reset();
        self.buffers = vec![MutationBuffer::new(document)];
        log::debug!(target: "recorder", "recording {document:?}");
        if let Err(err) = self.checkpoint(tree) {
            self.document = None;
            self.buffers.clear();
            self.state = RecorderState::NotStarted;
            return Err(err);
        }
        Ok(())
    }

    /// One host callback worth of notifications.
    pub fn on_mutations<T: HostTree<Node = N>>(
        &mut self,
        tree: &T,
        records: &[MutationRecord<N>],
    ) -> Result<(), RecordError> {
        self.ensure_recording()?;
        self.route(tree, records);
        if self.frozen {
            return Ok(());
        }
        if self.flush_buffers(tree, false) {
            self.stats.forced_checkpoints += 1;
            return self.checkpoint(tree);
        }
        self.maybe_checkpoint(tree)
    }

    /// Check the time-based checkpoint trigger without any notifications.
    pub fn tick<T: HostTree<Node = N>>(&mut self, tree: &T) -> Result<(), RecordError> {
        self.ensure_recording()?;
        self.maybe_checkpoint(tree)
    }

    /// Take a checkpoint now. Notifications the host has already produced
    /// must be delivered through [`Recorder::on_mutations`] first.
    pub fn take_checkpoint<T: HostTree<Node = N>>(&mut self, tree: &T) -> Result<(), RecordError> {
        self.ensure_recording()?;
        self.checkpoint(tree)
    }

    /// Keep accumulating notifications but stop emitting patches.
    pub fn freeze(&mut self) {
        self.frozen = true;
        for buffer in &mut self.buffers {
            buffer.freeze();
        }
    }

    /// Resume emission, flushing whatever accumulated while frozen.
    pub fn unfreeze<T: HostTree<Node = N>>(&mut self, tree: &T) -> Result<(), RecordError> {
        self.frozen = false;
        for buffer in &mut self.buffers {
            buffer.unfreeze();
        }
        self.on_mutations(tree, &[])
    }

    pub fn record_pointer(&mut self, kind: PointerKind, node: N, x: f64, y: f64) -> bool {
        let Some(id) = self.event_target(node) else {
            return false;
        };
        self.emit_incremental(IncrementalData::Pointer { kind, id, x, y });
        true
    }

    pub fn record_scroll(&mut self, node: N, offset: ScrollOffset) -> bool {
        let Some(id) = self.event_target(node) else {
            return false;
        };
        self.emit_incremental(IncrementalData::Scroll {
            id,
            x: offset.left,
            y: offset.top,
        });
        true
    }

    pub fn record_viewport_resize(&mut self, width: u32, height: u32) -> bool {
        if !self.is_active() {
            return false;
        }
        self.emit_incremental(IncrementalData::ViewportResize { width, height });
        true
    }

    /// Record the current value of a form control, masked like its `value`
    /// attribute.
    pub fn record_input<T: HostTree<Node = N>>(&mut self, tree: &T, node: N) -> bool {
        let Some(tag) = tree.tag_name(node) else {
            return false;
        };
        if !values::is_form_control(tag) {
            return false;
        }
        let Some(id) = self.event_target(node) else {
            return false;
        };
        if values::is_blocked_or_inside_blocked(tree, self.policy.as_ref(), node) {
            self.drop_excluded(id);
            return false;
        }
        let text = values::author_attributes(tree, self.policy.as_ref(), node)
            .remove("value")
            .unwrap_or_default();
        let is_checked = tree.is_checked(node);
        self.emit_incremental(IncrementalData::Input {
            id,
            text,
            is_checked,
        });
        true
    }

    pub fn record_stylesheet_rule(&mut self, node: N, change: StyleRuleChange) -> bool {
        let Some(id) = self.event_target(node) else {
            return false;
        };
        self.emit_incremental(IncrementalData::StyleSheetRule { id, change });
        true
    }

    /// Record a drawing call on a canvas. Ignored unless canvas recording is
    /// on.
    pub fn record_canvas_mutation(
        &mut self,
        node: N,
        property: &str,
        args: Vec<serde_json::Value>,
    ) -> bool {
        if !self.config.serialize.record_canvas {
            return false;
        }
        let Some(id) = self.event_target(node) else {
            return false;
        };
        self.emit_incremental(IncrementalData::CanvasMutation {
            id,
            property: property.to_string(),
            args,
        });
        true
    }

    pub fn add_custom_marker(
        &mut self,
        tag: &str,
        payload: serde_json::Value,
    ) -> Result<(), RecordError> {
        if !self.is_active() {
            return Err(RecordError::NotRecording);
        }
        self.emit(EventData::Custom {
            tag: tag.to_string(),
            payload,
        });
        Ok(())
    }

    /// Merge an event recorded inside the frame element `frame` by a
    /// separate recorder. Its ids are moved into this session's id space and
    /// a frame checkpoint becomes an add under the frame element.
    pub fn ingest_frame_event<T: HostTree<Node = N>>(
        &mut self,
        tree: &T,
        frame: N,
        event: Event,
    ) -> Result<(), RecordError> {
        self.ensure_recording()?;
        let frame_id = self
            .mirror
            .id_of(frame)
            .filter(|id| !id.is_excluded() && tree.is_connected(frame))
            .ok_or(RecordError::UnknownFrame)?;
        let mirror = &mut self.mirror;
        let mut allocate = || mirror.allocate_id();
        let remap = self.frames.entry(frame).or_default();

        match event.data {
            EventData::FullSnapshot { node, .. } => {
                let mut batch = PatchBatch::default();
                if let Some(previous) = remap.document() {
                    batch.removes.push(RemovedNode {
                        parent_id: frame_id,
                        id: previous,
                        is_shadow: false,
                    });
                }
                let node = remap.adopt_checkpoint(node, &mut allocate);
                batch.adds.push(AddedNode {
                    parent_id: frame_id,
                    next_id: None,
                    node,
                });
                self.emit_patch(batch);
            }
            EventData::Incremental(IncrementalData::Mutation(batch)) => {
                let batch = remap.translate_batch(batch, &mut allocate);
                if !batch.is_empty() {
                    self.emit_patch(batch);
                }
            }
            EventData::Incremental(data) => {
                if let Some(data) = remap.translate_incremental(data) {
                    self.emit_incremental(data);
                }
            }
            EventData::Custom { tag, payload } => self.emit(EventData::Custom { tag, payload }),
            EventData::Meta { .. } => {}
        }
        Ok(())
    }

    /// Process the final notifications, flush everything (even when frozen)
    /// and detach from the tree.
    pub fn stop<T: HostTree<Node = N>>(
        &mut self,
        tree: &T,
        final_records: &[MutationRecord<N>],
    ) -> Result<(), RecordError> {
        if !self.is_active() {
            return Err(RecordError::NotRecording);
        }
        self.route(tree, final_records);
        self.flush_buffers(tree, true);
        self.buffers.clear();
        self.frames.clear();
        self.frozen = false;
        self.state = RecorderState::Stopped;
        log::debug!(target: "recorder", "stopped: {:?}", self.stats);
        Ok(())
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state,
            RecorderState::Recording | RecorderState::Checkpointing
        )
    }

    fn ensure_recording(&self) -> Result<(), RecordError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(RecordError::NotRecording)
        }
    }

    fn timestamp(&self) -> Timestamp {
        let elapsed = self.clock.now_ms().saturating_sub(self.started_at);
        Timestamp(self.config.session_offset_ms.saturating_add(elapsed))
    }

    fn emit(&mut self, data: EventData) {
        let timestamp = self.timestamp();
        self.sink.emit(Event::new(timestamp, data));
    }

    fn emit_incremental(&mut self, data: IncrementalData) {
        self.stats.auxiliary_events += 1;
        self.since_checkpoint += 1;
        self.emit(EventData::Incremental(data));
    }

    fn emit_patch(&mut self, batch: PatchBatch) {
        let timestamp = self.timestamp();
        self.sink.on_patch(&batch, timestamp);
        self.sink.emit(Event::new(
            timestamp,
            EventData::Incremental(IncrementalData::Mutation(batch)),
        ));
        self.stats.patches += 1;
        self.since_checkpoint += 1;
    }

    /// Id an auxiliary event may refer to, or `None` if the event is dropped.
    fn event_target(&mut self, node: N) -> Option<NodeId> {
        if !self.is_active() {
            return None;
        }
        match self.mirror.id_of(node) {
            Some(id) if id.is_excluded() => {
                self.drop_excluded(id);
                None
            }
            Some(id) => Some(id),
            None => {
                log::debug!(target: "recorder", "event for unrecorded node {node:?} dropped");
                self.stats.dropped_events += 1;
                None
            }
        }
    }

    fn drop_excluded(&mut self, id: NodeId) {
        let recovered = Recovered::PolicyViolation(id);
        log::debug!(target: "recorder", "{recovered}");
        self.stats.note(recovered);
        self.stats.dropped_events += 1;
    }

    fn route<T: HostTree<Node = N>>(&mut self, tree: &T, records: &[MutationRecord<N>]) {
        let serializer = Serializer::new(tree, self.policy.as_ref(), &self.config.serialize);
        for (order, record) in (0u64..).zip(records) {
            let root = tree.observation_root(record.target);
            let at = self
                .buffers
                .iter()
                .position(|b| b.root() == root)
                .unwrap_or(0);
            if let Some((buffer, peers)) = Peers::split(&mut self.buffers, at) {
                buffer.process_among(
                    &serializer,
                    &self.mirror,
                    std::iter::once(record),
                    peers,
                    order,
                );
            }
        }
    }

    /// Flush every buffer into one patch and emit it. Returns true when a
    /// buffer carries more pending inserts than allowed.
    fn flush_buffers<T: HostTree<Node = N>>(&mut self, tree: &T, force: bool) -> bool {
        let serializer = Serializer::new(tree, self.policy.as_ref(), &self.config.serialize);
        let mut merged = PatchBatch::default();
        let mut removes = Vec::new();
        let mut discovered = Vec::new();

        for buffer in &mut self.buffers {
            buffer.start_cycle();
        }
        // A second pass lets inserts deferred on another root's adds resolve
        // within the same callback.
        for pass in 0..2 {
            let mut added = false;
            for at in 0..self.buffers.len() {
                let Some((buffer, peers)) = Peers::split(&mut self.buffers, at) else {
                    continue;
                };
                if !force && !buffer.can_flush() {
                    continue;
                }
                if pass > 0 && buffer.pending_len() == 0 {
                    continue;
                }
                if force {
                    buffer.unfreeze();
                    buffer.unlock();
                }
                let outcome = buffer.flush_among(&serializer, &mut self.mirror, peers);
                self.stats.dropped_pending += outcome.dropped_pending as u64;
                if outcome.serialization_failures > 0 {
                    self.stats
                        .note(Recovered::SerializationFailure(outcome.serialization_failures));
                }
                discovered.extend(outcome.shadow_roots);
                discovered.extend(outcome.frame_documents);
                if let Some(batch) = outcome.batch {
                    added |= !batch.adds.is_empty();
                    merged.texts.extend(batch.texts);
                    merged.attributes.extend(batch.attributes);
                    removes.extend(outcome.removal_order.into_iter().zip(batch.removes));
                    merged.adds.extend(batch.adds);
                }
            }
            if !added || self.pending_inserts() == 0 {
                break;
            }
        }

        removes.sort_by_key(|(order, _)| *order);
        merged.removes = removes.into_iter().map(|(_, remove)| remove).collect();
        self.sync_buffers(tree, discovered);
        if !merged.is_empty() {
            self.emit_patch(merged);
        }

        let mut over_capacity = false;
        for buffer in &self.buffers {
            let pending = buffer.pending_len();
            if pending > self.config.max_pending_inserts {
                let recovered = Recovered::CapacityExceeded { pending };
                log::warn!(target: "recorder", "{recovered} under {:?}; forcing a checkpoint", buffer.root());
                self.stats.note(recovered);
                over_capacity = true;
            }
        }
        over_capacity
    }

    /// Attach buffers to newly discovered roots and drop the ones whose root
    /// left the document.
    fn sync_buffers<T: HostTree<Node = N>>(&mut self, tree: &T, discovered: Vec<N>) {
        for root in discovered {
            if self.buffers.iter().any(|b| b.root() == root) {
                continue;
            }
            log::trace!(target: "recorder", "observing {root:?}");
            let mut buffer = MutationBuffer::new(root);
            if self.frozen {
                buffer.freeze();
            }
            self.buffers.push(buffer);
        }
        let document = self.document;
        self.buffers
            .retain(|b| Some(b.root()) == document || tree.is_connected(b.root()));
        self.frames.retain(|frame, _| tree.is_connected(*frame));
    }

    fn maybe_checkpoint<T: HostTree<Node = N>>(&mut self, tree: &T) -> Result<(), RecordError> {
        let elapsed = self.clock.now_ms().saturating_sub(self.last_checkpoint_at);
        let by_time = self
            .config
            .checkpoint_every_ms
            .is_some_and(|every| elapsed > every);
        let by_count = self
            .config
            .checkpoint_every_nth
            .is_some_and(|every| self.since_checkpoint >= every);
        if by_time || by_count {
            self.checkpoint(tree)
        } else {
            Ok(())
        }
    }

    fn checkpoint<T: HostTree<Node = N>>(&mut self, tree: &T) -> Result<(), RecordError> {
        let document = self.document.ok_or(RecordError::NotRecording)?;
        let resume = match self.state {
            RecorderState::NotStarted => RecorderState::NotStarted,
            _ => RecorderState::Recording,
        };
        self.state = RecorderState::Checkpointing;
        for buffer in &mut self.buffers {
            buffer.lock();
        }

        self.mirror.begin_generation(tree);
        let serializer = Serializer::new(tree, self.policy.as_ref(), &self.config.serialize);
        let scope = SerializeScope::document(&self.config.serialize);
        let subtree = match serializer.serialize(&mut self.mirror, document, scope) {
            Ok(Some(subtree)) => subtree,
            Ok(None) => {
                self.abort_checkpoint(resume);
                return Err(RecordError::NotADocument);
            }
            Err(err) => {
                log::warn!(target: "recorder", "checkpoint failed: {err}");
                self.abort_checkpoint(resume);
                return Err(err.into());
            }
        };
        if subtree.failures > 0 {
            self.stats
                .note(Recovered::SerializationFailure(subtree.failures));
        }

        let mut roots = vec![document];
        roots.extend(subtree.shadow_roots);
        roots.extend(subtree.frame_documents);
        let mut previous = std::mem::take(&mut self.buffers);
        for root in roots {
            let mut buffer = match previous.iter().position(|b| b.root() == root) {
                Some(at) => previous.swap_remove(at),
                None => MutationBuffer::new(root),
            };
            buffer.reset();
            buffer.unlock();
            if self.frozen {
                buffer.freeze();
            } else {
                buffer.unfreeze();
            }
            self.buffers.push(buffer);
        }
        self.frames.clear();

        let viewport = tree.viewport(document);
        self.emit(EventData::Meta {
            href: tree.document_url(document).unwrap_or_default().to_string(),
            width: viewport.width,
            height: viewport.height,
        });
        let timestamp = self.timestamp();
        let node = subtree.node;
        self.sink.on_checkpoint(&node, timestamp);
        self.sink.emit(Event::new(
            timestamp,
            EventData::FullSnapshot {
                node,
                initial_offset: tree.scroll_offset(document).unwrap_or_default(),
                generation: self.mirror.generation(),
            },
        ));

        self.stats.checkpoints += 1;
        self.last_checkpoint_at = self.clock.now_ms();
        self.since_checkpoint = 0;
        self.state = RecorderState::Recording;
        log::debug!(
            target: "recorder",
            "checkpoint {} at {timestamp} with {} nodes",
            self.mirror.generation(),
            self.mirror.len()
        );
        Ok(())
    }

    fn abort_checkpoint(&mut self, resume: RecorderState) {
        for buffer in &mut self.buffers {
            buffer.unlock();
        }
        self.state = resume;
    }
}
