//! Turns raw change notifications into ordered patch batches.
//!
//! One buffer exists per observation root (document, frame document or
//! shadow root). Notifications accumulate until [`MutationBuffer::flush`],
//! which linearizes additions so that every parent and next-sibling id an add
//! refers to is known to the reader when the add is applied.
//!
//! A single host callback may touch several roots at once, for example when a
//! node moves from the light tree into a shadow root. Buffers of one session
//! therefore see each other through [`Peers`] while processing and flushing a
//! callback, so that no root emits an add or change another root already
//! covers or has invalidated.

use crate::pending::PendingInserts;
use core_types::NodeId;
use dom::{HostTree, MutationKind, MutationRecord, NodeType};
use snapshot::values;
use snapshot::{
    AddedNode, AttributeChange, Mirror, PatchBatch, RemovedNode, Serializer, TextChange,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Idle,
    Accumulating,
    Flushing,
}

/// Result of one flush.
#[derive(Debug)]
pub struct FlushOutcome<N> {
    /// `None` when nothing changed.
    pub batch: Option<PatchBatch>,
    pub shadow_roots: Vec<N>,
    pub frame_documents: Vec<N>,
    /// Pending inserts dropped because they left the document or can never
    /// be placed.
    pub dropped_pending: usize,
    pub serialization_failures: usize,
    /// Inserts still waiting after this flush.
    pub pending: usize,
    /// Position in the host callback of the record behind each entry of
    /// `batch.removes`, for merging several buffers' removals in order.
    pub removal_order: Vec<u64>,
}

#[derive(Debug)]
enum Placement {
    Ready {
        parent_id: NodeId,
        next_id: Option<NodeId>,
    },
    Deferred,
    Skip,
}

/// Insertion-ordered set.
#[derive(Debug)]
struct OrderedSet<N> {
    order: Vec<N>,
    members: HashSet<N>,
}

impl<N: Copy + Eq + Hash> OrderedSet<N> {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            members: HashSet::new(),
        }
    }

    fn insert(&mut self, node: N) -> bool {
        if !self.members.insert(node) {
            return false;
        }
        self.order.push(node);
        true
    }

    fn remove(&mut self, node: N) -> bool {
        if !self.members.remove(&node) {
            return false;
        }
        self.order.retain(|n| *n != node);
        true
    }

    fn contains(&self, node: N) -> bool {
        self.members.contains(&node)
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn snapshot(&self) -> Vec<N> {
        self.order.clone()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

struct FlushScratch<N> {
    adds: Vec<AddedNode>,
    shadow_roots: Vec<N>,
    frame_documents: Vec<N>,
    dropped: usize,
    failures: usize,
}

impl<N> Default for FlushScratch<N> {
    fn default() -> Self {
        Self {
            adds: Vec::new(),
            shadow_roots: Vec::new(),
            frame_documents: Vec::new(),
            dropped: 0,
            failures: 0,
        }
    }
}

/// The other buffers of a session, read-only while one of them works.
pub struct Peers<'p, N> {
    before: &'p [MutationBuffer<N>],
    after: &'p [MutationBuffer<N>],
}

impl<N> Clone for Peers<'_, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for Peers<'_, N> {}

impl<'p, N> Peers<'p, N> {
    pub fn none() -> Self {
        Self {
            before: &[],
            after: &[],
        }
    }

    /// Split `buffers` into the one at `at` and a view of the rest.
    pub fn split(
        buffers: &'p mut [MutationBuffer<N>],
        at: usize,
    ) -> Option<(&'p mut MutationBuffer<N>, Peers<'p, N>)> {
        if at >= buffers.len() {
            return None;
        }
        let (before, rest) = buffers.split_at_mut(at);
        let (current, after) = rest.split_first_mut()?;
        Some((current, Peers { before, after }))
    }

    fn any(&self, f: impl Fn(&MutationBuffer<N>) -> bool) -> bool {
        self.before.iter().chain(self.after).any(f)
    }
}

#[derive(Debug)]
pub struct MutationBuffer<N> {
    root: N,
    state: BufferState,
    frozen: bool,
    locked: bool,
    texts: OrderedSet<N>,
    attributes: Vec<(N, Vec<String>)>,
    attribute_index: HashMap<N, usize>,
    removes: Vec<(u64, RemovedNode)>,
    removed_nodes: HashSet<N>,
    map_removes: Vec<N>,
    moved: OrderedSet<N>,
    moved_targets: HashSet<(N, N)>,
    added: OrderedSet<N>,
    dropped: HashSet<N>,
    /// Nodes serialized in the current cycle; survives between the flush
    /// passes of one callback and is cleared by [`MutationBuffer::start_cycle`].
    emitted: HashSet<N>,
    pending: PendingInserts<N>,
}

impl<N: Copy + Eq + Hash + Debug> MutationBuffer<N> {
    pub fn new(root: N) -> Self {
        Self {
            root,
            state: BufferState::Idle,
            frozen: false,
            locked: false,
            texts: OrderedSet::new(),
            attributes: Vec::new(),
            attribute_index: HashMap::new(),
            removes: Vec::new(),
            removed_nodes: HashSet::new(),
            map_removes: Vec::new(),
            moved: OrderedSet::new(),
            moved_targets: HashSet::new(),
            added: OrderedSet::new(),
            dropped: HashSet::new(),
            emitted: HashSet::new(),
            pending: PendingInserts::new(),
        }
    }

    pub fn root(&self) -> N {
        self.root
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Flushing is suspended while frozen or locked; accumulation is not.
    pub fn can_flush(&self) -> bool {
        !self.frozen && !self.locked
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_changes(&self) -> bool {
        !self.texts.is_empty()
            || !self.attributes.is_empty()
            || !self.removes.is_empty()
            || !self.map_removes.is_empty()
            || !self.moved.is_empty()
            || !self.added.is_empty()
            || !self.pending.is_empty()
    }

    /// Drop everything accumulated, including pending inserts. Used when a
    /// checkpoint supersedes the buffer's history.
    pub fn reset(&mut self) {
        self.clear_accumulation();
        self.emitted.clear();
        self.pending.clear();
        self.state = BufferState::Idle;
    }

    /// Fold a batch of notifications into the buffer.
    pub fn process<'r, T: HostTree<Node = N>>(
        &mut self,
        serializer: &Serializer<'_, T>,
        mirror: &Mirror<N>,
        records: impl IntoIterator<Item = &'r MutationRecord<N>>,
    ) where
        N: 'r,
    {
        self.process_among(serializer, mirror, records, Peers::none(), 0);
    }

    /// [`MutationBuffer::process`] for one buffer of several. `order` is the
    /// position of the first record in the host callback.
    pub fn process_among<'r, T: HostTree<Node = N>>(
        &mut self,
        serializer: &Serializer<'_, T>,
        mirror: &Mirror<N>,
        records: impl IntoIterator<Item = &'r MutationRecord<N>>,
        peers: Peers<'_, N>,
        order: u64,
    ) where
        N: 'r,
    {
        for (offset, record) in (0u64..).zip(records) {
            self.state = BufferState::Accumulating;
            self.process_record(serializer, mirror, record, peers, order + offset);
        }
    }

    fn process_record<T: HostTree<Node = N>>(
        &mut self,
        serializer: &Serializer<'_, T>,
        mirror: &Mirror<N>,
        record: &MutationRecord<N>,
        peers: Peers<'_, N>,
        order: u64,
    ) {
        let tree = serializer.tree();
        let policy = serializer.policy();
        let target = record.target;
        match &record.kind {
            MutationKind::CharacterData { old_value } => {
                if let Some(parent) = tree.parent(target)
                    && tree.is_element_named(parent, "textarea")
                {
                    self.record_attribute(parent, "value");
                    return;
                }
                if tree.character_data(target) == old_value.as_deref()
                    || values::is_blocked_or_inside_blocked(tree, policy, target)
                {
                    return;
                }
                self.texts.insert(target);
            }
            MutationKind::Attributes { name, old_value } => {
                if tree.node_type(target) != NodeType::Element {
                    return;
                }
                let current = live_attribute(tree, target, name);
                if current.as_deref() == old_value.as_deref()
                    || values::is_blocked_or_inside_blocked(tree, policy, target)
                {
                    return;
                }
                self.record_attribute(target, name);
                if name == "type" && tree.is_element_named(target, "input") {
                    self.record_attribute(target, "value");
                    self.record_attribute(target, "checked");
                }
            }
            MutationKind::ChildList { added, removed, .. } => {
                if tree.is_element_named(target, "textarea") {
                    self.record_attribute(target, "value");
                    return;
                }
                if values::is_blocked_or_inside_blocked(tree, policy, target) {
                    return;
                }
                for node in added {
                    self.gen_add(mirror, *node, target);
                }
                for node in removed {
                    self.process_removal(tree, mirror, *node, target, peers, order);
                }
            }
        }
    }

    fn record_attribute(&mut self, node: N, name: &str) {
        let name = name.to_ascii_lowercase();
        match self.attribute_index.get(&node) {
            Some(&at) => {
                let names = &mut self.attributes[at].1;
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            None => {
                self.attribute_index.insert(node, self.attributes.len());
                self.attributes.push((node, vec![name]));
            }
        }
    }

    fn gen_add(&mut self, mirror: &Mirror<N>, node: N, target: N) {
        if mirror.has(node) {
            self.moved.insert(node);
            self.moved_targets.insert((node, target));
        } else {
            self.added.insert(node);
            self.dropped.remove(&node);
        }
    }

    fn process_removal<T: HostTree<Node = N>>(
        &mut self,
        tree: &T,
        mirror: &Mirror<N>,
        node: N,
        target: N,
        peers: Peers<'_, N>,
        order: u64,
    ) {
        let (parent, is_shadow) = match tree.node_type(target) {
            NodeType::ShadowRoot => match tree.shadow_host(target) {
                Some(host) => (host, true),
                None => return,
            },
            _ => (target, false),
        };

        if self.added.contains(node) {
            // Added and removed within one cycle: the reader never sees it.
            self.deep_delete_added(tree, node);
            self.dropped.insert(node);
        } else if self.pending.remove(node) {
            self.dropped.insert(node);
        } else if let (Some(id), Some(parent_id)) = (mirror.id_of(node), mirror.id_of(parent))
            && !id.is_excluded()
            && !parent_id.is_excluded()
        {
            if self.moved.contains(node) && self.moved_targets.remove(&(node, target)) {
                // Moved in earlier this cycle; its removal is already recorded.
                self.moved.remove(node);
            } else if !self.removed_or_pending_inclusive(tree, target, peers) {
                self.removes.push((
                    order,
                    RemovedNode {
                        parent_id,
                        id,
                        is_shadow,
                    },
                ));
                self.removed_nodes.insert(node);
            }
        }
        self.map_removes.push(node);
    }

    fn deep_delete_added<T: HostTree<Node = N>>(&mut self, tree: &T, node: N) {
        let doomed: Vec<N> = self
            .added
            .snapshot()
            .into_iter()
            .filter(|n| tree.contains(node, *n))
            .collect();
        for n in doomed {
            self.added.remove(n);
            self.pending.remove(n);
        }
    }

    /// True when `node` or an ancestor had its removal recorded this cycle,
    /// or is still waiting to be inserted, in any buffer of the session.
    fn removed_or_pending_inclusive<T: HostTree<Node = N>>(
        &self,
        tree: &T,
        node: N,
        peers: Peers<'_, N>,
    ) -> bool {
        let held = |b: &Self, n: N| b.removed_nodes.contains(&n) || b.pending.contains(n);
        let mut current = Some(node);
        while let Some(n) = current {
            if held(self, n) || peers.any(|b| held(b, n)) {
                return true;
            }
            current = tree.composed_parent(n);
        }
        false
    }

    fn is_emitted(&self, node: N, peers: Peers<'_, N>) -> bool {
        self.emitted.contains(&node) || peers.any(|b| b.emitted.contains(&node))
    }

    /// Known to the registry but not yet (re)inserted on the reader side.
    fn unsettled(&self, node: N, peers: Peers<'_, N>) -> bool {
        let waiting = |b: &Self| b.moved.contains(node) || b.pending.contains(node);
        (waiting(self) || peers.any(waiting)) && !self.is_emitted(node, peers)
    }

    fn unsettled_inclusive<T: HostTree<Node = N>>(
        &self,
        tree: &T,
        node: N,
        peers: Peers<'_, N>,
    ) -> bool {
        let quiet = |b: &Self| b.moved.is_empty() && b.pending.is_empty();
        if quiet(self) && !peers.any(|b| !quiet(b)) {
            return false;
        }
        let mut current = Some(node);
        while let Some(n) = current {
            if self.unsettled(n, peers) {
                return true;
            }
            current = tree.composed_parent(n);
        }
        false
    }

    fn ancestor_in<T: HostTree<Node = N>>(tree: &T, node: N, set: &HashSet<N>) -> bool {
        let mut current = tree.composed_parent(node);
        while let Some(n) = current {
            if set.contains(&n) {
                return true;
            }
            current = tree.composed_parent(n);
        }
        false
    }

    /// Begin a new host callback: forget which nodes were serialized during
    /// the previous one.
    pub fn start_cycle(&mut self) {
        self.emitted.clear();
    }

    /// Emit everything accumulated since the last flush.
    pub fn flush<T: HostTree<Node = N>>(
        &mut self,
        serializer: &Serializer<'_, T>,
        mirror: &mut Mirror<N>,
    ) -> FlushOutcome<N> {
        self.start_cycle();
        self.flush_among(serializer, mirror, Peers::none())
    }

    /// [`MutationBuffer::flush`] for one buffer of several. The caller starts
    /// the cycle on every buffer before the first of them flushes.
    pub fn flush_among<T: HostTree<Node = N>>(
        &mut self,
        serializer: &Serializer<'_, T>,
        mirror: &mut Mirror<N>,
        peers: Peers<'_, N>,
    ) -> FlushOutcome<N> {
        let tree = serializer.tree();
        let policy = serializer.policy();
        self.state = BufferState::Flushing;
        let mut scratch = FlushScratch::default();

        let stale: Vec<N> = self
            .pending
            .iter_from_tail()
            .filter(|n| !tree.is_connected(*n))
            .collect();
        for node in stale {
            log::debug!(target: "recorder.buffer", "dropping detached pending insert {node:?}");
            self.pending.remove(node);
            scratch.dropped += 1;
        }

        for node in self.moved.snapshot() {
            let parent_moved = tree.composed_parent(node).is_some_and(|p| self.moved.contains(p));
            if Self::ancestor_in(tree, node, &self.removed_nodes) && !parent_moved {
                continue;
            }
            self.push_add(serializer, mirror, node, peers, &mut scratch);
        }

        for node in self.added.snapshot() {
            let parent_moved = tree.composed_parent(node).is_some_and(|p| self.moved.contains(p));
            if Self::ancestor_in(tree, node, &self.dropped) && !parent_moved {
                continue;
            }
            self.push_add(serializer, mirror, node, peers, &mut scratch);
        }

        self.resolve_pending(serializer, mirror, peers, &mut scratch);

        let mut texts = Vec::new();
        for node in self.texts.snapshot() {
            let Some(id) = self.settled_id(tree, mirror, node, peers) else {
                continue;
            };
            if let Some(value) = values::text_value(tree, policy, node) {
                texts.push(TextChange { id, value });
            }
        }

        let mut attributes = Vec::new();
        for (node, names) in std::mem::take(&mut self.attributes) {
            let Some(id) = self.settled_id(tree, mirror, node, peers) else {
                continue;
            };
            let Some(tag) = tree.tag_name(node) else {
                continue;
            };
            let recorded = values::author_attributes(tree, policy, node);
            let base = values::base_url_of(tree, node);
            let mut changes = BTreeMap::new();
            for name in names {
                let live = tree.attribute(node, &name);
                let key = values::recorded_attribute_name(policy, tag, &name, live, base);
                // A frame source that changed origin leaves its old name behind.
                if let Some(alias) = frame_source_alias(tag, &name, &key)
                    && mirror
                        .meta(id)
                        .is_some_and(|meta| meta.attributes.contains_key(alias))
                {
                    changes.insert(alias.to_string(), None);
                }
                let value = recorded.get(&key).cloned();
                changes.insert(key, value);
            }
            if let Some(meta) = mirror.meta_mut(id) {
                for (key, value) in &changes {
                    match value {
                        Some(v) => meta.attributes.insert(key.clone(), v.clone()),
                        None => meta.attributes.remove(key),
                    };
                }
            }
            attributes.push(AttributeChange {
                id,
                attributes: changes,
            });
        }

        for node in std::mem::take(&mut self.map_removes) {
            if !tree.is_connected(node) {
                mirror.forget(tree, node);
            }
        }

        let (removal_order, removes): (Vec<u64>, Vec<RemovedNode>) =
            std::mem::take(&mut self.removes).into_iter().unzip();
        let batch = PatchBatch {
            texts,
            attributes,
            removes,
            adds: scratch.adds,
        };
        self.clear_accumulation();
        self.state = BufferState::Idle;

        if scratch.dropped > 0 || !self.pending.is_empty() {
            log::trace!(
                target: "recorder.buffer",
                "flush dropped={} pending={}",
                scratch.dropped,
                self.pending.len()
            );
        }

        FlushOutcome {
            batch: (!batch.is_empty()).then_some(batch),
            shadow_roots: scratch.shadow_roots,
            frame_documents: scratch.frame_documents,
            dropped_pending: scratch.dropped,
            serialization_failures: scratch.failures,
            pending: self.pending.len(),
            removal_order,
        }
    }

    /// Id of a node whose text/attribute change should be written: known to
    /// the reader and not already covered by an add in this cycle.
    fn settled_id<T: HostTree<Node = N>>(
        &self,
        tree: &T,
        mirror: &Mirror<N>,
        node: N,
        peers: Peers<'_, N>,
    ) -> Option<NodeId> {
        let id = mirror.id_of(node).filter(|id| !id.is_excluded())?;
        if self.is_emitted(node, peers) || self.unsettled_inclusive(tree, node, peers) {
            return None;
        }
        Some(id)
    }

    fn push_add<T: HostTree<Node = N>>(
        &mut self,
        serializer: &Serializer<'_, T>,
        mirror: &mut Mirror<N>,
        node: N,
        peers: Peers<'_, N>,
        scratch: &mut FlushScratch<N>,
    ) {
        let tree = serializer.tree();
        if self.is_emitted(node, peers) || !tree.is_connected(node) {
            return;
        }
        match self.locate(tree, mirror, node, peers) {
            Placement::Ready { parent_id, next_id } => {
                self.emit_add(serializer, mirror, node, parent_id, next_id, scratch)
            }
            Placement::Deferred => {
                self.pending
                    .insert(node, tree.previous_sibling(node), tree.next_sibling(node));
            }
            Placement::Skip => {
                log::debug!(target: "recorder.buffer", "add of {node:?} cannot be placed");
            }
        }
    }

    /// Where `node` would go on the reader side, if it can go anywhere yet.
    fn locate<T: HostTree<Node = N>>(
        &self,
        tree: &T,
        mirror: &Mirror<N>,
        node: N,
        peers: Peers<'_, N>,
    ) -> Placement {
        let Some(parent) = recorded_parent(tree, node) else {
            return Placement::Skip;
        };
        if tree.is_element_named(parent, "textarea") {
            return Placement::Skip;
        }
        let parent_id = match mirror.id_of(parent) {
            Some(id) if id.is_excluded() => return Placement::Skip,
            Some(_) if self.unsettled_inclusive(tree, parent, peers) => {
                return Placement::Deferred;
            }
            Some(id) => id,
            None if nearest_registered_is_excluded(tree, mirror, parent) => return Placement::Skip,
            None => return Placement::Deferred,
        };

        let mut sibling = tree.next_sibling(node);
        while let Some(s) = sibling {
            match mirror.id_of(s) {
                Some(id) if id.is_excluded() => sibling = tree.next_sibling(s),
                Some(_) if self.unsettled(s, peers) => return Placement::Deferred,
                Some(id) => {
                    return Placement::Ready {
                        parent_id,
                        next_id: Some(id),
                    };
                }
                None => return Placement::Deferred,
            }
        }
        Placement::Ready {
            parent_id,
            next_id: None,
        }
    }

    fn emit_add<T: HostTree<Node = N>>(
        &mut self,
        serializer: &Serializer<'_, T>,
        mirror: &mut Mirror<N>,
        node: N,
        parent_id: NodeId,
        next_id: Option<NodeId>,
        scratch: &mut FlushScratch<N>,
    ) {
        match serializer.serialize_in_place(mirror, node) {
            Ok(Some(subtree)) => {
                if serializer.tree().node_type(node) == NodeType::Document {
                    scratch.frame_documents.push(node);
                }
                self.emitted.extend(subtree.visited);
                scratch.shadow_roots.extend(subtree.shadow_roots);
                scratch.frame_documents.extend(subtree.frame_documents);
                scratch.failures += subtree.failures;
                scratch.adds.push(AddedNode {
                    parent_id,
                    next_id,
                    node: subtree.node,
                });
            }
            Ok(None) => {}
            Err(err) => {
                log::warn!(target: "recorder.buffer", "skipping add of {node:?}: {err}");
                mirror.exclude(node);
                scratch.failures += 1;
            }
        }
    }

    fn resolve_pending<T: HostTree<Node = N>>(
        &mut self,
        serializer: &Serializer<'_, T>,
        mirror: &mut Mirror<N>,
        peers: Peers<'_, N>,
        scratch: &mut FlushScratch<N>,
    ) {
        let tree = serializer.tree();
        let mut candidate: Option<N> = None;
        while !self.pending.is_empty() {
            let mut chosen = None;
            if let Some(c) = candidate
                && self.pending.contains(c)
                && !self.is_emitted(c, peers)
                && let Placement::Ready { parent_id, next_id } = self.locate(tree, mirror, c, peers)
            {
                chosen = Some((c, parent_id, next_id));
            }

            if chosen.is_none() {
                let entries: Vec<N> = self.pending.iter_from_tail().collect();
                for node in entries {
                    if self.is_emitted(node, peers) {
                        self.pending.remove(node);
                        continue;
                    }
                    match self.locate(tree, mirror, node, peers) {
                        Placement::Ready { parent_id, next_id } => {
                            chosen = Some((node, parent_id, next_id));
                            break;
                        }
                        Placement::Skip => {
                            log::debug!(
                                target: "recorder.buffer",
                                "dropping pending insert {node:?}: no place in the tree"
                            );
                            self.pending.remove(node);
                            scratch.dropped += 1;
                        }
                        Placement::Deferred => {}
                    }
                }
            }

            let Some((node, parent_id, next_id)) = chosen else {
                break;
            };
            candidate = self.pending.previous_of(node);
            self.pending.remove(node);
            self.emit_add(serializer, mirror, node, parent_id, next_id, scratch);
        }
    }

    fn clear_accumulation(&mut self) {
        self.texts.clear();
        self.attributes.clear();
        self.attribute_index.clear();
        self.removes.clear();
        self.removed_nodes.clear();
        self.map_removes.clear();
        self.moved.clear();
        self.moved_targets.clear();
        self.added.clear();
        self.dropped.clear();
    }
}

/// Parent as the reader sees it: shadow children hang off their host, frame
/// documents off their frame element.
fn recorded_parent<T: HostTree>(tree: &T, node: T::Node) -> Option<T::Node> {
    match tree.parent(node) {
        Some(parent) if tree.node_type(parent) == NodeType::ShadowRoot => tree.shadow_host(parent),
        Some(parent) => Some(parent),
        None if tree.node_type(node) == NodeType::Document => tree.frame_element(node),
        None => None,
    }
}

fn nearest_registered_is_excluded<T: HostTree>(
    tree: &T,
    mirror: &Mirror<T::Node>,
    node: T::Node,
) -> bool {
    let mut current = Some(node);
    while let Some(n) = current {
        if let Some(id) = mirror.id_of(n) {
            return id.is_excluded();
        }
        current = tree.composed_parent(n);
    }
    false
}

/// Current value of an attribute, reading live state for form controls.
/// The other recorded name of an iframe `src` stored under `key`.
fn frame_source_alias(tag: &str, name: &str, key: &str) -> Option<&'static str> {
    if tag != "iframe" || name != "src" {
        return None;
    }
    Some(if key == "src" { "rr_src" } else { "src" })
}

fn live_attribute<T: HostTree>(tree: &T, node: T::Node, name: &str) -> Option<String> {
    match name {
        "value" if tree.tag_name(node).is_some_and(values::is_form_control) => {
            tree.form_value(node).map(|v| v.into_owned())
        }
        "checked" if tree.is_element_named(node, "input") => {
            tree.is_checked(node).then(|| "true".to_string())
        }
        _ => tree.attribute(node, name).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dom::{Dom, MutationObserver, NodeRef, el, text};
    use snapshot::{MASK_TOKEN, PrivacyConfig, SerializeOptions, SerializeScope};

    struct Fixture {
        dom: Dom,
        doc: NodeRef,
        mirror: Mirror<NodeRef>,
        observer: MutationObserver<NodeRef>,
        buffer: MutationBuffer<NodeRef>,
        policy: PrivacyConfig,
        options: SerializeOptions,
    }

    impl Fixture {
        fn new(body: dom::NodeSpec) -> Self {
            let mut dom = Dom::new();
            let doc = dom.build_document(
                Some("https://example.com/"),
                &[el("html").child(el("body").child(body))],
            );
            let policy = PrivacyConfig::default();
            let options = SerializeOptions::default();
            let mut mirror = Mirror::new();
            Serializer::new(&dom, &policy, &options)
                .serialize(&mut mirror, doc, SerializeScope::document(&options))
                .expect("checkpoint");
            let observer = dom.observe();
            Self {
                dom,
                doc,
                mirror,
                observer,
                buffer: MutationBuffer::new(doc),
                policy,
                options,
            }
        }

        fn find(&self, id: &str) -> NodeRef {
            dom::traverse::find_element_by_id(&self.dom, self.doc, id).expect("element")
        }

        fn id(&self, node: NodeRef) -> NodeId {
            self.mirror.id_of(node).expect("registered")
        }

        fn process(&mut self, records: &[MutationRecord<NodeRef>]) {
            let serializer = Serializer::new(&self.dom, &self.policy, &self.options);
            self.buffer.process(&serializer, &self.mirror, records);
        }

        fn flush(&mut self) -> FlushOutcome<NodeRef> {
            let records = self.observer.take_records();
            self.process(&records);
            self.flush_only()
        }

        fn flush_only(&mut self) -> FlushOutcome<NodeRef> {
            let serializer = Serializer::new(&self.dom, &self.policy, &self.options);
            self.buffer.flush(&serializer, &mut self.mirror)
        }
    }

    fn sample() -> Fixture {
        Fixture::new(el("div").attr("id", "a").child(el("span").child(text("hi"))))
    }

    #[test]
    fn appended_subtree_gets_fresh_ids() {
        let mut fx = sample();
        let div = fx.find("a");
        let next_fresh = NodeId(fx.mirror.len() as u32 + 1);
        fx.dom
            .append_spec(div, &el("b").child(text("yo")))
            .expect("append");

        let batch = fx.flush().batch.expect("batch");
        assert!(batch.texts.is_empty() && batch.attributes.is_empty());
        assert!(batch.removes.is_empty());
        assert_eq!(batch.adds.len(), 1);
        let add = &batch.adds[0];
        assert_eq!(add.parent_id, fx.id(div));
        assert_eq!(add.next_id, None);
        assert_eq!(add.node.tag(), Some("b"));
        assert_eq!(add.node.id, next_fresh);
        assert_eq!(add.node.children()[0].id, next_fresh.next());
        assert_eq!(add.node.children()[0].text(), Some("yo"));
    }

    #[test]
    fn replaced_child_is_one_remove_and_one_add() {
        let mut fx = sample();
        let div = fx.find("a");
        let old_span = fx.dom.children(div)[0];
        let old_id = fx.id(old_span);
        fx.dom.remove(old_span);
        fx.dom.append_spec(div, &el("span").child(text("new"))).expect("append");

        let batch = fx.flush().batch.expect("batch");
        assert_eq!(batch.removes.len(), 1);
        assert_eq!(batch.removes[0].id, old_id);
        assert_eq!(batch.removes[0].parent_id, fx.id(div));
        assert_eq!(batch.adds.len(), 1);
        assert!(batch.adds[0].node.id > old_id);
        assert!(!fx.mirror.has(old_span));
    }

    #[test]
    fn add_then_remove_in_one_window_is_silent() {
        let mut fx = sample();
        let div = fx.find("a");
        let node = fx.dom.append_spec(div, &el("p").child(text("gone"))).expect("append");
        fx.dom.remove(node);

        let outcome = fx.flush();
        assert!(outcome.batch.is_none());
        assert!(!fx.mirror.has(node));
    }

    #[test]
    fn empty_flush_emits_nothing() {
        let mut fx = sample();
        let outcome = fx.flush();
        assert!(outcome.batch.is_none());
        assert_eq!(outcome.pending, 0);
        assert_eq!(fx.buffer.state(), BufferState::Idle);
    }

    #[test]
    fn unchanged_text_write_is_ignored() {
        let mut fx = sample();
        let div = fx.find("a");
        let span = fx.dom.children(div)[0];
        let hi = fx.dom.children(span)[0];
        fx.dom.set_character_data(hi, "hi").expect("text");
        assert!(fx.flush().batch.is_none());

        fx.dom.set_character_data(hi, "hello").expect("text");
        let batch = fx.flush().batch.expect("batch");
        assert_eq!(batch.texts.len(), 1);
        assert_eq!(batch.texts[0].id, fx.id(hi));
        assert_eq!(batch.texts[0].value, "hello");
    }

    #[test]
    fn password_typing_records_the_mask_token() {
        let mut fx = Fixture::new(el("input").attr("id", "pw").attr("type", "password"));
        let input = fx.find("pw");
        fx.dom.set_value(input, "hunter2").expect("type");

        let batch = fx.flush().batch.expect("batch");
        assert_eq!(batch.attributes.len(), 1);
        let change = &batch.attributes[0];
        assert_eq!(change.id, fx.id(input));
        assert_eq!(
            change.attributes.get("value"),
            Some(&Some(MASK_TOKEN.to_string()))
        );
        let meta = fx.mirror.meta(change.id).expect("meta");
        assert_eq!(meta.attributes.get("value").map(String::as_str), Some(MASK_TOKEN));
    }

    #[test]
    fn removed_attribute_is_recorded_as_none() {
        let mut fx = Fixture::new(el("div").attr("id", "a").attr("title", "t"));
        let div = fx.find("a");
        fx.dom.remove_attribute(div, "title").expect("remove");
        let batch = fx.flush().batch.expect("batch");
        assert_eq!(batch.attributes[0].attributes.get("title"), Some(&None));
    }

    #[test]
    fn frame_src_switching_origin_swaps_its_recorded_name() {
        let mut fx = Fixture::new(el("iframe").attr("id", "f").attr("src", "/inner"));
        let frame = fx.find("f");
        let id = fx.id(frame);
        assert!(fx.mirror.meta(id).expect("meta").attributes.contains_key("src"));

        fx.dom
            .set_attribute(frame, "src", "https://ads.example/slot")
            .expect("attr");
        let batch = fx.flush().batch.expect("batch");
        let changes = &batch.attributes[0].attributes;
        assert_eq!(
            changes.get("rr_src"),
            Some(&Some("https://ads.example/slot".to_string()))
        );
        assert_eq!(changes.get("src"), Some(&None));

        fx.dom.set_attribute(frame, "src", "/back").expect("attr");
        let batch = fx.flush().batch.expect("batch");
        let changes = &batch.attributes[0].attributes;
        assert_eq!(
            changes.get("src"),
            Some(&Some("https://example.com/back".to_string()))
        );
        assert_eq!(changes.get("rr_src"), Some(&None));
        let meta = fx.mirror.meta(id).expect("meta");
        assert!(!meta.attributes.contains_key("rr_src"));
    }

    #[test]
    fn failing_add_is_skipped_and_the_rest_of_the_batch_ships() {
        let mut fx = sample();
        fx.options.record_canvas = true;
        let div = fx.find("a");
        fx.dom.append_spec(div, &el("p").child(text("ok"))).expect("append");
        let canvas = fx.dom.build(&el("canvas"));
        fx.dom
            .set_canvas(canvas, Err(dom::HostError::Tainted))
            .expect("canvas");
        fx.dom.append_child(div, canvas).expect("append");

        let outcome = fx.flush();
        assert_eq!(outcome.serialization_failures, 1);
        let batch = outcome.batch.expect("batch");
        assert_eq!(batch.adds.len(), 1);
        assert_eq!(batch.adds[0].node.tag(), Some("p"));
        assert_eq!(batch.adds[0].parent_id, fx.id(div));
        assert!(fx.mirror.is_excluded(canvas));
    }

    #[test]
    fn textarea_text_becomes_a_value_change() {
        let mut fx = Fixture::new(el("textarea").attr("id", "t").child(text("draft")));
        let area = fx.find("t");
        let inner = fx.dom.children(area)[0];
        fx.dom.set_character_data(inner, "final").expect("text");

        let batch = fx.flush().batch.expect("batch");
        assert!(batch.texts.is_empty());
        assert_eq!(batch.attributes.len(), 1);
        assert_eq!(batch.attributes[0].id, fx.id(area));
        assert_eq!(
            batch.attributes[0].attributes.get("value"),
            Some(&Some("final".to_string()))
        );
    }

    #[test]
    fn changes_inside_blocked_elements_are_ignored() {
        let mut fx = Fixture::new(
            el("div")
                .attr("id", "b")
                .attr("class", "rr-block")
                .child(el("p").child(text("secret"))),
        );
        let blocked = fx.find("b");
        let p = fx.dom.children(blocked)[0];
        let secret = fx.dom.children(p)[0];
        fx.dom.set_character_data(secret, "still secret").expect("text");
        fx.dom.append_spec(blocked, &el("i")).expect("append");
        fx.dom.set_attribute(p, "title", "x").expect("attr");
        assert!(fx.flush().batch.is_none());
    }

    #[test]
    fn moved_node_keeps_its_id_and_is_removed_first() {
        let mut fx = Fixture::new(
            el("div")
                .child(el("ul").attr("id", "from").child(el("li").attr("id", "item")))
                .child(el("ul").attr("id", "to")),
        );
        let item = fx.find("item");
        let to = fx.find("to");
        let item_id = fx.id(item);
        fx.dom.append_child(to, item).expect("move");

        let batch = fx.flush().batch.expect("batch");
        assert_eq!(batch.removes.len(), 1);
        assert_eq!(batch.removes[0].id, item_id);
        assert_eq!(batch.adds.len(), 1);
        assert_eq!(batch.adds[0].parent_id, fx.id(to));
        assert_eq!(batch.adds[0].node.id, item_id);
        assert!(fx.mirror.has(item));
    }

    #[test]
    fn changes_on_added_nodes_ride_on_the_add() {
        let mut fx = sample();
        let div = fx.find("a");
        let node = fx.dom.append_spec(div, &el("em").child(text("one"))).expect("append");
        let inner = fx.dom.children(node)[0];
        fx.dom.set_attribute(node, "class", "x").expect("attr");
        fx.dom.set_character_data(inner, "two").expect("text");

        let batch = fx.flush().batch.expect("batch");
        assert!(batch.texts.is_empty());
        assert!(batch.attributes.is_empty());
        assert_eq!(batch.adds[0].node.attribute("class"), Some("x"));
        assert_eq!(batch.adds[0].node.children()[0].text(), Some("two"));
    }

    #[test]
    fn siblings_added_out_of_order_resolve_through_pending() {
        let mut fx = sample();
        let div = fx.find("a");
        let first = fx.dom.append_spec(div, &el("i")).expect("append");
        let second = fx.dom.append_spec(div, &el("u")).expect("append");
        // Re-appending `first` puts it after `second`, which now points at it.
        fx.dom.append_child(div, first).expect("move");

        let batch = fx.flush().batch.expect("batch");
        assert!(batch.removes.is_empty());
        assert_eq!(batch.adds.len(), 2);
        assert_eq!(batch.adds[0].node.tag(), Some("i"));
        assert_eq!(batch.adds[0].next_id, None);
        assert_eq!(batch.adds[1].node.tag(), Some("u"));
        assert_eq!(batch.adds[1].next_id, Some(fx.id(first)));
        assert!(fx.mirror.has(second));
    }

    #[test]
    fn insert_with_unknown_parent_waits_across_flushes() {
        let mut fx = sample();
        let div = fx.find("a");
        let parent = fx.dom.append_spec(div, &el("section")).expect("append");
        let child = fx.dom.append_spec(parent, &el("h2")).expect("append");
        let records = fx.observer.take_records();

        // Only the child's notification arrives in this window.
        fx.process(&records[1..]);
        let outcome = fx.flush_only();
        assert!(outcome.batch.is_none());
        assert_eq!(outcome.pending, 1);

        fx.process(&records[..1]);
        let outcome = fx.flush_only();
        let batch = outcome.batch.expect("batch");
        assert_eq!(batch.adds.len(), 1);
        assert_eq!(batch.adds[0].node.children()[0].id, fx.id(child));
        assert_eq!(outcome.pending, 0);
    }

    #[test]
    fn detached_pending_insert_is_dropped() {
        let mut fx = sample();
        let div = fx.find("a");
        let parent = fx.dom.append_spec(div, &el("section")).expect("append");
        fx.dom.append_spec(parent, &el("h2")).expect("append");
        let records = fx.observer.take_records();
        fx.process(&records[1..]);
        assert_eq!(fx.flush_only().pending, 1);

        fx.dom.remove(parent);
        let outcome = fx.flush();
        assert_eq!(outcome.dropped_pending, 1);
        assert_eq!(outcome.pending, 0);
        assert!(outcome.batch.is_none());
    }

    #[test]
    fn frozen_buffer_accumulates_but_reports_it_cannot_flush() {
        let mut fx = sample();
        fx.buffer.freeze();
        assert!(!fx.buffer.can_flush());
        let div = fx.find("a");
        fx.dom.append_spec(div, &el("b")).expect("append");
        let records = fx.observer.take_records();
        fx.process(&records);
        assert!(fx.buffer.has_changes());
        assert_eq!(fx.buffer.state(), BufferState::Accumulating);

        fx.buffer.unfreeze();
        assert!(fx.buffer.can_flush());
        assert_eq!(fx.flush_only().batch.expect("batch").adds.len(), 1);
    }

    #[test]
    fn reset_discards_accumulated_changes() {
        let mut fx = sample();
        let div = fx.find("a");
        fx.dom.append_spec(div, &el("b")).expect("append");
        let records = fx.observer.take_records();
        fx.process(&records);
        fx.buffer.reset();
        assert!(!fx.buffer.has_changes());
        assert!(fx.flush_only().batch.is_none());
    }
}
