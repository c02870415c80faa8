//! Node identity registry.
//!
//! Maps host node handles to session ids and back. Host nodes are never
//! owned; an entry disappears only through [`Mirror::forget`],
//! [`Mirror::begin_generation`] or [`Mirror::reset`].

use core_types::NodeId;
use dom::{HostTree, NodeType};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeMeta {
    pub node_type: NodeType,
    pub tag: Option<String>,
    /// Attribute values as last written to the log.
    pub attributes: BTreeMap<String, String>,
    pub is_shadow: bool,
    pub root_id: Option<NodeId>,
    pub generation: u32,
}

impl NodeMeta {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            tag: None,
            attributes: BTreeMap::new(),
            is_shadow: false,
            root_id: None,
            generation: 0,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum MirrorError {
    AlreadyRegistered(NodeId),
    IdInUse(NodeId),
    ReservedId,
    Retired(NodeId),
    UnknownId(NodeId),
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorError::AlreadyRegistered(id) => write!(f, "node is already registered as {id}"),
            MirrorError::IdInUse(id) => write!(f, "id {id} is bound to another node"),
            MirrorError::ReservedId => f.write_str("the excluded sentinel cannot be registered"),
            MirrorError::Retired(id) => write!(f, "id {id} was retired in this session"),
            MirrorError::UnknownId(id) => write!(f, "id {id} is not bound"),
        }
    }
}

impl std::error::Error for MirrorError {}

#[derive(Debug)]
struct Entry<N> {
    node: N,
    meta: NodeMeta,
}

#[derive(Debug)]
pub struct Mirror<N> {
    ids: HashMap<N, NodeId>,
    // Indexed by id; slot 0 belongs to the sentinel and stays empty.
    entries: Vec<Option<Entry<N>>>,
    // Ids unbound since the last reset; never handed out again.
    retired: HashSet<NodeId>,
    next_id: u32,
    generation: u32,
}

impl<N: Copy + Eq + Hash> Mirror<N> {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            entries: vec![None],
            retired: HashSet::new(),
            next_id: NodeId::FIRST.0,
            generation: 0,
        }
    }

    pub fn id_of(&self, node: N) -> Option<NodeId> {
        self.ids.get(&node).copied()
    }

    /// Node bound to `id`. The sentinel never resolves.
    pub fn node_of(&self, id: NodeId) -> Option<N> {
        self.entry(id).map(|e| e.node)
    }

    pub fn has(&self, node: N) -> bool {
        self.ids.contains_key(&node)
    }

    pub fn is_excluded(&self, node: N) -> bool {
        self.id_of(node).is_some_and(NodeId::is_excluded)
    }

    pub fn meta(&self, id: NodeId) -> Option<&NodeMeta> {
        self.entry(id).map(|e| &e.meta)
    }

    pub fn meta_mut(&mut self, id: NodeId) -> Option<&mut NodeMeta> {
        self.entries
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .map(|e| &mut e.meta)
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Number of nodes bound to a real id.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub fn register(&mut self, node: N, id: NodeId, mut meta: NodeMeta) -> Result<(), MirrorError> {
        if let Some(existing) = self.id_of(node) {
            return Err(MirrorError::AlreadyRegistered(existing));
        }
        if id.is_excluded() {
            return Err(MirrorError::ReservedId);
        }
        let slot = id.0 as usize;
        if self.entries.get(slot).is_some_and(Option::is_some) {
            return Err(MirrorError::IdInUse(id));
        }
        if self.retired.contains(&id) {
            return Err(MirrorError::Retired(id));
        }
        if self.entries.len() <= slot {
            self.entries.resize_with(slot + 1, || None);
        }
        meta.generation = self.generation;
        self.entries[slot] = Some(Entry { node, meta });
        self.ids.insert(node, id);
        if id.0 >= self.next_id {
            self.next_id = id.0.wrapping_add(1);
        }
        Ok(())
    }

    /// Bind `node` to the sentinel, dropping any real id it held.
    pub fn exclude(&mut self, node: N) {
        if let Some(id) = self.ids.insert(node, NodeId::EXCLUDED) {
            self.retire(id);
        }
    }

    /// Rebind `id` to a node that physically replaced its previous holder.
    pub fn replace(&mut self, id: NodeId, new_node: N) -> Result<(), MirrorError> {
        if let Some(existing) = self.id_of(new_node)
            && existing != id
        {
            return Err(MirrorError::AlreadyRegistered(existing));
        }
        let entry = self
            .entries
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(MirrorError::UnknownId(id))?;
        let old = std::mem::replace(&mut entry.node, new_node);
        self.ids.remove(&old);
        self.ids.insert(new_node, id);
        Ok(())
    }

    /// Drop a single node without touching its descendants.
    pub fn remove(&mut self, node: N) -> Option<NodeId> {
        let id = self.ids.remove(&node)?;
        self.retire(id);
        Some(id)
    }

    /// Drop `node` and everything beneath it, including shadow trees and
    /// loaded frame documents.
    pub fn forget<T: HostTree<Node = N>>(&mut self, tree: &T, node: N) {
        self.remove(node);
        for child in tree.children(node) {
            self.forget(tree, *child);
        }
        if let Some(shadow) = tree.shadow_root(node) {
            self.forget(tree, shadow);
        }
        if let Ok(Some(document)) = tree.content_document(node) {
            self.forget(tree, document);
        }
    }

    /// Start a new session: all bindings go and ids restart at the first id.
    pub fn reset(&mut self) {
        self.ids.clear();
        self.entries.clear();
        self.entries.push(None);
        self.retired.clear();
        self.next_id = NodeId::FIRST.0;
        self.generation = 0;
    }

    /// Start a checkpoint generation. Connected nodes keep their ids; entries
    /// of nodes that left the document are retired.
    pub fn begin_generation<T: HostTree<Node = N>>(&mut self, tree: &T) {
        self.generation = self.generation.wrapping_add(1);
        let entries = &mut self.entries;
        let retired = &mut self.retired;
        self.ids.retain(|node, id| {
            let keep = tree.is_connected(*node);
            if !keep && !id.is_excluded() {
                if let Some(slot) = entries.get_mut(id.0 as usize) {
                    *slot = None;
                }
                retired.insert(*id);
            }
            keep
        });
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_some())
            .map(|(i, _)| NodeId(i as u32))
    }

    fn retire(&mut self, id: NodeId) {
        if id.is_excluded() {
            return;
        }
        if let Some(slot) = self.entries.get_mut(id.0 as usize) {
            *slot = None;
        }
        self.retired.insert(id);
    }

    fn entry(&self, id: NodeId) -> Option<&Entry<N>> {
        self.entries.get(id.0 as usize).and_then(Option::as_ref)
    }
}

impl<N: Copy + Eq + Hash> Default for Mirror<N> {
    fn default() -> Self {
        Self::new()
    }
}
