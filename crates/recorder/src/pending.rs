//! Ordered list of nodes waiting for their parent or next sibling to become
//! known to the reader.
//!
//! Entries are threaded by document position: a node goes right after its
//! pending previous sibling, else right before its pending next sibling, else
//! at the head. Resolution scans from the tail so that a run of siblings
//! resolves last-to-first, each one supplying the next id of its predecessor.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Slot<N> {
    node: N,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct PendingInserts<N> {
    slots: Vec<Option<Slot<N>>>,
    free: Vec<usize>,
    index: HashMap<N, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<N: Copy + Eq + Hash> PendingInserts<N> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, node: N) -> bool {
        self.index.contains_key(&node)
    }

    /// Insert `node` given its current host siblings. Returns false if the
    /// node is already pending.
    pub fn insert(&mut self, node: N, previous: Option<N>, next: Option<N>) -> bool {
        if self.contains(node) {
            return false;
        }
        let at = self.alloc(node);
        if let Some(prev_slot) = previous.and_then(|p| self.index.get(&p).copied()) {
            self.link_after(prev_slot, at);
        } else if let Some(next_slot) = next.and_then(|n| self.index.get(&n).copied()) {
            self.link_before(next_slot, at);
        } else {
            self.link_head(at);
        }
        self.index.insert(node, at);
        true
    }

    pub fn remove(&mut self, node: N) -> bool {
        let Some(at) = self.index.remove(&node) else {
            return false;
        };
        let Some(slot) = self.slots[at].take() else {
            return false;
        };
        match slot.prev {
            Some(p) => self.slot_mut(p).next = slot.next,
            None => self.head = slot.next,
        }
        match slot.next {
            Some(n) => self.slot_mut(n).prev = slot.prev,
            None => self.tail = slot.prev,
        }
        self.free.push(at);
        true
    }

    pub fn head(&self) -> Option<N> {
        self.head.map(|at| self.slot(at).node)
    }

    pub fn tail(&self) -> Option<N> {
        self.tail.map(|at| self.slot(at).node)
    }

    /// Entry before `node` in list order.
    pub fn previous_of(&self, node: N) -> Option<N> {
        let at = *self.index.get(&node)?;
        self.slot(at).prev.map(|p| self.slot(p).node)
    }

    /// Entries from tail to head.
    pub fn iter_from_tail(&self) -> impl Iterator<Item = N> + '_ {
        let mut cursor = self.tail;
        std::iter::from_fn(move || {
            let at = cursor?;
            let slot = self.slot(at);
            cursor = slot.prev;
            Some(slot.node)
        })
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    fn alloc(&mut self, node: N) -> usize {
        let slot = Slot {
            node,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(at) => {
                self.slots[at] = Some(slot);
                at
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    fn link_head(&mut self, at: usize) {
        let old_head = self.head;
        {
            let slot = self.slot_mut(at);
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => self.slot_mut(h).prev = Some(at),
            None => self.tail = Some(at),
        }
        self.head = Some(at);
    }

    fn link_after(&mut self, anchor: usize, at: usize) {
        let after = self.slot(anchor).next;
        {
            let slot = self.slot_mut(at);
            slot.prev = Some(anchor);
            slot.next = after;
        }
        self.slot_mut(anchor).next = Some(at);
        match after {
            Some(n) => self.slot_mut(n).prev = Some(at),
            None => self.tail = Some(at),
        }
    }

    fn link_before(&mut self, anchor: usize, at: usize) {
        match self.slot(anchor).prev {
            Some(p) => self.link_after(p, at),
            None => self.link_head(at),
        }
    }

    // Linked slots are always occupied.
    fn slot(&self, at: usize) -> &Slot<N> {
        match &self.slots[at] {
            Some(slot) => slot,
            None => unreachable!("pending list links a free slot"),
        }
    }

    fn slot_mut(&mut self, at: usize) -> &mut Slot<N> {
        match &mut self.slots[at] {
            Some(slot) => slot,
            None => unreachable!("pending list links a free slot"),
        }
    }
}

impl<N: Copy + Eq + Hash> Default for PendingInserts<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(list: &PendingInserts<u32>) -> Vec<u32> {
        let mut out: Vec<u32> = list.iter_from_tail().collect();
        out.reverse();
        out
    }

    #[test]
    fn threads_by_sibling_position() {
        let mut list = PendingInserts::new();
        // siblings a=1, b=2, c=3 in document order
        assert!(list.insert(2, Some(1), Some(3)));
        assert!(list.insert(1, None, Some(2)));
        assert!(list.insert(3, Some(2), None));
        assert_eq!(order(&list), vec![1, 2, 3]);
        assert_eq!(list.tail(), Some(3));
        assert_eq!(list.previous_of(3), Some(2));
        assert_eq!(list.previous_of(1), None);
    }

    #[test]
    fn unrelated_nodes_go_to_head() {
        let mut list = PendingInserts::new();
        list.insert(10, None, None);
        list.insert(20, None, None);
        assert_eq!(order(&list), vec![20, 10]);
        assert!(!list.insert(10, None, None), "duplicates are ignored");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_relinks_and_reuses_slots() {
        let mut list = PendingInserts::new();
        list.insert(1, None, None);
        list.insert(2, Some(1), None);
        list.insert(3, Some(2), None);
        assert!(list.remove(2));
        assert!(!list.remove(2));
        assert_eq!(order(&list), vec![1, 3]);
        list.insert(4, Some(3), None);
        assert_eq!(order(&list), vec![1, 3, 4]);
        assert_eq!(list.slots.len(), 3);
        assert!(list.remove(1));
        assert!(list.remove(4));
        assert_eq!(list.head(), Some(3));
        assert_eq!(list.tail(), Some(3));
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.tail(), None);
    }
}
