//! Change notifications delivered by a live tree.
//!
//! Records follow the shape of DOM mutation records: one record per
//! attribute write, character-data write or child-list change, carrying the
//! old value where one exists. A move is reported as a removal from the old
//! parent followed by an addition to the new one.

use std::sync::mpsc::{Receiver, Sender, channel};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationRecord<N> {
    pub target: N,
    pub kind: MutationKind<N>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationKind<N> {
    Attributes {
        name: String,
        old_value: Option<String>,
    },
    CharacterData {
        old_value: Option<String>,
    },
    ChildList {
        added: Vec<N>,
        removed: Vec<N>,
        previous_sibling: Option<N>,
        next_sibling: Option<N>,
    },
}

impl<N> MutationRecord<N> {
    pub fn attributes(target: N, name: impl Into<String>, old_value: Option<String>) -> Self {
        Self {
            target,
            kind: MutationKind::Attributes {
                name: name.into(),
                old_value,
            },
        }
    }

    pub fn character_data(target: N, old_value: Option<String>) -> Self {
        Self {
            target,
            kind: MutationKind::CharacterData { old_value },
        }
    }

    pub fn added(target: N, node: N, previous_sibling: Option<N>, next_sibling: Option<N>) -> Self {
        Self {
            target,
            kind: MutationKind::ChildList {
                added: vec![node],
                removed: Vec::new(),
                previous_sibling,
                next_sibling,
            },
        }
    }

    pub fn removed(
        target: N,
        node: N,
        previous_sibling: Option<N>,
        next_sibling: Option<N>,
    ) -> Self {
        Self {
            target,
            kind: MutationKind::ChildList {
                added: Vec::new(),
                removed: vec![node],
                previous_sibling,
                next_sibling,
            },
        }
    }
}

/// Receiving end of a tree's notification queue.
///
/// Records accumulate until [`MutationObserver::take_records`] drains them;
/// dropping the observer disconnects it.
#[derive(Debug)]
pub struct MutationObserver<N> {
    rx: Receiver<MutationRecord<N>>,
}

impl<N> MutationObserver<N> {
    pub(crate) fn pair() -> (Sender<MutationRecord<N>>, Self) {
        let (tx, rx) = channel();
        (tx, Self { rx })
    }

    pub fn take_records(&self) -> Vec<MutationRecord<N>> {
        self.rx.try_iter().collect()
    }
}
