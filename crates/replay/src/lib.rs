//! Downstream reader for recorded sessions: applies checkpoints and patches
//! to an id-keyed tree and materializes it back into a [`SnapshotNode`].
//!
//! [`SnapshotNode`]: snapshot::SnapshotNode

pub mod replayer;

pub use replayer::{ReplayError, Replayer, replay};
