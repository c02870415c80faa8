use core_types::NodeId;
use snapshot::SerializeError;
use std::fmt;

/// API misuse or an unrecordable document.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordError {
    AlreadyStarted,
    NotRecording,
    NotADocument,
    /// The frame element handed to frame ingestion has no id in this session.
    UnknownFrame,
    Checkpoint(SerializeError),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::AlreadyStarted => f.write_str("recording already started"),
            RecordError::NotRecording => f.write_str("recorder is not recording"),
            RecordError::NotADocument => f.write_str("recording root is not a document"),
            RecordError::UnknownFrame => f.write_str("frame element is not recorded"),
            RecordError::Checkpoint(err) => write!(f, "checkpoint failed: {err}"),
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordError::Checkpoint(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SerializeError> for RecordError {
    fn from(err: SerializeError) -> Self {
        RecordError::Checkpoint(err)
    }
}

/// Conditions handled inside the recorder. None of them stops a flush or
/// the session; each is logged and counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovered {
    /// An event referred to a node excluded from the recording.
    PolicyViolation(NodeId),
    /// Subtrees left out of a patch because the host could not read them.
    SerializationFailure(usize),
    /// A buffer carried more pending inserts than allowed.
    CapacityExceeded { pending: usize },
}

impl fmt::Display for Recovered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recovered::PolicyViolation(id) => write!(f, "event for excluded node {id} dropped"),
            Recovered::SerializationFailure(count) => {
                write!(f, "{count} subtree(s) could not be serialized")
            }
            Recovered::CapacityExceeded { pending } => {
                write!(f, "{pending} pending inserts outstanding")
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub checkpoints: u64,
    pub forced_checkpoints: u64,
    pub patches: u64,
    pub auxiliary_events: u64,
    /// Auxiliary events dropped because their node is unknown or excluded.
    pub dropped_events: u64,
    pub policy_violations: u64,
    pub serialization_failures: u64,
    /// Pending inserts dropped because they left the document or could never
    /// be placed.
    pub dropped_pending: u64,
    pub capacity_exceeded: u64,
}

impl RecorderStats {
    pub fn note(&mut self, recovered: Recovered) {
        match recovered {
            Recovered::PolicyViolation(_) => self.policy_violations += 1,
            Recovered::SerializationFailure(count) => self.serialization_failures += count as u64,
            Recovered::CapacityExceeded { .. } => self.capacity_exceeded += 1,
        }
    }
}
