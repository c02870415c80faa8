use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a recorded node within one recording session.
///
/// Ids are minted by the session's registry in increasing order and are never
/// handed to a second node while the session lives.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Reserved sentinel for nodes deliberately left out of the output.
    pub const EXCLUDED: NodeId = NodeId(0);

    /// First id handed out by a fresh registry.
    pub const FIRST: NodeId = NodeId(1);

    pub fn is_excluded(self) -> bool {
        self == Self::EXCLUDED
    }

    pub fn next(self) -> NodeId {
        NodeId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_excluded() {
            f.write_str("#excluded")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Milliseconds since the start of a (possibly resumed) recording session.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_sentinel_is_not_a_real_id() {
        assert!(NodeId::EXCLUDED.is_excluded());
        assert!(!NodeId::FIRST.is_excluded());
        assert_eq!(NodeId::FIRST.next(), NodeId(2));
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&NodeId(7)).expect("serialize id");
        assert_eq!(json, "7");
        let ts: Timestamp = serde_json::from_str("1500").expect("deserialize ts");
        assert_eq!(ts.saturating_since(Timestamp(500)), 1000);
    }
}
