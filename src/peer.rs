use std::fmt;

/// Identity of a remote device on the local fabric.
///
/// A peer is addressed by its node identifier scoped to a compressed fabric
/// identifier; together they determine the host name to resolve. The pair is
/// only ever used as a lookup key; the scheduling logic does not interpret
/// either field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey {
    node_id: u64,
    compressed_fabric_id: u64,
}

impl PeerKey {
    pub const fn new(node_id: u64, compressed_fabric_id: u64) -> Self {
        Self {
            node_id,
            compressed_fabric_id,
        }
    }

    pub const fn node_id(&self) -> u64 {
        self.node_id
    }

    pub const fn compressed_fabric_id(&self) -> u64 {
        self.compressed_fabric_id
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}:{:016X}", self.compressed_fabric_id, self.node_id)
    }
}
