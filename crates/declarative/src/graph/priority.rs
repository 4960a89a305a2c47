//! Stable scheduling priority for graph vertices

use crate::types::ResourceRef;
use std::fmt;

/// Ordering key used to pick among simultaneously ready vertices
///
/// The rank is a digest of the resource reference, so the order does not
/// depend on declaration order and stays the same from run to run for an
/// unchanged catalog. Ties on the rank are broken by the reference itself.
/// Resources generated at run time inherit the rank of the resource that
/// produced them so they are applied next to it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority {
    rank: u64,
    key: String,
}

impl Priority {
    /// Priority derived from the reference alone
    pub fn for_ref(reference: &ResourceRef) -> Self {
        let key = reference.to_string();
        Self {
            rank: digest(&key),
            key,
        }
    }

    /// Priority of a resource generated by (or contained in) `parent`
    pub fn inherited(parent: &Priority, reference: &ResourceRef) -> Self {
        Self {
            rank: parent.rank,
            key: reference.to_string(),
        }
    }

    pub fn rank(&self) -> u64 {
        self.rank
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{}", self.rank, self.key)
    }
}

/// First eight bytes of the blake3 hash, big-endian
fn digest(key: &str) -> u64 {
    let hash = blake3::hash(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(bytes)
}
