use serde::{Deserialize, Serialize};

/// Replicas are identified by a non-zero integer, chosen randomly at document
/// creation. Client 0 is reserved for [`ORIGIN_NONE`].
pub type ClientId = u64;

/// Per-client monotonically increasing counter. A client's nth inserted
/// character has clock n (starting from 0), so `(client, clock)` names every
/// character ever inserted, globally and uniquely.
pub type Clock = u64;

/// Identifier of a single inserted character: the id of a multi-character
/// block is the id of its first character, and the block covers
/// `clock .. clock + len`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId {
    pub client: ClientId,
    pub clock: Clock,
}

/// "No such neighbour". Used as the left origin of blocks inserted at the
/// very start of the document, and as the right origin of blocks inserted at
/// the very end. Serialised as-is on the wire.
pub const ORIGIN_NONE: BlockId = BlockId { client: 0, clock: 0 };

impl BlockId {
    pub fn new(client: ClientId, clock: Clock) -> Self {
        BlockId { client, clock }
    }

    /// True if this id is the [`ORIGIN_NONE`] sentinel.
    pub fn is_none(&self) -> bool {
        *self == ORIGIN_NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel() {
        assert!(ORIGIN_NONE.is_none());
        assert!(!BlockId::new(1, 0).is_none());
        // Clock 0 of a real client is a valid character id.
        assert!(!BlockId::new(7, 0).is_none());
    }

    #[test]
    fn same_client_ordered_by_clock() {
        let a = BlockId::new(3, 1);
        let b = BlockId::new(3, 9);
        assert!(a < b);
    }
}
