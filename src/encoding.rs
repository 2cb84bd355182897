//! The JSON update codec.
//!
//! An update message carries every block of the sending replica keyed by
//! client, plus the full delete set it has observed. Neighbour links are
//! positional and never serialised; the receiver reconstructs them by
//! integrating each block. Sentinel origins go on the wire as
//! `{"client": 0, "clock": 0}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;

use crate::common::{BlockId, ClientId, Clock};
use crate::error::Result;
use crate::store::BlockStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireBlock {
    pub id: BlockId,
    pub content: SmartString,
    /// Clock width of the block. Matches the char count of `content` for
    /// live blocks; carries the original width for tombstones, whose content
    /// is gone.
    pub len: u64,
    pub is_deleted: bool,
    pub left_origin: BlockId,
    pub right_origin: BlockId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct WireDeleteRange {
    pub start_clock: Clock,
    pub delete_length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireClientDeletes {
    pub client: ClientId,
    pub deleted_ranges: Vec<WireDeleteRange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct WireDeleteSet {
    pub num_clients: u64,
    pub client_deletes: Vec<WireClientDeletes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct UpdateMessage {
    #[serde(default)]
    pub updates: BTreeMap<ClientId, Vec<WireBlock>>,
    #[serde(default)]
    pub deletes: WireDeleteSet,
}

pub(crate) fn decode_update(bytes: &[u8]) -> Result<UpdateMessage> {
    Ok(serde_json::from_slice(bytes)?)
}

impl BlockStore {
    /// Serialise the whole store (tombstones included) plus the delete set
    /// as one update message. Applying it to any replica, including a fresh
    /// one, reproduces this replica's visible text.
    pub fn encode_state_as_update(&self) -> Result<Vec<u8>> {
        let mut updates: BTreeMap<ClientId, Vec<WireBlock>> = BTreeMap::new();
        for (client, list) in &self.client_blocks {
            let wire = list
                .iter()
                .map(|&i| {
                    let b = &self.blocks[i];
                    WireBlock {
                        id: b.id,
                        content: b.content.clone(),
                        len: b.len,
                        is_deleted: b.deleted,
                        left_origin: b.left_origin,
                        right_origin: b.right_origin,
                    }
                })
                .collect();
            updates.insert(*client, wire);
        }

        let client_deletes: Vec<WireClientDeletes> = self
            .delete_set
            .iter()
            .map(|(client, ranges)| WireClientDeletes {
                client,
                deleted_ranges: ranges
                    .iter()
                    .map(|r| WireDeleteRange {
                        start_clock: r.clock,
                        delete_length: r.len,
                    })
                    .collect(),
            })
            .collect();

        let msg = UpdateMessage {
            updates,
            deletes: WireDeleteSet {
                num_clients: self.delete_set.num_clients() as u64,
                client_deletes,
            },
        };
        Ok(serde_json::to_vec(&msg)?)
    }

    /// The state vector: next expected clock per known client.
    pub fn encode_state_vector(&self) -> BTreeMap<ClientId, Clock> {
        self.state_vector.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn empty_store_round_trips() {
        let s = BlockStore::new(1);
        let bytes = s.encode_state_as_update().unwrap();
        let msg = decode_update(&bytes).unwrap();
        assert!(msg.updates.is_empty());
        assert_eq!(msg.deletes.num_clients, 0);
    }

    #[test]
    fn blocks_and_deletes_round_trip() {
        let mut s = BlockStore::new(7);
        s.insert(0, "hello").unwrap();
        s.delete(1, 2).unwrap();
        let bytes = s.encode_state_as_update().unwrap();
        let msg = decode_update(&bytes).unwrap();

        let blocks = &msg.updates[&7];
        assert_eq!(blocks.len(), 3);
        // Tombstones keep their clock width with the content gone.
        let tomb = blocks.iter().find(|b| b.is_deleted).unwrap();
        assert_eq!(tomb.id, BlockId::new(7, 1));
        assert_eq!(tomb.len, 2);
        assert!(tomb.content.is_empty());

        assert_eq!(msg.deletes.num_clients, 1);
        let cd = &msg.deletes.client_deletes[0];
        assert_eq!(cd.client, 7);
        assert_eq!(cd.deleted_ranges[0].start_clock, 1);
        assert_eq!(cd.deleted_ranges[0].delete_length, 2);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_update(b"{not valid json}").unwrap_err(),
            Error::InvalidUpdate(_)
        ));
        assert!(matches!(
            decode_update(b"").unwrap_err(),
            Error::InvalidUpdate(_)
        ));
    }

    #[test]
    fn state_vector_reports_next_clock() {
        let mut s = BlockStore::new(3);
        s.insert(0, "abcd").unwrap();
        let sv = s.encode_state_vector();
        assert_eq!(sv.get(&3), Some(&4));
    }
}
