//! Applying remote updates.
//!
//! Incoming blocks are flattened, ordered by clock and integrated one at a
//! time. A block can arrive before its dependencies (origins we haven't
//! seen, or a gap in its author's clock sequence); such blocks are parked
//! and retried at the end of the call and on every later update. Delete
//! ranges work the same way: the part of a range our state covers applies
//! immediately, the rest parks.
//!
//! Applying any update is idempotent: blocks whose range the state vector
//! already covers are dropped, and re-deleting a tombstone is a no-op.

use tracing::{debug, trace};

use crate::block::{str_char_len, Block, BlockIdx};
use crate::common::{BlockId, ClientId, Clock};
use crate::deleteset::DeleteRange;
use crate::encoding::{decode_update, UpdateMessage, WireBlock};
use crate::error::{Error, Result};
use crate::events::EventType;

use crate::store::BlockStore;

impl BlockStore {
    /// Parse and apply one update message. Unparseable input fails with
    /// [`Error::InvalidUpdate`] and leaves the store untouched.
    pub fn apply_update(&mut self, bytes: &[u8]) -> Result<()> {
        let msg = decode_update(bytes)?;
        self.apply_decoded(msg)
    }

    fn apply_decoded(&mut self, msg: UpdateMessage) -> Result<()> {
        // Block phase: everything in the message plus whatever previous
        // updates left parked, in clock order. Each integrated block can
        // unblock parked ones (origin chains span clients), so keep passing
        // over the parked set until a pass makes no progress.
        let mut queue: Vec<WireBlock> = Vec::new();
        for (_client, blocks) in msg.updates {
            queue.extend(blocks);
        }
        queue.append(&mut self.pending_blocks);
        queue.sort_by_key(|b| b.id.clock);

        loop {
            let before = queue.len();
            let mut deferred = Vec::new();
            self.integrate_queue(queue, &mut deferred)?;
            // Deferring keeps the clock order, so no re-sort.
            queue = deferred;
            if queue.is_empty() || queue.len() == before {
                break;
            }
        }

        // Delete phase. Deletes never advance the state vector, so one pass
        // after the blocks settle is enough.
        let mut ranges: Vec<(ClientId, DeleteRange)> = std::mem::take(&mut self.pending_deletes);
        for cd in msg.deletes.client_deletes {
            for r in cd.deleted_ranges {
                ranges.push((
                    cd.client,
                    DeleteRange {
                        clock: r.start_clock,
                        len: r.delete_length,
                    },
                ));
            }
        }
        let deferred_dels = self.apply_delete_ranges(ranges)?;

        debug!(
            pending_blocks = queue.len(),
            pending_deletes = deferred_dels.len(),
            "update applied"
        );
        self.pending_blocks = queue;
        self.pending_deletes = deferred_dels;

        // Remote integration moves blocks in ways the marker shift can't
        // track; drop the cache and let the next lookup re-seed.
        self.markers.clear();
        Ok(())
    }

    fn integrate_queue(
        &mut self,
        queue: Vec<WireBlock>,
        deferred: &mut Vec<WireBlock>,
    ) -> Result<()> {
        for wb in queue {
            let state = self.state(wb.id.client);
            let blen = if wb.is_deleted {
                wb.len
            } else {
                str_char_len(&wb.content)
            };

            if wb.id.clock > state {
                // We're missing a prefix of this client's blocks.
                trace!(client = wb.id.client, clock = wb.id.clock, "parking block");
                deferred.push(wb);
                continue;
            }
            let offset = state - wb.id.clock;
            if blen > 0 && offset >= blen {
                continue; // fully integrated already
            }
            if blen == 0 && offset > 0 {
                continue; // zero-length block we already know about
            }
            if let Some(missing) = self.missing(&wb) {
                trace!(
                    client = wb.id.client,
                    clock = wb.id.clock,
                    missing,
                    "parking block on missing origin"
                );
                deferred.push(wb);
                continue;
            }

            let left = self.resolve_left(wb.left_origin)?;
            let right = self.resolve_right(wb.right_origin)?;
            let block = Block {
                id: wb.id,
                // Tombstones carry no content, whatever the sender put there.
                content: if wb.is_deleted {
                    Default::default()
                } else {
                    wb.content
                },
                len: blen,
                deleted: wb.is_deleted,
                left_origin: wb.left_origin,
                right_origin: wb.right_origin,
                left,
                right,
            };
            self.integrate(block, offset)?;
        }
        Ok(())
    }

    /// The client whose state is too old to resolve this block's origins, if
    /// any. Origins into the block's own client need no check: same-client
    /// blocks integrate in clock order, so the origin is always behind us.
    fn missing(&self, wb: &WireBlock) -> Option<ClientId> {
        for origin in [wb.left_origin, wb.right_origin] {
            if !origin.is_none()
                && origin.client != wb.id.client
                && origin.clock >= self.state(origin.client)
            {
                return Some(origin.client);
            }
        }
        None
    }

    fn resolve_left(&mut self, origin: BlockId) -> Result<Option<BlockIdx>> {
        if origin.is_none() {
            Ok(None)
        } else {
            Ok(Some(self.precise_end(origin)?))
        }
    }

    fn resolve_right(&mut self, origin: BlockId) -> Result<Option<BlockIdx>> {
        if origin.is_none() {
            Ok(None)
        } else {
            Ok(Some(self.precise_start(origin)?))
        }
    }

    /// Apply delete ranges, returning the parts that target clocks beyond
    /// our state and must wait for their blocks to arrive.
    fn apply_delete_ranges(
        &mut self,
        ranges: Vec<(ClientId, DeleteRange)>,
    ) -> Result<Vec<(ClientId, DeleteRange)>> {
        let mut deferred = Vec::new();
        for (client, range) in ranges {
            if range.len == 0 {
                continue;
            }
            let state = self.state(client);
            let end = range.end();
            if range.clock >= state {
                deferred.push((client, range));
                continue;
            }
            if end > state {
                // Apply the known prefix now, park the rest.
                deferred.push((
                    client,
                    DeleteRange {
                        clock: state,
                        len: end - state,
                    },
                ));
                self.delete_range(client, range.clock, state)?;
            } else {
                self.delete_range(client, range.clock, end)?;
            }
        }
        Ok(deferred)
    }

    /// Tombstone `start .. end` of one client's clock space, splitting the
    /// boundary blocks as needed. Already-tombstoned blocks are skipped.
    fn delete_range(&mut self, client: ClientId, start: Clock, end: Clock) -> Result<()> {
        trace!(client, start, end, "applying delete range");
        let mut i = {
            let list = self
                .client_blocks
                .get(&client)
                .ok_or(Error::Internal("delete range for unknown client"))?;
            let blocks = &self.blocks;
            let i = list.partition_point(|&e| blocks[e].id.clock <= start);
            if i == 0 {
                return Err(Error::Internal("delete range below client's first block"));
            }
            i - 1
        };

        let first = self.client_blocks[&client][i];
        let b = &self.blocks[first];
        if b.id.clock < start && !b.deleted {
            self.precise_start(BlockId::new(client, start))?;
            i += 1;
        }

        let mut changed = false;
        loop {
            let Some(&idx) = self.client_blocks.get(&client).and_then(|l| l.get(i)) else {
                break;
            };
            let (bid, blen, deleted) = {
                let b = &self.blocks[idx];
                (b.id, b.len, b.deleted)
            };
            if bid.clock >= end {
                break;
            }
            if !deleted && blen > 0 {
                if bid.clock + blen > end {
                    self.split_block(idx, end - bid.clock)?;
                }
                let blen = self.blocks[idx].len;
                self.delete_set.add(client, bid.clock, blen);
                self.blocks[idx].mark_deleted();
                self.sub_len(blen);
                changed = true;
            }
            i += 1;
        }
        if changed {
            self.capture(EventType::Delete);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_state_sync() {
        let mut a = BlockStore::new(1);
        a.insert(0, "Hello World").unwrap();
        let u = a.encode_state_as_update().unwrap();

        let mut b = BlockStore::new(2);
        b.apply_update(&u).unwrap();
        assert_eq!(b.content(), "Hello World");
        b.dbg_check();
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let mut a = BlockStore::new(1);
        a.insert(0, "hi").unwrap();
        let u = a.encode_state_as_update().unwrap();

        let mut b = BlockStore::new(2);
        b.apply_update(&u).unwrap();
        b.apply_update(&u).unwrap();
        assert_eq!(b.content(), "hi");
        assert_eq!(b.state(1), 2);
        b.dbg_check();
    }

    #[test]
    fn tombstones_survive_fresh_sync() {
        let mut a = BlockStore::new(1);
        a.insert(0, "abcdef").unwrap();
        a.delete(2, 2).unwrap();
        assert_eq!(a.content(), "abef");

        let u = a.encode_state_as_update().unwrap();
        let mut b = BlockStore::new(2);
        b.apply_update(&u).unwrap();
        assert_eq!(b.content(), "abef");
        assert_eq!(b.state(1), 6);
        b.dbg_check();
    }

    #[test]
    fn incremental_sync_skips_known_blocks() {
        let mut a = BlockStore::new(1);
        a.insert(0, "Hello").unwrap();
        let u1 = a.encode_state_as_update().unwrap();
        a.insert(5, " World").unwrap();
        let u2 = a.encode_state_as_update().unwrap();

        let mut b = BlockStore::new(2);
        b.apply_update(&u1).unwrap();
        b.apply_update(&u2).unwrap();
        assert_eq!(b.content(), "Hello World");
        b.dbg_check();
    }

    #[test]
    fn invalid_update_leaves_store_untouched() {
        let mut a = BlockStore::new(1);
        a.insert(0, "keep").unwrap();
        let err = a.apply_update(b"{not valid json}").unwrap_err();
        assert!(matches!(err, Error::InvalidUpdate(_)));
        assert_eq!(a.content(), "keep");
    }
}
