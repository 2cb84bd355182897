//! The block store: arena of blocks, the integrated doubly linked sequence,
//! per-client block lists, state vector and delete set, plus the local
//! editing operations and the YATA integration algorithm itself.

use std::collections::{BTreeMap, HashSet};

use tracing::trace;

use crate::block::{split_content, str_char_len, Block, BlockIdx, ListPosition};
use crate::common::{BlockId, ClientId, Clock, ORIGIN_NONE};
use crate::deleteset::{DeleteRange, DeleteSet};
use crate::encoding::WireBlock;
use crate::error::{Error, Result};
use crate::events::{BlockSnapshot, EventLog, EventType};
use crate::marker::{MarkerOp, MarkerSystem};

#[derive(Debug, Clone)]
pub(crate) struct BlockStore {
    /// Arena owning every block ever integrated, tombstones included. All
    /// neighbour relations are indices into this vec.
    pub(crate) blocks: Vec<Block>,

    /// Head of the integrated sequence, `None` while the document is empty.
    pub(crate) start: Option<BlockIdx>,

    /// Per-client block lists, sorted ascending by clock. Together with the
    /// state vector these cover each client's clock space without gaps.
    pub(crate) client_blocks: BTreeMap<ClientId, Vec<BlockIdx>>,

    /// Next expected clock per client.
    pub(crate) state_vector: BTreeMap<ClientId, Clock>,

    /// Every tombstoned range this replica has observed, keyed by the client
    /// which authored the deleted blocks.
    pub(crate) delete_set: DeleteSet,

    pub(crate) markers: MarkerSystem,

    /// Remote blocks whose dependencies we haven't seen yet; retried on every
    /// applied update.
    pub(crate) pending_blocks: Vec<WireBlock>,

    /// Remote delete ranges targeting clocks beyond our state.
    pub(crate) pending_deletes: Vec<(ClientId, DeleteRange)>,

    /// Event capture, enabled via document options.
    pub(crate) events: Option<EventLog>,

    client: ClientId,

    /// Visible character count. Kept in lockstep with the sum of visible
    /// block lengths.
    len: u64,
}

impl BlockStore {
    pub fn new(client: ClientId) -> Self {
        BlockStore {
            blocks: Vec::new(),
            start: None,
            client_blocks: BTreeMap::new(),
            state_vector: BTreeMap::new(),
            delete_set: DeleteSet::new(),
            markers: MarkerSystem::new(),
            pending_blocks: Vec::new(),
            pending_deletes: Vec::new(),
            events: None,
            client,
            len: 0,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Next expected clock for `client`; 0 for clients we've never seen.
    pub fn state(&self, client: ClientId) -> Clock {
        self.state_vector.get(&client).copied().unwrap_or(0)
    }

    /// The visible text: every non-tombstoned block's content, in sequence
    /// order.
    pub fn content(&self) -> String {
        let mut out = String::new();
        let mut cur = self.start;
        while let Some(idx) = cur {
            let b = &self.blocks[idx];
            if !b.deleted {
                out.push_str(&b.content);
            }
            cur = b.right;
        }
        out
    }

    // ── Local editing ───────────────────────────────────────────────────

    /// Insert `text` at absolute character position `pos`, attributed to the
    /// local client. Positions past the end are clamped to the end.
    pub fn insert(&mut self, pos: u64, text: &str) -> Result<()> {
        let text_len = str_char_len(text);
        if text_len == 0 {
            return Ok(());
        }
        let pos = pos.min(self.len);
        let lp = self.find_position(pos)?;

        let clock = self.state(self.client);
        let mut block = Block::new(BlockId::new(self.client, clock), text.into());
        block.left_origin = lp.left.map_or(ORIGIN_NONE, |l| self.blocks[l].last_id());
        block.right_origin = lp.right.map_or(ORIGIN_NONE, |r| self.blocks[r].id);
        block.left = lp.left;
        block.right = lp.right;
        let idx = self.integrate(block, 0)?;

        self.markers.update(pos, text_len, MarkerOp::Add);
        self.markers.add(idx, pos);
        self.capture(EventType::Marker);
        self.capture(EventType::Insert);
        Ok(())
    }

    /// Tombstone `length` characters starting at `pos`.
    pub fn delete(&mut self, pos: u64, length: u64) -> Result<()> {
        if length > self.len {
            return Err(Error::OutOfRange {
                pos,
                len: length,
                doc_len: self.len,
            });
        }
        if length == 0 {
            return Ok(());
        }
        let mut lp = self.find_position(pos)?;

        let mut remaining = length;
        while remaining > 0 {
            let Some(r) = lp.right else { break };
            let (deleted, blen) = {
                let b = &self.blocks[r];
                (b.deleted, b.len)
            };
            if !deleted && blen > 0 {
                if remaining < blen {
                    self.split_block(r, remaining)?;
                }
                let b = &self.blocks[r];
                let (client, clock, blen) = (b.id.client, b.id.clock, b.len);
                self.delete_set.add(client, clock, blen);
                self.blocks[r].mark_deleted();
                self.len -= blen;
                remaining -= blen;
            }
            lp.left = Some(r);
            lp.right = self.blocks[r].right;
        }

        let removed = length - remaining;
        self.markers.update(pos, removed, MarkerOp::Del);
        self.capture(EventType::Delete);
        Ok(())
    }

    /// Resolve an absolute position to the neighbour pair straddling it,
    /// splitting a block when the position falls strictly inside one. The
    /// walk is seeded from the marker cache when possible.
    fn find_position(&mut self, pos: u64) -> Result<ListPosition> {
        let (seed_idx, seed_pos) = match self.markers.find(pos, &self.blocks) {
            Some(found) => found,
            None => match self.start {
                Some(s) => (s, 0),
                None => {
                    return Ok(ListPosition {
                        left: None,
                        right: None,
                        index: 0,
                    })
                }
            },
        };
        debug_assert!(seed_pos <= pos);

        let mut lp = ListPosition {
            left: self.blocks[seed_idx].left,
            right: Some(seed_idx),
            index: seed_pos,
        };
        let mut remaining = pos - seed_pos;
        while remaining > 0 {
            let Some(r) = lp.right else { break };
            let (deleted, blen) = {
                let b = &self.blocks[r];
                (b.deleted, b.len)
            };
            if !deleted && blen > 0 {
                if remaining < blen {
                    self.split_block(r, remaining)?;
                }
                let blen = self.blocks[r].len;
                remaining -= blen;
                lp.index += blen;
            }
            lp.left = Some(r);
            lp.right = self.blocks[r].right;
        }
        Ok(lp)
    }

    // ── Integration ─────────────────────────────────────────────────────

    /// Splice `block` into the sequence at a position every replica agrees
    /// on. `block.left`/`block.right` carry the resolved origin neighbours
    /// (or the insertion point, for local edits); when they aren't currently
    /// adjacent, the conflict scan walks the gap to find the final left
    /// neighbour.
    ///
    /// `offset > 0` means the leading `offset` characters of the block are
    /// already integrated (a retransmission): they get trimmed and the block
    /// is re-anchored to the character just before the new start.
    pub(crate) fn integrate(&mut self, mut block: Block, offset: u64) -> Result<BlockIdx> {
        if offset > 0 {
            block.id.clock += offset;
            if !block.content.is_empty() {
                let tail = split_content(&mut block.content, offset as usize);
                block.content = tail;
            }
            block.len -= offset;
            let left = self.precise_end(BlockId::new(block.id.client, block.id.clock - 1))?;
            block.left_origin = self.blocks[left].last_id();
            block.left = Some(left);
        }

        trace!(
            client = block.id.client,
            clock = block.id.clock,
            len = block.len,
            offset,
            "integrate"
        );

        // Only scan when the (left, right) pair isn't currently adjacent;
        // local edits splice between adjacent neighbours and skip this.
        let needs_scan = match (block.left, block.right) {
            (None, None) => true,
            (None, Some(r)) => self.blocks[r].left.is_some(),
            (Some(l), r) => self.blocks[l].right != r,
        };

        if needs_scan {
            let mut left = block.left;
            let mut o = match left {
                Some(l) => self.blocks[l].right,
                None => self.start,
            };

            // Everything scanned so far, and the subset scanned since we
            // last committed to a left neighbour.
            let mut scanned: HashSet<BlockIdx> = HashSet::new();
            let mut conflicting: HashSet<BlockIdx> = HashSet::new();

            while let Some(oi) = o {
                if Some(oi) == block.right {
                    break;
                }
                scanned.insert(oi);
                conflicting.insert(oi);
                let ob = &self.blocks[oi];

                if ob.left_origin == block.left_origin {
                    // Same creation anchor: concurrent siblings order by
                    // ascending client.
                    if ob.id.client < block.id.client {
                        left = Some(oi);
                        conflicting.clear();
                    } else if ob.right_origin == block.right_origin {
                        break;
                    }
                } else if let Ok(anchor) = self.resolve_anchor(ob.left_origin) {
                    if scanned.contains(&anchor) {
                        if !conflicting.contains(&anchor) {
                            // The anchor was resolved in an earlier window;
                            // everything up to here sits before us.
                            left = Some(oi);
                            conflicting.clear();
                        }
                    } else {
                        // Anchored before the scan window; we sort before it.
                        break;
                    }
                } else {
                    // Anchored at the document start, before our window.
                    break;
                }

                o = ob.right;
            }
            block.left = left;
        }

        // Splice. The block takes the arena slot at the current end.
        let idx = self.blocks.len();
        match block.left {
            Some(l) => {
                block.right = self.blocks[l].right;
                self.blocks[l].right = Some(idx);
            }
            None => {
                block.right = self.start;
                self.start = Some(idx);
            }
        }
        if let Some(r) = block.right {
            self.blocks[r].left = Some(idx);
        }

        let client = block.id.client;
        let end = block.end_clock();
        let vis = block.visible_len();
        if block.deleted {
            self.delete_set.add(client, block.id.clock, block.len);
        }
        self.blocks.push(block);
        self.add_to_client_list(idx);
        self.update_state(client, end);
        self.len += vis;

        self.capture(EventType::Integrate);
        Ok(idx)
    }

    // ── Splitting ───────────────────────────────────────────────────────

    /// Split a block `diff` characters in, producing the right-hand sibling.
    /// Both halves stay in the sequence and the per-client list; the state
    /// vector is unaffected.
    pub(crate) fn split_block(&mut self, idx: BlockIdx, diff: u64) -> Result<BlockIdx> {
        let right_idx = self.blocks.len();
        let left = &mut self.blocks[idx];
        if diff == 0 || diff >= left.len {
            return Err(Error::Internal("split offset outside block"));
        }
        trace!(
            client = left.id.client,
            clock = left.id.clock,
            diff,
            "split block"
        );

        let right_content = if left.deleted {
            Default::default()
        } else {
            split_content(&mut left.content, diff as usize)
        };
        let right = Block {
            id: BlockId::new(left.id.client, left.id.clock + diff),
            content: right_content,
            len: left.len - diff,
            deleted: left.deleted,
            left_origin: BlockId::new(left.id.client, left.id.clock + diff - 1),
            right_origin: left.right_origin,
            left: Some(idx),
            right: left.right,
        };
        left.len = diff;
        left.right = Some(right_idx);

        let old_right = right.right;
        self.blocks.push(right);
        if let Some(r) = old_right {
            self.blocks[r].left = Some(right_idx);
        }
        self.add_to_client_list(right_idx);

        self.capture(EventType::Split);
        Ok(right_idx)
    }

    /// Ensure a block *begins* exactly at `id.clock` and return it. Splits
    /// the containing block when it starts earlier.
    pub(crate) fn precise_start(&mut self, id: BlockId) -> Result<BlockIdx> {
        let idx = self.find_block(id)?;
        let clock = self.blocks[idx].id.clock;
        if clock < id.clock {
            self.split_block(idx, id.clock - clock)
        } else {
            Ok(idx)
        }
    }

    /// Ensure a block *ends* exactly at `id.clock` (inclusive) and return it.
    /// Splits the containing block when it extends past.
    pub(crate) fn precise_end(&mut self, id: BlockId) -> Result<BlockIdx> {
        let idx = self.find_block(id)?;
        let (clock, end) = {
            let b = &self.blocks[idx];
            (b.id.clock, b.end_clock())
        };
        if id.clock + 1 < end {
            self.split_block(idx, id.clock - clock + 1)?;
        }
        Ok(idx)
    }

    /// The block a conflict-scan anchor lives in; fails for the sentinel,
    /// which anchors at the document start rather than in a block.
    fn resolve_anchor(&self, origin: BlockId) -> Result<BlockIdx> {
        if origin.is_none() {
            Err(Error::Internal("sentinel origin has no block"))
        } else {
            self.find_block(origin)
        }
    }

    /// The block whose clock range contains `id.clock`.
    pub(crate) fn find_block(&self, id: BlockId) -> Result<BlockIdx> {
        let list = self
            .client_blocks
            .get(&id.client)
            .ok_or(Error::Internal("no blocks for referenced client"))?;
        let blocks = &self.blocks;
        let i = list.partition_point(|&e| blocks[e].id.clock <= id.clock);
        if i == 0 {
            return Err(Error::Internal("referenced id below client's first block"));
        }
        let idx = list[i - 1];
        if self.blocks[idx].contains(id.clock) {
            Ok(idx)
        } else {
            Err(Error::Internal("referenced id not covered by any block"))
        }
    }

    // ── Bookkeeping ─────────────────────────────────────────────────────

    fn add_to_client_list(&mut self, idx: BlockIdx) {
        let (client, clock) = {
            let b = &self.blocks[idx];
            (b.id.client, b.id.clock)
        };
        let blocks = &self.blocks;
        let list = self.client_blocks.entry(client).or_default();
        let i = list.partition_point(|&e| blocks[e].id.clock <= clock);
        list.insert(i, idx);
    }

    fn update_state(&mut self, client: ClientId, end: Clock) {
        let e = self.state_vector.entry(client).or_insert(0);
        if end > *e {
            *e = end;
        }
    }

    pub(crate) fn sub_len(&mut self, n: u64) {
        self.len -= n;
    }

    pub(crate) fn snapshot_blocks(&self) -> BTreeMap<ClientId, Vec<BlockSnapshot>> {
        self.client_blocks
            .iter()
            .map(|(client, list)| {
                let snaps = list
                    .iter()
                    .map(|&i| {
                        let b = &self.blocks[i];
                        BlockSnapshot {
                            id: b.id,
                            content: b.content.to_string(),
                            is_deleted: b.deleted,
                            left_origin: b.left_origin,
                            right_origin: b.right_origin,
                        }
                    })
                    .collect();
                (*client, snaps)
            })
            .collect()
    }

    pub(crate) fn capture(&mut self, event_type: EventType) {
        if self.events.is_none() {
            return;
        }
        let state_vector = self.state_vector.clone();
        let blocks = self.snapshot_blocks();
        if let Some(log) = &mut self.events {
            log.capture(event_type, state_vector, blocks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> BlockStore {
        BlockStore::new(1)
    }

    #[test]
    fn insert_at_beginning() {
        let mut s = store();
        s.insert(0, "Hello").unwrap();
        assert_eq!(s.content(), "Hello");
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn insert_at_end() {
        let mut s = store();
        s.insert(0, "Hi").unwrap();
        s.insert(2, " there").unwrap();
        assert_eq!(s.content(), "Hi there");
    }

    #[test]
    fn insert_in_middle() {
        let mut s = store();
        s.insert(0, "A").unwrap();
        s.insert(1, "B").unwrap();
        s.insert(1, "X").unwrap();
        assert_eq!(s.content(), "AXB");
    }

    #[test]
    fn insert_triggers_split() {
        let mut s = store();
        s.insert(0, "World").unwrap();
        s.insert(2, "X").unwrap();
        assert_eq!(s.content(), "WoXrld");
        // "World" is now two blocks; all three stay clock-contiguous.
        assert_eq!(s.client_blocks[&1].len(), 3);
        s.dbg_check();
    }

    #[test]
    fn insert_past_end_clamps() {
        let mut s = store();
        s.insert(0, "abc").unwrap();
        s.insert(1000, "def").unwrap();
        assert_eq!(s.content(), "abcdef");
    }

    #[test]
    fn empty_insert_is_noop() {
        let mut s = store();
        s.insert(0, "").unwrap();
        assert_eq!(s.state(1), 0);
        assert_eq!(s.content(), "");
    }

    #[test]
    fn delete_single_block() {
        let mut s = store();
        s.insert(0, "A").unwrap();
        s.delete(0, 1).unwrap();
        assert_eq!(s.content(), "");
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn delete_middle_of_block() {
        let mut s = store();
        s.insert(0, "Hello").unwrap();
        s.delete(1, 3).unwrap();
        assert_eq!(s.content(), "Ho");
        s.dbg_check();
    }

    #[test]
    fn delete_across_blocks() {
        let mut s = store();
        s.insert(0, "Hi").unwrap();
        s.insert(2, " there").unwrap();
        s.delete(1, 5).unwrap();
        assert_eq!(s.content(), "Hre");
        s.dbg_check();
    }

    #[test]
    fn delete_out_of_bounds() {
        let mut s = store();
        s.insert(0, "Yo").unwrap();
        let err = s.delete(3, 3).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
        assert_eq!(s.content(), "Yo");
    }

    #[test]
    fn delete_records_delete_set() {
        let mut s = store();
        s.insert(0, "abcdef").unwrap();
        s.delete(2, 2).unwrap();
        assert!(s.delete_set.contains(1, 2));
        assert!(s.delete_set.contains(1, 3));
        assert!(!s.delete_set.contains(1, 4));
    }

    #[test]
    fn insert_after_deletion_lands_between_survivors() {
        let mut s = store();
        s.insert(0, "abcdef").unwrap();
        s.delete(2, 2).unwrap(); // "abef"
        s.insert(2, "XY").unwrap();
        assert_eq!(s.content(), "abXYef");
        s.dbg_check();
    }

    #[test]
    fn multibyte_content_splits_on_char_boundaries() {
        let mut s = store();
        s.insert(0, "héllo").unwrap();
        s.insert(2, "X").unwrap();
        assert_eq!(s.content(), "héXllo");
        s.delete(1, 2).unwrap(); // removes "éX"
        assert_eq!(s.content(), "hllo");
        s.dbg_check();
    }

    #[test]
    fn clock_ranges_stay_contiguous() {
        let mut s = store();
        s.insert(0, "one").unwrap();
        s.insert(3, "two").unwrap();
        s.insert(2, "three").unwrap();
        s.delete(1, 6).unwrap();
        s.dbg_check();
        assert_eq!(s.state(1), 11);
    }
}
