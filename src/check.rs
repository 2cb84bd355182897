//! Debugging assertions validating the store's internal state. Used by the
//! fuzzers to catch corruption as early as possible.

use crate::block::{str_char_len, BlockIdx};
use crate::store::BlockStore;

impl BlockStore {
    /// Check the internal invariants of the block store:
    ///
    /// - the integrated blocks form one doubly linked chain rooted at
    ///   `start`, with reciprocal neighbour links, covering every arena
    ///   block exactly once,
    /// - each per-client list ascends by clock and tiles `0 ..
    ///   state_vector[client]` with no gaps or overlaps,
    /// - the tracked length matches both the visible block lengths and the
    ///   rendered content,
    /// - the delete set covers exactly the tombstoned clocks.
    ///
    /// This is only exported for integration testing; it panics on failure
    /// and is not part of the API.
    #[allow(unused)]
    pub(crate) fn dbg_check(&self) {
        // Walk the linked list.
        let mut seen = vec![false; self.blocks.len()];
        let mut visible = 0u64;
        let mut prev: Option<BlockIdx> = None;
        let mut cur = self.start;
        while let Some(idx) = cur {
            let b = &self.blocks[idx];
            assert!(!seen[idx], "cycle in block list");
            seen[idx] = true;
            assert_eq!(b.left, prev, "left link does not match predecessor");
            if let Some(r) = b.right {
                assert_eq!(self.blocks[r].left, Some(idx), "reciprocal link broken");
            }
            if b.deleted {
                assert!(b.content.is_empty(), "tombstone kept content");
            } else {
                assert_eq!(b.len, str_char_len(&b.content), "live block len drifted");
                visible += b.len;
            }
            prev = cur;
            cur = b.right;
        }
        assert!(
            seen.iter().all(|&s| s),
            "arena block unreachable from start"
        );
        assert_eq!(visible, self.len(), "tracked length drifted");
        assert_eq!(
            str_char_len(&self.content()),
            self.len(),
            "content length drifted"
        );

        // Per-client clock coverage.
        for (client, list) in &self.client_blocks {
            let mut expect = 0;
            for &i in list {
                let b = &self.blocks[i];
                assert_eq!(b.id.client, *client);
                assert_eq!(b.id.clock, expect, "gap or overlap in client blocks");
                expect = b.end_clock();
            }
            assert_eq!(expect, self.state(*client), "state vector drifted");
        }

        // Delete set coverage.
        for (client, list) in &self.client_blocks {
            for &i in list {
                let b = &self.blocks[i];
                for clock in b.id.clock..b.end_clock() {
                    assert_eq!(
                        self.delete_set.contains(*client, clock),
                        b.deleted,
                        "delete set does not match tombstones"
                    );
                }
            }
        }
    }
}
