//! A best-effort cache of `(block, absolute position)` pairs, used to avoid
//! walking the whole block list from the start on every positional lookup.
//! Repeated edits near each other resolve from a nearby marker instead.
//!
//! Markers are kept exact across local editing via [`MarkerSystem::update`],
//! and dropped wholesale when a remote update rearranges the sequence. A
//! lookup seeded from any marker walks the linked list to the target, so the
//! cache only affects performance, never placement.

use crate::block::{Block, BlockIdx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MarkerOp {
    Add,
    Del,
}

/// A block together with the absolute character offset of its first character
/// at the time the marker was recorded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Marker {
    pub block: BlockIdx,
    pub pos: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MarkerSystem {
    markers: Vec<Marker>,
}

impl MarkerSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `block` starts at absolute position `pos`.
    pub fn add(&mut self, block: BlockIdx, pos: u64) {
        self.markers.push(Marker { block, pos });
    }

    /// Resolve `pos` to the block containing it (or the closest block when
    /// `pos` is past the end), returning the block and its start position.
    /// Returns `None` when no marker exists to seed the walk; the caller
    /// falls back to the list head.
    ///
    /// The chosen marker is only a seed: the walk moves right or left over
    /// the linked list, counting visible lengths, until the target falls
    /// inside the current block. The resolved pair is cached as a new marker.
    pub fn find(&mut self, pos: u64, blocks: &[Block]) -> Option<(BlockIdx, u64)> {
        if self.markers.is_empty() {
            return None;
        }
        if let Some(m) = self.markers.iter().find(|m| m.pos == pos) {
            return Some((m.block, m.pos));
        }

        let mut idx = self.markers[0].block;
        let mut p = self.markers[0].pos;

        if p < pos {
            loop {
                let b = &blocks[idx];
                let vis = b.visible_len();
                if pos < p + vis {
                    break;
                }
                match b.right {
                    Some(r) => {
                        p += vis;
                        idx = r;
                    }
                    None => break,
                }
            }
        } else {
            while p > pos {
                match blocks[idx].left {
                    Some(l) => {
                        idx = l;
                        p -= blocks[l].visible_len();
                    }
                    None => {
                        p = 0;
                        break;
                    }
                }
            }
        }

        self.markers.push(Marker { block: idx, pos: p });
        Some((idx, p))
    }

    /// Shift markers after an edit at `pos`: an insertion of `delta`
    /// characters moves every marker at or past `pos` right, a deletion moves
    /// them left. A marker inside the deleted range clamps to the deletion
    /// start, which is where its (now tombstoned) block's visible position
    /// ends up.
    pub fn update(&mut self, pos: u64, delta: u64, op: MarkerOp) {
        for m in &mut self.markers {
            if m.pos >= pos {
                match op {
                    MarkerOp::Add => m.pos += delta,
                    MarkerOp::Del => m.pos = m.pos.saturating_sub(delta).max(pos),
                }
            }
        }
    }

    /// Drop every marker. Used after remote updates, which move blocks in
    /// ways the per-edit shift can't track.
    pub fn clear(&mut self) {
        self.markers.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.markers.len()
    }
}
