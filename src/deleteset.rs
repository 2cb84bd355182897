//! Bookkeeping of tombstoned clock ranges, keyed by the client which authored
//! the deleted blocks. The set always covers exactly the tombstoned clock
//! positions of this replica, so an encoded update carries every deletion the
//! replica has observed, local or remote.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::common::{ClientId, Clock};

/// A half-open tombstoned interval `clock .. clock + len` in one client's
/// clock space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeleteRange {
    pub clock: Clock,
    pub len: u64,
}

impl DeleteRange {
    pub fn end(&self) -> Clock {
        self.clock + self.len
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DeleteSet {
    clients: BTreeMap<ClientId, SmallVec<[DeleteRange; 2]>>,
}

impl DeleteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `clock .. clock + len` of `client` as tombstoned. Blocks are
    /// only ever tombstoned once, so the new range never overlaps an existing
    /// one; adjacent ranges are coalesced.
    pub fn add(&mut self, client: ClientId, clock: Clock, len: u64) {
        if len == 0 {
            return;
        }
        let ranges = self.clients.entry(client).or_default();
        let i = ranges.partition_point(|r| r.clock <= clock);
        debug_assert!(i == 0 || ranges[i - 1].end() <= clock);
        debug_assert!(i == ranges.len() || clock + len <= ranges[i].clock);

        let merge_prev = i > 0 && ranges[i - 1].end() == clock;
        let merge_next = i < ranges.len() && clock + len == ranges[i].clock;
        match (merge_prev, merge_next) {
            (true, true) => {
                ranges[i - 1].len += len + ranges[i].len;
                ranges.remove(i);
            }
            (true, false) => ranges[i - 1].len += len,
            (false, true) => {
                ranges[i].clock = clock;
                ranges[i].len += len;
            }
            (false, false) => ranges.insert(i, DeleteRange { clock, len }),
        }
    }

    /// True if `clock` of `client` falls inside a recorded range.
    pub fn contains(&self, client: ClientId, clock: Clock) -> bool {
        let Some(ranges) = self.clients.get(&client) else {
            return false;
        };
        let i = ranges.partition_point(|r| r.clock <= clock);
        i > 0 && clock < ranges[i - 1].end()
    }

    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &[DeleteRange])> {
        self.clients.iter().map(|(c, r)| (*c, r.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_contains() {
        let mut ds = DeleteSet::new();
        ds.add(1, 5, 3);
        assert!(ds.contains(1, 5));
        assert!(ds.contains(1, 7));
        assert!(!ds.contains(1, 8));
        assert!(!ds.contains(1, 4));
        assert!(!ds.contains(2, 5));
    }

    #[test]
    fn coalesces_adjacent_ranges() {
        let mut ds = DeleteSet::new();
        ds.add(1, 0, 2);
        ds.add(1, 4, 2);
        ds.add(1, 2, 2);
        let ranges: Vec<_> = ds.iter().collect();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].1, &[DeleteRange { clock: 0, len: 6 }]);
    }

    #[test]
    fn keeps_disjoint_ranges_sorted() {
        let mut ds = DeleteSet::new();
        ds.add(1, 10, 1);
        ds.add(1, 0, 1);
        ds.add(1, 5, 2);
        let (_, ranges) = ds.iter().next().unwrap();
        assert_eq!(
            ranges,
            &[
                DeleteRange { clock: 0, len: 1 },
                DeleteRange { clock: 5, len: 2 },
                DeleteRange { clock: 10, len: 1 },
            ]
        );
    }

    #[test]
    fn zero_length_ignored() {
        let mut ds = DeleteSet::new();
        ds.add(1, 3, 0);
        assert_eq!(ds.num_clients(), 0);
    }
}
