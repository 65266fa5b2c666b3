//! Hash slot partitioning across shards.

use serde::{Deserialize, Serialize};

/// Total number of hash slots in a cluster.
pub const SLOT_COUNT: u16 = 16384;

/// A half-open range of slots, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16, // exclusive
}

impl SlotRange {
    pub fn len(&self) -> u16 {
        self.end.saturating_sub(self.start)
    }

    /// Shards beyond the slot count end up with nothing to own.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot < self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..self.end
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.len() {
            0 => write!(f, "-"),
            1 => write!(f, "{}", self.start),
            _ => write!(f, "{}-{}", self.start, self.end - 1),
        }
    }
}

/// Splits the slot space into one contiguous range per shard.
///
/// Every shard gets `SLOT_COUNT / shards + 1` slots, in shard order, and
/// the last ranges are clamped at [`SLOT_COUNT`]. The over-allocation is
/// deliberate: the final shard absorbs whatever is left, even when the
/// count divides evenly.
pub fn partition(shards: usize) -> Vec<SlotRange> {
    if shards == 0 {
        return Vec::new();
    }
    let total = usize::from(SLOT_COUNT);
    let per_shard = total / shards + 1;
    (0..shards)
        .map(|i| {
            let start = (i * per_shard).min(total);
            let end = (start + per_shard).min(total);
            // both bounded by SLOT_COUNT, which fits in u16
            SlotRange {
                start: start as u16,
                end: end as u16,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_shards() {
        let ranges = partition(3);
        assert_eq!(
            ranges,
            [
                SlotRange { start: 0, end: 5462 },
                SlotRange { start: 5462, end: 10924 },
                SlotRange { start: 10924, end: 16384 },
            ]
        );
        assert_eq!(ranges[2].len(), 5460);
    }

    #[test]
    fn ranges_cover_every_slot_exactly_once() {
        for shards in (1..=64).chain([100, 128, 1000, 4096, 8191, 8192, 16383, 16384, 20000]) {
            let ranges = partition(shards);
            assert_eq!(ranges.len(), shards);
            assert_eq!(ranges[0].start, 0);
            assert_eq!(ranges.last().unwrap().end, SLOT_COUNT, "shards={shards}");
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start, "shards={shards}");
            }
            let covered: usize = ranges.iter().map(|r| usize::from(r.len())).sum();
            assert_eq!(covered, usize::from(SLOT_COUNT), "shards={shards}");
        }
    }

    #[test]
    fn even_split_still_loads_the_front() {
        // 16384 / 4 divides evenly, but every shard but the last takes one extra slot
        let ranges = partition(4);
        assert_eq!(ranges[0], SlotRange { start: 0, end: 4097 });
        assert_eq!(ranges[3], SlotRange { start: 12291, end: 16384 });
        assert_eq!(ranges[3].len(), 4093);
    }

    #[test]
    fn single_shard_owns_everything() {
        assert_eq!(partition(1), [SlotRange { start: 0, end: SLOT_COUNT }]);
    }

    #[test]
    fn display_and_contains() {
        let range = SlotRange { start: 0, end: 5462 };
        assert_eq!(range.to_string(), "0-5461");
        assert!(range.contains(5461));
        assert!(!range.contains(5462));
        assert_eq!(SlotRange { start: 7, end: 8 }.to_string(), "7");
        assert!(SlotRange { start: 16384, end: 16384 }.is_empty());
    }
}
