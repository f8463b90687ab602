//! Addressable byte ranges within stored objects.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// A byte range `[offset, offset + size)` of a backing object.
///
/// Segments are immutable references; composing content never copies bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Id of the backing object.
    pub uuid: Uuid,
    /// Start of the range within the object.
    pub offset: u64,
    /// Length of the range.
    pub size: u64,
    /// DeltaFile that stored the backing object.
    pub did: Uuid,
}

impl Segment {
    /// Creates a segment.
    #[must_use]
    pub fn new(uuid: Uuid, offset: u64, size: u64, did: Uuid) -> Self {
        Self {
            uuid,
            offset,
            size,
            did,
        }
    }

    /// Exclusive end of the range.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// Returns true if both segments share at least one byte of the same object.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.uuid == other.uuid && self.offset < other.end() && other.offset < self.end()
    }
}

/// Sums segment sizes, counting identical segments once and overlaps twice.
#[must_use]
pub fn total_size<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> u64 {
    let unique: HashSet<&Segment> = segments.into_iter().collect();
    unique.iter().map(|s| s.size).sum()
}

/// Size of the union of all byte ranges, per backing object.
///
/// Overlapping or repeated ranges of the same object are counted once.
#[must_use]
pub fn referenced_size<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> u64 {
    let mut by_object: BTreeMap<Uuid, Vec<(u64, u64)>> = BTreeMap::new();
    for segment in segments {
        if segment.size > 0 {
            by_object
                .entry(segment.uuid)
                .or_default()
                .push((segment.offset, segment.end()));
        }
    }

    by_object
        .into_values()
        .map(|mut ranges| {
            ranges.sort_unstable();
            let mut total = 0;
            let mut current: Option<(u64, u64)> = None;
            for (start, end) in ranges {
                current = match current {
                    Some((cur_start, cur_end)) if start <= cur_end => {
                        Some((cur_start, cur_end.max(end)))
                    }
                    Some((cur_start, cur_end)) => {
                        total += cur_end - cur_start;
                        Some((start, end))
                    }
                    None => Some((start, end)),
                };
            }
            if let Some((start, end)) = current {
                total += end - start;
            }
            total
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(object: Uuid, offset: u64, size: u64) -> Segment {
        Segment::new(object, offset, size, Uuid::nil())
    }

    #[test]
    fn test_overlaps() {
        let object = Uuid::new_v4();
        assert!(seg(object, 0, 10).overlaps(&seg(object, 5, 10)));
        assert!(!seg(object, 0, 10).overlaps(&seg(object, 10, 10)));
        assert!(!seg(object, 0, 10).overlaps(&seg(Uuid::new_v4(), 0, 10)));
    }

    #[test]
    fn test_referenced_size_merges_overlaps() {
        let object = Uuid::new_v4();
        let segments = [seg(object, 0, 100), seg(object, 50, 100)];

        assert_eq!(referenced_size(&segments), 150);
        assert_eq!(total_size(&segments), 200);
    }

    #[test]
    fn test_referenced_size_adjacent_and_disjoint() {
        let object = Uuid::new_v4();
        let other = Uuid::new_v4();
        let segments = [
            seg(object, 0, 10),
            seg(object, 10, 10),
            seg(object, 40, 5),
            seg(other, 0, 7),
        ];

        assert_eq!(referenced_size(&segments), 10 + 10 + 5 + 7);
    }

    #[test]
    fn test_identical_segments_counted_once() {
        let object = Uuid::new_v4();
        let segments = [seg(object, 0, 10), seg(object, 0, 10)];

        assert_eq!(total_size(&segments), 10);
        assert_eq!(referenced_size(&segments), 10);
    }

    #[test]
    fn test_contained_range() {
        let object = Uuid::new_v4();
        let segments = [seg(object, 0, 100), seg(object, 20, 10)];

        assert_eq!(referenced_size(&segments), 100);
    }
}
