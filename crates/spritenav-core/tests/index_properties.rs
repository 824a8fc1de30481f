//! Property tests for the spatial index.

use proptest::prelude::*;
use spritenav_core::{DiscoveredObject, SpatialIndex};

fn object(offset: u64, confidence: f64) -> DiscoveredObject {
    DiscoveredObject::new(offset, 0x10, 0x40, confidence).unwrap()
}

fn inserts() -> impl Strategy<Value = Vec<(u64, f64)>> {
    prop::collection::vec((0u64..0x4000, 0.0f64..=1.0), 0..64)
}

fn build(entries: &[(u64, f64)]) -> SpatialIndex {
    let index = SpatialIndex::new(0x1_0000);
    for &(offset, confidence) in entries {
        index.insert(object(offset, confidence));
    }
    index
}

proptest! {
    #[test]
    fn test_iteration_is_sorted_and_keeps_best(entries in inserts()) {
        let index = build(&entries);
        let objects = index.objects();

        prop_assert!(objects.windows(2).all(|w| w[0].offset() < w[1].offset()));
        for object in &objects {
            let best = entries
                .iter()
                .filter(|(o, _)| *o == object.offset())
                .map(|(_, c)| *c)
                .fold(f64::MIN, f64::max);
            prop_assert_eq!(object.confidence(), best);
        }
    }

    #[test]
    fn test_range_matches_naive_filter(entries in inserts(), a in 0u64..0x4000, b in 0u64..0x4000) {
        let index = build(&entries);
        let expected: Vec<u64> = index
            .objects()
            .iter()
            .map(|o| o.offset())
            .filter(|&o| a <= o && o < b)
            .collect();
        let actual: Vec<u64> = index.range(a, b).iter().map(|o| o.offset()).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn test_nearest_is_distance_monotonic(entries in inserts(), at in 0u64..0x4000, count in 1usize..8) {
        let index = build(&entries);
        let found = index.nearest(at, count, None);

        prop_assert!(found.len() <= count);
        prop_assert!(found.windows(2).all(|w| w[0].1 <= w[1].1));
        prop_assert_eq!(found.len(), count.min(index.len()));

        if let Some(&(_, worst)) = found.last() {
            let included: Vec<u64> = found.iter().map(|(o, _)| o.offset()).collect();
            for object in index.objects() {
                if !included.contains(&object.offset()) {
                    prop_assert!(object.offset().abs_diff(at) >= worst);
                }
            }
        }
    }
}
