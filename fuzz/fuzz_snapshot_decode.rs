//! Fuzz target for index snapshot loading.
//!
//! Run with: cargo +nightly fuzz run fuzz_snapshot_decode
//!
//! Arbitrary JSON goes through `IndexSnapshot::from_json` and
//! `SpatialIndex::from_snapshot`. Whatever loads must come out sorted with
//! unique offsets, and queries on it must not panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use spritenav_core::{IndexSnapshot, SpatialIndex};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(snapshot) = IndexSnapshot::from_json(text) else {
        return;
    };
    let Ok(index) = SpatialIndex::from_snapshot(snapshot) else {
        return;
    };
    let objects = index.objects();
    assert!(objects.windows(2).all(|w| w[0].offset() < w[1].offset()));

    let probe = objects.first().map_or(0, |o| o.offset());
    let _ = index.nearest(probe, 4, Some(0x1000));
    let _ = index.gaps(1);
    let _ = index.statistics();
});
