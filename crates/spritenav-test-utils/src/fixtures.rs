//! Discovered-object fixtures.

use spritenav_core::types::{DiscoveredObject, RegionKind};

/// A 0x100-byte object decoding to 0x400 bytes, confidence 0.9.
pub fn object_at(offset: u64) -> DiscoveredObject {
    sized_object(offset, 0x100, 0x400)
}

pub fn sized_object(offset: u64, encoded: u32, decoded: u32) -> DiscoveredObject {
    DiscoveredObject::builder(offset, encoded, decoded)
        .confidence(0.9)
        .build()
        .expect("fixture object is valid")
}

pub fn object_in_region(offset: u64, region: RegionKind) -> DiscoveredObject {
    DiscoveredObject::builder(offset, 0x100, 0x400)
        .confidence(0.9)
        .region(region)
        .build()
        .expect("fixture object is valid")
}

/// One [`object_at`] per offset.
pub fn objects_at(offsets: &[u64]) -> Vec<DiscoveredObject> {
    offsets.iter().map(|&o| object_at(o)).collect()
}

/// `count` objects starting at `start`, `stride` bytes apart.
pub fn strided_offsets(start: u64, stride: u64, count: usize) -> Vec<u64> {
    (0..count as u64).map(|i| start + i * stride).collect()
}
