//! Fuzz target for the padding-based size estimator.
//!
//! Run with: cargo +nightly fuzz run fuzz_size_estimate

#![no_main]

use libfuzzer_sys::fuzz_target;
use spritenav_core::decode::estimate_encoded_size;

fuzz_target!(|data: &[u8]| {
    match estimate_encoded_size(data) {
        None => assert!(data.is_empty()),
        Some(size) => assert!(size as usize <= data.len()),
    }
});
