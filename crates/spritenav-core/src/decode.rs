//! Seam to the external decoder that turns raw blob bytes at an offset into
//! decoded object data.
//!
//! The prediction path never decodes anything. Decoding is only needed when
//! a caller wants to check a predicted offset before reporting it.

use tracing::debug;

use crate::types::{DiscoveredObject, Fingerprint, InvariantError, Prediction};

/// Largest window scanned by [`estimate_encoded_size`].
pub const MAX_SCAN_WINDOW: usize = 0x10000;
/// Returned by [`estimate_encoded_size`] when no padding run is found.
pub const DEFAULT_ENCODED_SIZE: u32 = 0x1000;

const SCAN_START: usize = 32;
const SCAN_STEP: usize = 2;
const PADDING_RUN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("offset {offset:#x} is outside a blob of {len} bytes")]
    OutOfBounds { offset: u64, len: usize },

    #[error("no valid data at {offset:#x}: {reason}")]
    Invalid { offset: u64, reason: String },

    #[error("decoded data is empty")]
    Empty,

    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

/// Decodes the compressed format used by a particular blob family.
pub trait BlobDecoder: Send + Sync {
    fn name(&self) -> &str;

    /// Decode the object starting at `offset`. `size_hint` is the expected
    /// decoded size, when known.
    fn decode_at(&self, raw: &[u8], offset: u64, size_hint: Option<u32>) -> Result<Vec<u8>, DecodeError>;
}

/// Try to decode at a predicted offset and build the object that would be
/// reported if the prediction holds.
///
/// The encoded size comes from [`estimate_encoded_size`] and is therefore
/// approximate.
pub fn verify_prediction(
    decoder: &dyn BlobDecoder,
    raw: &[u8],
    prediction: &Prediction,
) -> Result<DiscoveredObject, DecodeError> {
    let offset = prediction.target_offset();
    let start = usize::try_from(offset)
        .ok()
        .filter(|&o| o < raw.len())
        .ok_or(DecodeError::OutOfBounds { offset, len: raw.len() })?;

    let decoded = decoder.decode_at(raw, offset, prediction.estimated_size())?;
    if decoded.is_empty() {
        return Err(DecodeError::Empty);
    }
    let decoded_size = u32::try_from(decoded.len()).map_err(|_| DecodeError::Invalid {
        offset,
        reason: format!("decoded {} bytes", decoded.len()),
    })?;
    let encoded_size = estimate_encoded_size(&raw[start..]).unwrap_or(DEFAULT_ENCODED_SIZE);
    let complexity = byte_entropy(&decoded);

    debug!(
        decoder = decoder.name(),
        offset = %format!("{offset:#08X}"),
        encoded_size,
        decoded_size,
        "prediction verified"
    );

    let object = DiscoveredObject::builder(offset, encoded_size, decoded_size)
        .confidence(prediction.confidence())
        .region(prediction.expected_region())
        .complexity(complexity)
        .fingerprint(Fingerprint::compute(&decoded, encoded_size, complexity))
        .strategy(prediction.strategy())
        .metadata("decoder", decoder.name())
        .build()?;
    Ok(object)
}

/// Rough encoded length of the object at the start of `data`.
///
/// Scans from byte 32 in steps of two for a run of sixteen `0xFF` or
/// sixteen `0x00` bytes and returns its position. Without such a run the
/// result is [`DEFAULT_ENCODED_SIZE`], capped at the bytes available.
/// Returns `None` for empty input.
///
/// This is a padding heuristic, not a property of any compression format.
pub fn estimate_encoded_size(data: &[u8]) -> Option<u32> {
    if data.is_empty() {
        return None;
    }
    let window = &data[..data.len().min(MAX_SCAN_WINDOW)];
    let found = (SCAN_START..window.len())
        .step_by(SCAN_STEP)
        .find(|&i| {
            window.get(i..i + PADDING_RUN).is_some_and(|run| {
                run.iter().all(|&b| b == 0xFF) || run.iter().all(|&b| b == 0x00)
            })
        });
    let size = match found {
        Some(i) => i,
        None => (DEFAULT_ENCODED_SIZE as usize).min(data.len()),
    };
    u32::try_from(size).ok()
}

/// Shannon entropy of `data` scaled to [0, 1].
fn byte_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let n = data.len() as f64;
    let entropy: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum();
    entropy / 8.0
}
