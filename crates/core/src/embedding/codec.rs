//! Binary encoding for embedding vectors, stored verbatim in both the
//! on-disk cache and the vector-index blob columns.
//!
//! Wire format: a little-endian `u32` dimension count followed by that
//! many little-endian `f32` values — `<I{d}f` in `struct` terms. Decoding
//! validates in a fixed order (too short, zero dimension, dimension over
//! the safety limit, then exact length) so error messages are stable.

use crate::{Error, Result};

/// Dimensions above this are rejected outright — a guard against a
/// corrupted or adversarial length prefix causing an enormous allocation.
const MAX_DIMENSIONS: u32 = 10_000;

/// Encode `vector` as `[u32 dimensions][f32; dimensions]`, all little-endian.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + vector.len() * 4);
    out.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a buffer produced by [`encode`].
pub fn decode(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() < 4 {
        return Err(Error::EmbeddingFormatError(format!(
            "embedding data too short: expected at least 4 bytes, got {}",
            data.len()
        )));
    }

    let dimensions = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);

    if dimensions == 0 {
        return Err(Error::EmbeddingFormatError(
            "embedding dimension cannot be zero".to_owned(),
        ));
    }
    if dimensions > MAX_DIMENSIONS {
        return Err(Error::EmbeddingFormatError(format!(
            "embedding dimension {dimensions} exceeds maximum allowed {MAX_DIMENSIONS}"
        )));
    }

    let expected_size = 4 + dimensions as usize * 4;
    if data.len() != expected_size {
        return Err(Error::EmbeddingFormatError(format!(
            "embedding data size mismatch: expected exactly {expected_size} bytes, got {}",
            data.len()
        )));
    }

    let mut values = Vec::with_capacity(dimensions as usize);
    for chunk in data[4..].chunks_exact(4) {
        values.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(values)
}
