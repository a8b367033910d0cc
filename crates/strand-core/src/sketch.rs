//! Resemblance sketches.
//!
//! A sketch is a short list of super-features. The buffer is cut into
//! fixed-offset regions; the feature of a region is the maximum rolling-hash
//! value over every window inside it, which survives small edits. Groups of
//! consecutive features are then hashed together into super-features. Two
//! buffers sharing a super-feature are likely near-duplicates.

use crate::rollsum::{Pol, RollingHash};

const FEATURE_BYTES: usize = 8;

/// Size, in bytes, of one feature region.
pub fn feature_size(chunk_size: usize, sf_count: usize, f_count: usize) -> usize {
    chunk_size / (sf_count * f_count)
}

/// Number of bytes covered by the features of a single super-feature.
pub fn super_feature_size(chunk_size: usize, sf_count: usize, f_count: usize) -> usize {
    feature_size(chunk_size, sf_count, f_count) * f_count
}

/// Compute the sketch of `data`.
///
/// Returns at most `sf_count` super-features; buffers smaller than one
/// feature region produce an empty sketch, partial buffers a partial one.
pub fn sketch_chunk(
    data: &[u8],
    pol: Pol,
    chunk_size: usize,
    w_size: usize,
    sf_count: usize,
    f_count: usize,
) -> Vec<u64> {
    let f_size = feature_size(chunk_size, sf_count, f_count);
    if f_size == 0 || data.len() < f_size {
        return Vec::new();
    }
    let mut hasher = RollingHash::new(pol);

    let mut features = Vec::with_capacity(sf_count * f_count);
    for region in data.chunks_exact(f_size) {
        features.push(feature_of(&mut hasher, region, w_size));
        if features.len() == sf_count * f_count {
            break;
        }
    }

    let mut super_features = Vec::with_capacity(sf_count);
    let mut buf = vec![0u8; FEATURE_BYTES * f_count];
    for group in features.chunks_exact(f_count) {
        for (i, feature) in group.iter().enumerate() {
            buf[i * FEATURE_BYTES..(i + 1) * FEATURE_BYTES]
                .copy_from_slice(&feature.to_le_bytes());
        }
        hasher.write(&buf);
        super_features.push(hasher.sum64());
    }
    super_features
}

/// Maximum hash over every `w_size`-byte window of `region`.
fn feature_of(hasher: &mut RollingHash, region: &[u8], w_size: usize) -> u64 {
    let w = w_size.min(region.len());
    hasher.write(&region[..w]);
    let mut max = hasher.sum64();
    for &b in &region[w..] {
        hasher.roll(b);
        max = max.max(hasher.sum64());
    }
    max
}
