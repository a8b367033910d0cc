use crate::compress::Codec;
use crate::delta::DeltaCodec;

/// Default window size, in bytes, of a chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 8 << 10;

/// Default seed for the repository's irreducible polynomial.
///
/// Fingerprints and sketches are only comparable across runs when the
/// polynomial is identical, so this seed is part of the repository format.
pub const DEFAULT_POL_SEED: u64 = 1;

/// Default number of entries in the chunk content cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Default depth of the bounded queue between the matcher and the storage
/// worker.
pub const DEFAULT_STORE_QUEUE_DEPTH: usize = 32;

/// Parameters of a repository.
///
/// These used to be process-wide globals in earlier designs; they are plain
/// values now so that two repositories with different chunk sizes can coexist
/// in one process.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    /// Size of a full chunk, in bytes.
    pub chunk_size: usize,
    /// Rolling window, in bytes, used when computing sketch features.
    pub sketch_window: usize,
    /// Number of super-features per sketch.
    pub sketch_sf_count: usize,
    /// Number of features grouped into one super-feature.
    pub sketch_f_count: usize,
    /// Seed of the rolling polynomial.
    pub pol_seed: u64,
    /// Capacity (entries) of the FIFO chunk content cache.
    pub cache_capacity: usize,
    /// Bound of the matcher -> storage worker queue.
    pub store_queue_depth: usize,
    /// Codec wrapped around chunk payloads and version delta files.
    pub codec: Codec,
    /// Binary diff codec used for delta chunks.
    pub delta_codec: DeltaCodec,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            sketch_window: 32,
            sketch_sf_count: 3,
            sketch_f_count: 4,
            pol_seed: DEFAULT_POL_SEED,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            store_queue_depth: DEFAULT_STORE_QUEUE_DEPTH,
            codec: Codec::Zlib,
            delta_codec: DeltaCodec::Gear,
        }
    }
}

impl RepoConfig {
    /// Config with everything at defaults except the chunk size.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    /// Number of bytes covered by the features of one super-feature.
    ///
    /// Temp chunks smaller than this are merged with their predecessor
    /// before delta encoding is attempted.
    pub fn super_feature_size(&self) -> usize {
        crate::sketch::super_feature_size(self.chunk_size, self.sketch_sf_count, self.sketch_f_count)
    }
}
