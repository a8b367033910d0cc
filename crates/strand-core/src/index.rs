//! In-memory hash indices over committed chunks.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::chunk::ChunkId;

/// Exact-match index: 64-bit rolling fingerprint of a full window to the
/// chunk that owns it.
#[derive(Debug, Default)]
pub struct FingerprintMap {
    entries: HashMap<u64, ChunkId>,
}

impl FingerprintMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: u64) -> Option<ChunkId> {
        self.entries.get(&fingerprint).copied()
    }

    /// Insert a fingerprint. Duplicates cannot occur while the chunk size is
    /// stable; if one does, the last writer wins so the map never points at
    /// a stale payload silently.
    pub fn set(&mut self, fingerprint: u64, id: ChunkId) {
        if let Some(previous) = self.entries.insert(fingerprint, id) {
            error!(%previous, %id, fingerprint, "duplicate fingerprint, overwriting");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Similarity index: super-feature to the insertion-ordered chunks that
/// exhibit it. A chunk appears at most once per super-feature.
#[derive(Debug, Default)]
pub struct SketchMap {
    entries: HashMap<u64, Vec<ChunkId>>,
}

impl SketchMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, super_features: &[u64], id: ChunkId) {
        for &sf in super_features {
            let ids = self.entries.entry(sf).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    /// Best similarity candidate for a sketch: the chunk with the highest
    /// co-occurrence count across the given super-features. A single match
    /// counts; ties resolve to the most recently matched chunk.
    pub fn find_similar(&self, super_features: &[u64]) -> Option<ChunkId> {
        let mut counts: HashMap<ChunkId, usize> = HashMap::new();
        let mut best: Option<ChunkId> = None;
        let mut max = 0;
        for sf in super_features {
            let Some(ids) = self.entries.get(sf) else {
                continue;
            };
            for id in ids {
                let count = counts.entry(*id).or_insert(0);
                *count += 1;
                debug!(%id, count = *count, "similar chunk candidate");
                if *count >= max {
                    max = *count;
                    best = Some(*id);
                }
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
