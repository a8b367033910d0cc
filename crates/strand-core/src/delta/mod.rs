//! Binary diff codecs for delta chunks.
//!
//! A [`Differ`] turns a (source, target) pair of byte buffers into an opaque
//! patch; the matching [`Patcher`] applies the patch back onto the source.
//! For any source, `patch(source, diff(source, target)) == target`.

mod gear;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};

pub use gear::Gear;

pub trait Differ: Send + Sync {
    fn diff(&self, source: &[u8], target: &[u8]) -> Result<Vec<u8>>;
}

pub trait Patcher: Send + Sync {
    fn patch(&self, source: &[u8], patch: &[u8]) -> Result<Vec<u8>>;
}

/// Selectable diff codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeltaCodec {
    /// Gear-hash copy/literal codec, tuned for chunk-sized buffers.
    #[default]
    Gear,
    /// Suffix-sorting bsdiff; denser patches, slower.
    Bsdiff,
}

impl DeltaCodec {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "gear" => Ok(DeltaCodec::Gear),
            "bsdiff" => Ok(DeltaCodec::Bsdiff),
            other => Err(StrandError::Codec(format!("unknown delta codec: {other}"))),
        }
    }

    pub fn differ(self) -> Box<dyn Differ> {
        match self {
            DeltaCodec::Gear => Box::new(Gear),
            DeltaCodec::Bsdiff => Box::new(Bsdiff),
        }
    }

    pub fn patcher(self) -> Box<dyn Patcher> {
        match self {
            DeltaCodec::Gear => Box::new(Gear),
            DeltaCodec::Bsdiff => Box::new(Bsdiff),
        }
    }
}

/// The bsdiff family, via the `bsdiff` crate.
pub struct Bsdiff;

impl Differ for Bsdiff {
    fn diff(&self, source: &[u8], target: &[u8]) -> Result<Vec<u8>> {
        let mut patch = Vec::new();
        bsdiff::diff(source, target, &mut patch)
            .map_err(|e| StrandError::Diff(e.to_string()))?;
        Ok(patch)
    }
}

impl Patcher for Bsdiff {
    fn patch(&self, source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        let mut target = Vec::new();
        let mut reader = patch;
        bsdiff::patch(source, &mut reader, &mut target)
            .map_err(|e| StrandError::Patch(e.to_string()))?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codecs() -> Vec<(Box<dyn Differ>, Box<dyn Patcher>)> {
        vec![
            (DeltaCodec::Gear.differ(), DeltaCodec::Gear.patcher()),
            (DeltaCodec::Bsdiff.differ(), DeltaCodec::Bsdiff.patcher()),
        ]
    }

    #[test]
    fn patch_inverts_diff() {
        let source = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let mut target = source.clone();
        target[2000..2005].copy_from_slice(b"XXXXX");

        for (differ, patcher) in codecs() {
            let patch = differ.diff(&source, &target).unwrap();
            assert_eq!(patcher.patch(&source, &patch).unwrap(), target);
        }
    }

    #[test]
    fn small_edit_roundtrips_under_both_codecs() {
        let source: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
        let mut target = source.clone();
        for b in &mut target[4096..4101] {
            *b ^= 0xFF;
        }

        for (differ, patcher) in codecs() {
            let patch = differ.diff(&source, &target).unwrap();
            assert_eq!(patcher.patch(&source, &patch).unwrap(), target);
        }

        // Only the gear codec guarantees a compact patch without an outer
        // compressor; bsdiff leaves compression to the caller.
        let patch = Gear.diff(&source, &target).unwrap();
        assert!(
            patch.len() < source.len() / 10,
            "gear patch of {} bytes for a 5-byte edit",
            patch.len()
        );
    }

    #[test]
    fn unrelated_buffers_still_roundtrip() {
        let source = vec![0xAA; 4096];
        let target: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();

        for (differ, patcher) in codecs() {
            let patch = differ.diff(&source, &target).unwrap();
            assert_eq!(patcher.patch(&source, &patch).unwrap(), target);
        }
    }

    #[test]
    fn empty_target() {
        for (differ, patcher) in codecs() {
            let patch = differ.diff(b"something", b"").unwrap();
            assert_eq!(patcher.patch(b"something", &patch).unwrap(), b"");
        }
    }

    #[test]
    fn diff_is_deterministic() {
        let source: Vec<u8> = (0..8192u32).map(|i| (i % 253) as u8).collect();
        let mut target = source.clone();
        target[100] = 0xFF;

        for (differ, _) in codecs() {
            let a = differ.diff(&source, &target).unwrap();
            let b = differ.diff(&source, &target).unwrap();
            assert_eq!(a, b);
        }
    }
}
