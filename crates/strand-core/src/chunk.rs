//! Chunk identities and the chunk sum type.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::repo::{chunk_file_name, version_dir_name, Repository, CHUNKS_DIR};

/// Identity of a stored chunk: the version that wrote its payload and its
/// index within that version. The derived ordering is lexicographic, which
/// is also the on-disk ordering of the padded directory and file names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChunkId {
    pub version: u32,
    pub index: u64,
}

impl ChunkId {
    /// Path of the payload file inside `repo_path`.
    pub fn payload_path(&self, repo_path: &Path) -> PathBuf {
        repo_path
            .join(version_dir_name(self.version))
            .join(CHUNKS_DIR)
            .join(chunk_file_name(self.index))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", version_dir_name(self.version), chunk_file_name(self.index))
    }
}

/// One element of a recipe.
///
/// `Stored` and `Delta` resolve their content through the repository they
/// are read from; `Temp` owns its bytes and only reaches a persisted recipe
/// as the terminal partial chunk of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Chunk {
    /// Reference to a committed payload.
    Stored(ChunkId),
    /// In-memory bytes without an identity.
    Temp(Vec<u8>),
    /// A patch against another chunk's content.
    Delta {
        source: ChunkId,
        patch: Vec<u8>,
        size: usize,
    },
}

impl Chunk {
    /// Length of the reconstructed content, not of the on-disk payload.
    pub fn len(&self, chunk_size: usize) -> usize {
        match self {
            Chunk::Stored(_) => chunk_size,
            Chunk::Temp(bytes) => bytes.len(),
            Chunk::Delta { size, .. } => *size,
        }
    }

    pub fn is_empty(&self, chunk_size: usize) -> bool {
        self.len(chunk_size) == 0
    }

    /// Resolve the chunk's bytes. `Stored` loads (and caches) the payload,
    /// `Delta` patches its source's content.
    pub fn content(&self, repo: &Repository) -> Result<Vec<u8>> {
        match self {
            Chunk::Stored(id) => repo.load_chunk_content(id),
            Chunk::Temp(bytes) => Ok(bytes.clone()),
            Chunk::Delta { source, patch, .. } => {
                let base = repo.load_chunk_content(source)?;
                repo.patcher().patch(&base, patch)
            }
        }
    }

    /// A restartable reader over the resolved content.
    pub fn reader(&self, repo: &Repository) -> Result<std::io::Cursor<Vec<u8>>> {
        Ok(std::io::Cursor::new(self.content(repo)?))
    }
}
