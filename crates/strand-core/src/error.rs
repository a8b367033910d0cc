use thiserror::Error;

use crate::chunk::ChunkId;

pub type Result<T> = std::result::Result<T, StrandError>;

#[derive(Debug, Error)]
pub enum StrandError {
    #[error("repository path unusable: {0}")]
    RepoPath(String),

    #[error("version directory: {0}")]
    VersionDir(String),

    #[error("corrupt hashes record in '{path}': {detail}")]
    CorruptHashes { path: String, detail: String },

    #[error("chunk payload not found: {0}")]
    MissingChunk(ChunkId),

    #[error("source stream read failed: {0}")]
    SourceRead(String),

    #[error("version delta for '{name}' failed to decode: {detail}")]
    DeltaDecode { name: String, detail: String },

    #[error("binary diff failed: {0}")]
    Diff(String),

    #[error("binary patch failed: {0}")]
    Patch(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker thread failed: {0}")]
    Worker(String),

    #[error("serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
