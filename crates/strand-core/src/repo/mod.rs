//! The repository: a directory of immutable, numbered versions.
//!
//! ```text
//! repo/
//! ├── 00000/
//! │   ├── chunks/
//! │   │   ├── 000000000000000
//! │   │   └── 000000000000001
//! │   ├── files
//! │   ├── hashes
//! │   └── recipe
//! └── 00001/
//!     └── ...
//! ```
//!
//! `files` and `recipe` hold a structural delta against the aggregated prior
//! state; `hashes` holds the fingerprint and sketch of every chunk stored by
//! that version, in commit order. Replaying the chains reconstructs the
//! in-memory indices, file list and recipe of the latest version.

pub mod files;
mod matcher;
mod store;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crossbeam_channel::bounded;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::FifoCache;
use crate::chunk::{Chunk, ChunkId};
use crate::config::RepoConfig;
use crate::delta::{Differ, Patcher};
use crate::error::{Result, StrandError};
use crate::index::{FingerprintMap, SketchMap};
use crate::pipe;
use crate::rollsum::Pol;
use crate::slice;

use self::files::File;
use self::store::{read_hashes_record, ChunkRecord, StorageWorker};

pub use self::store::ChunkHashes;

pub const CHUNKS_DIR: &str = "chunks";
pub const FILES_NAME: &str = "files";
pub const HASHES_NAME: &str = "hashes";
pub const RECIPE_NAME: &str = "recipe";

/// Number of in-flight blocks in the reader -> matcher pipe.
const PIPE_DEPTH: usize = 8;

pub fn version_dir_name(version: u32) -> String {
    format!("{version:05}")
}

pub fn chunk_file_name(index: u64) -> String {
    format!("{index:015}")
}

pub struct Repository {
    path: PathBuf,
    pub(crate) config: RepoConfig,
    pub(crate) pol: Pol,
    versions: Vec<PathBuf>,
    pub(crate) fingerprints: FingerprintMap,
    pub(crate) sketches: SketchMap,
    recipe: Vec<Chunk>,
    files: Vec<File>,
    pub(crate) cache: FifoCache,
    pub(crate) differ: Box<dyn Differ>,
    patcher: Box<dyn Patcher>,
}

impl Repository {
    /// Create or open the repository directory at `path`.
    pub fn new(path: &Path, config: RepoConfig) -> Result<Self> {
        let features = config.sketch_sf_count * config.sketch_f_count;
        if config.chunk_size == 0 || features == 0 || config.chunk_size < features {
            return Err(StrandError::Config(format!(
                "chunk size {} cannot hold {features} sketch features",
                config.chunk_size
            )));
        }
        let path = std::path::absolute(path)
            .map_err(|e| StrandError::RepoPath(format!("{}: {e}", path.display())))?;
        fs::create_dir_all(&path)
            .map_err(|e| StrandError::RepoPath(format!("{}: {e}", path.display())))?;
        let pol = Pol::generate(config.pol_seed);
        let cache = FifoCache::new(config.cache_capacity);
        let differ = config.delta_codec.differ();
        let patcher = config.delta_codec.patcher();
        Ok(Self {
            path,
            config,
            pol,
            versions: Vec::new(),
            fingerprints: FingerprintMap::new(),
            sketches: SketchMap::new(),
            recipe: Vec::new(),
            files: Vec::new(),
            cache,
            differ,
            patcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn patcher(&self) -> &dyn Patcher {
        self.patcher.as_ref()
    }

    /// Aggregated recipe of the latest loaded version.
    pub fn recipe(&self) -> &[Chunk] {
        &self.recipe
    }

    /// Aggregated file list of the latest loaded version.
    pub fn files(&self) -> &[File] {
        &self.files
    }

    /// Number of loaded versions.
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Load the whole persisted state: version list, hash indices, file-list
    /// chain and recipe chain. The three chains load in parallel and share
    /// nothing until joined.
    pub fn init(&mut self) -> Result<()> {
        self.versions = self.load_versions()?;
        let versions = self.versions.clone();
        let codec = self.config.codec;

        let (hashes, file_list, recipe) = std::thread::scope(|s| {
            let hashes = s.spawn(|| load_hashes(&versions));
            let file_list = s.spawn(|| load_delta_chain::<File>(&versions, FILES_NAME, codec));
            let recipe = s.spawn(|| load_delta_chain::<Chunk>(&versions, RECIPE_NAME, codec));
            (join(hashes), join(file_list), join(recipe))
        });
        let (fingerprints, sketches) = hashes?;
        self.fingerprints = fingerprints;
        self.sketches = sketches;
        self.files = file_list?;
        self.recipe = recipe?;
        debug!(
            versions = self.versions.len(),
            fingerprints = self.fingerprints.len(),
            files = self.files.len(),
            recipe = self.recipe.len(),
            "repository loaded"
        );
        Ok(())
    }

    /// Commit the directory tree at `source` as a new version.
    pub fn commit(&mut self, source: &Path) -> Result<()> {
        let source = std::path::absolute(source)
            .map_err(|e| StrandError::RepoPath(format!("{}: {e}", source.display())))?;
        self.init()?;
        let version = self.versions.len() as u32;
        let version_dir = self.path.join(version_dir_name(version));
        let mkdir = |dir: &Path| {
            fs::create_dir(dir)
                .map_err(|e| StrandError::VersionDir(format!("{}: {e}", dir.display())))
        };
        mkdir(&version_dir)?;
        mkdir(&version_dir.join(CHUNKS_DIR))?;

        let mut files = files::list_files(&source);
        info!(version, files = files.len(), "commit");

        let (store_tx, store_rx) = bounded::<ChunkRecord>(self.config.store_queue_depth);
        let worker = StorageWorker {
            version_dir: version_dir.clone(),
            codec: self.config.codec,
        };

        let (recipe, files) = std::thread::scope(|s| {
            let worker_handle = s.spawn(move || worker.run(store_rx));

            let passes = (|| {
                let mut recipe = Vec::new();
                let mut last = 0u64;
                let mut pass = 0u32;
                loop {
                    pass += 1;
                    info!(pass, "matcher pass");
                    let (writer, reader) = pipe::pipe(PIPE_DEPTH);
                    let batch = std::mem::take(&mut files);
                    let feeder = s.spawn(move || files::concat_files(batch, writer));
                    let matched = self.match_stream(reader, &store_tx, version, last);
                    files = feeder
                        .join()
                        .map_err(|_| StrandError::Worker("file reader panicked".into()))?;
                    let (pass_recipe, next) = matched?;
                    recipe = pass_recipe;
                    if next == last {
                        return Ok((recipe, files));
                    }
                    last = next;
                }
            })();

            drop(store_tx);
            let worker_result = worker_handle
                .join()
                .map_err(|_| StrandError::Worker("storage worker panicked".into()))
                .and_then(|r| r);
            match (passes, worker_result) {
                (Ok(out), Ok(())) => Ok(out),
                // A dead worker explains a failed matcher pass; report it first.
                (_, Err(e)) => Err(e),
                (Err(e), Ok(())) => Err(e),
            }
        })?;

        let files = files::unprefix_files(files, &source);
        self.store_version_delta(&version_dir, FILES_NAME, &self.files, &files)?;
        self.store_version_delta(&version_dir, RECIPE_NAME, &self.recipe, &recipe)?;

        self.versions.push(version_dir);
        self.files = files;
        self.recipe = recipe;
        info!(version, "commit done");
        Ok(())
    }

    /// Restore the latest version into `destination`.
    pub fn restore(&mut self, destination: &Path) -> Result<()> {
        self.init()?;
        info!(version = self.versions.len(), "restore latest version");
        let repo: &Repository = self;
        let mut stream = RecipeReader::new(repo, &repo.recipe);
        for file in &repo.files {
            let Some(relative) = safe_relative_path(&file.path) else {
                warn!(path = %file.path, "skipping unsafe path in file list");
                continue;
            };
            let dest = destination.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            match &file.link {
                Some(target) => restore_symlink(destination, target, &dest),
                None => {
                    let want = file.size.max(0) as u64;
                    let mut out = fs::File::create(&dest)?;
                    let copied = io::copy(&mut (&mut stream).take(want), &mut out)?;
                    if copied != want {
                        error!(
                            path = %file.path,
                            copied,
                            want,
                            "restored file shorter than recorded size"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Load a chunk payload, preferring the cache.
    pub fn load_chunk_content(&self, id: &ChunkId) -> Result<Vec<u8>> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(hit);
        }
        let path = id.payload_path(&self.path);
        let raw = fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StrandError::MissingChunk(*id)
            } else {
                e.into()
            }
        })?;
        let content = self.config.codec.decode(&raw)?;
        self.cache.set(*id, content.clone());
        Ok(content)
    }

    /// Identities of the chunks stored by version `version_index`, in index
    /// order.
    pub(crate) fn version_chunk_ids(&self, version_index: usize) -> Result<Vec<ChunkId>> {
        let dir = self.versions[version_index].join(CHUNKS_DIR);
        let mut count = 0;
        for entry in fs::read_dir(&dir)? {
            if entry?.file_type()?.is_file() {
                count += 1;
            }
        }
        Ok((0..count)
            .map(|index| ChunkId {
                version: version_index as u32,
                index,
            })
            .collect())
    }

    pub(crate) fn version_dirs(&self) -> &[PathBuf] {
        &self.versions
    }

    fn load_versions(&self) -> Result<Vec<PathBuf>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                versions.push(entry.path());
            }
        }
        // Directory order is platform-defined; the zero-padded names make
        // lexicographic order the version order.
        versions.sort();
        Ok(versions)
    }

    fn store_version_delta<T: Serialize + PartialEq + Clone>(
        &self,
        version_dir: &Path,
        name: &str,
        prior: &[T],
        current: &[T],
    ) -> Result<()> {
        let delta = slice::diff(prior, current);
        info!(
            name,
            deleted = delta.del.len(),
            inserted = delta.ins.len(),
            "store version delta"
        );
        let encoded = rmp_serde::to_vec(&delta)?;
        fs::write(version_dir.join(name), self.config.codec.encode(&encoded)?)?;
        Ok(())
    }
}

fn join<T>(handle: std::thread::ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| StrandError::Worker("loader thread panicked".into()))
        .and_then(|r| r)
}

/// Rebuild the fingerprint and sketch maps from every version's `hashes`
/// file. Record order within a version is its chunk index order.
fn load_hashes(versions: &[PathBuf]) -> Result<(FingerprintMap, SketchMap)> {
    let mut fingerprints = FingerprintMap::new();
    let mut sketches = SketchMap::new();
    for (version, dir) in versions.iter().enumerate() {
        let path = dir.join(HASHES_NAME);
        let display = path.display().to_string();
        let file = fs::File::open(&path).map_err(|e| StrandError::CorruptHashes {
            path: display.clone(),
            detail: e.to_string(),
        })?;
        let mut reader = io::BufReader::new(file);
        let mut index = 0u64;
        while let Some(hashes) = read_hashes_record(&mut reader, &display)? {
            let id = ChunkId {
                version: version as u32,
                index,
            };
            fingerprints.set(hashes.fingerprint, id);
            sketches.set(&hashes.super_features, id);
            index += 1;
        }
    }
    Ok((fingerprints, sketches))
}

/// Replay one delta chain (`files` or `recipe`) across every version.
fn load_delta_chain<T>(versions: &[PathBuf], name: &str, codec: crate::compress::Codec) -> Result<Vec<T>>
where
    T: DeserializeOwned + Clone,
{
    let mut aggregate: Vec<T> = Vec::new();
    for dir in versions {
        let path = dir.join(name);
        let fail = |detail: String| StrandError::DeltaDecode {
            name: path.display().to_string(),
            detail,
        };
        let raw = fs::read(&path).map_err(|e| fail(e.to_string()))?;
        let decoded = codec.decode(&raw).map_err(|e| fail(e.to_string()))?;
        let delta: slice::SliceDelta<T> =
            rmp_serde::from_slice(&decoded).map_err(|e| fail(e.to_string()))?;
        aggregate = slice::patch(&aggregate, &delta);
    }
    Ok(aggregate)
}

/// Sequential reader over a recipe's chunk contents.
struct RecipeReader<'a> {
    repo: &'a Repository,
    recipe: &'a [Chunk],
    next: usize,
    current: Vec<u8>,
    pos: usize,
}

impl<'a> RecipeReader<'a> {
    fn new(repo: &'a Repository, recipe: &'a [Chunk]) -> Self {
        Self {
            repo,
            recipe,
            next: 0,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for RecipeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.current.len() {
            let Some(chunk) = self.recipe.get(self.next) else {
                return Ok(0);
            };
            self.next += 1;
            self.current = chunk
                .content(self.repo)
                .map_err(|e| io::Error::other(e.to_string()))?;
            self.pos = 0;
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Turn a persisted forward-slash path into a relative platform path,
/// rejecting anything that could escape the destination.
fn safe_relative_path(stored: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for part in stored.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            part => out.push(part),
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

#[cfg(unix)]
fn restore_symlink(destination: &Path, target: &str, dest: &Path) {
    let target = if Path::new(target).is_absolute() {
        destination.join(target.trim_start_matches('/'))
    } else {
        PathBuf::from(target)
    };
    if let Err(e) = std::os::unix::fs::symlink(&target, dest) {
        error!(link = %dest.display(), error = %e, "could not restore symlink");
    }
}

#[cfg(not(unix))]
fn restore_symlink(_destination: &Path, target: &str, dest: &Path) {
    warn!(link = %dest.display(), target, "symlinks are not restored on this platform");
}
