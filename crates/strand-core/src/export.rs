//! Streaming export of committed versions.
//!
//! An [`Exporter`] hands out one [`VersionSink`] per version; the repository
//! writes the version's wrapped chunk concatenation, raw recipe-delta bytes
//! and raw files-delta bytes into it, then waits for the end signal. The
//! same interface feeds the pool drive and the plain directory sink.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver};
use tracing::{error, info};

use crate::error::{Result, StrandError};
use crate::pipe::{self, PipeReader};
use crate::repo::{version_dir_name, Repository, FILES_NAME, RECIPE_NAME};
use crate::varint::write_uvarint;

/// Destination streams for one exported version.
pub struct VersionSink {
    pub chunks: Box<dyn Write + Send>,
    pub recipe: Box<dyn Write + Send>,
    pub files: Box<dyn Write + Send>,
    /// Signalled once the sink has durably consumed all three streams.
    pub end: Receiver<()>,
}

pub trait Exporter {
    fn export_version(&mut self) -> Result<VersionSink>;
}

impl Repository {
    /// Stream every committed version into `exporter`, oldest first.
    pub fn export(&mut self, exporter: &mut dyn Exporter) -> Result<()> {
        self.init()?;
        for version in 0..self.version_dirs().len() {
            let sink = exporter.export_version()?;

            let ids = self.version_chunk_ids(version)?;
            let chunk_bytes = if ids.is_empty() {
                drop(sink.chunks);
                0
            } else {
                let counter = WriteCounter::new(sink.chunks);
                let count = counter.count();
                let mut wrapped = self.config().codec.wrap_writer(Box::new(counter));
                for id in &ids {
                    wrapped.write_all(&self.load_chunk_content(id)?)?;
                }
                wrapped.finish()?;
                count.load(std::sync::atomic::Ordering::Relaxed)
            };

            let version_dir = self.version_dirs()[version].clone();
            let recipe_bytes = fs::read(version_dir.join(RECIPE_NAME))?;
            let mut recipe = sink.recipe;
            recipe.write_all(&recipe_bytes)?;
            drop(recipe);
            let files_bytes = fs::read(version_dir.join(FILES_NAME))?;
            let mut files = sink.files;
            files.write_all(&files_bytes)?;
            drop(files);

            info!(
                version,
                chunks = chunk_bytes,
                recipe = recipe_bytes.len(),
                files = files_bytes.len(),
                "exported version"
            );

            sink.end
                .recv()
                .map_err(|_| StrandError::Worker("exporter stopped before signalling end".into()))?;
        }
        Ok(())
    }
}

/// Counts the bytes passed through to the inner writer.
struct WriteCounter {
    inner: Box<dyn Write + Send>,
    count: Arc<std::sync::atomic::AtomicU64>,
}

impl WriteCounter {
    fn new(inner: Box<dyn Write + Send>) -> Self {
        Self {
            inner,
            count: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    /// Handle onto the running count, readable after the counter is consumed.
    fn count(&self) -> Arc<std::sync::atomic::AtomicU64> {
        Arc::clone(&self.count)
    }
}

impl Write for WriteCounter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count
            .fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Directory exporter
// ---------------------------------------------------------------------------

/// Writes each version's three streams as plain files under
/// `<dest>/<version>/`.
pub struct DirExporter {
    dest: PathBuf,
    next_version: u32,
}

impl DirExporter {
    pub fn new(dest: &Path) -> Result<Self> {
        fs::create_dir_all(dest)?;
        Ok(Self {
            dest: dest.to_path_buf(),
            next_version: 0,
        })
    }
}

impl Exporter for DirExporter {
    fn export_version(&mut self) -> Result<VersionSink> {
        let dir = self.dest.join(version_dir_name(self.next_version));
        self.next_version += 1;
        fs::create_dir_all(&dir)?;
        let (end_tx, end) = bounded(1);
        // Plain file sinks consume synchronously; the end signal can be
        // given up front.
        end_tx
            .send(())
            .map_err(|_| StrandError::Worker("end channel closed".into()))?;
        Ok(VersionSink {
            chunks: Box::new(fs::File::create(dir.join("chunks"))?),
            recipe: Box::new(fs::File::create(dir.join(RECIPE_NAME))?),
            files: Box::new(fs::File::create(dir.join(FILES_NAME))?),
            end,
        })
    }
}

// ---------------------------------------------------------------------------
// Pool drive exporter
// ---------------------------------------------------------------------------

/// Spreads versions across a set of fixed-size-track pool files: the chunk
/// stream fills tracks in pools 1..N, pool 0 receives a varint
/// `(chunks, recipe, files)` header followed by the recipe and file-list
/// bytes. Models write-once media where a track is the append unit.
pub struct PoolDrive {
    pools: Vec<PathBuf>,
    track_size: usize,
    tracks_per_pool: usize,
    track_counts: Arc<Mutex<Vec<usize>>>,
}

impl PoolDrive {
    pub fn new(
        dest: &Path,
        pool_count: usize,
        track_size: usize,
        tracks_per_pool: usize,
    ) -> Result<Self> {
        if pool_count < 2 {
            return Err(StrandError::Other(
                "a pool drive needs at least two pools".into(),
            ));
        }
        if track_size == 0 {
            return Err(StrandError::Other("track size must be non-zero".into()));
        }
        fs::create_dir_all(dest)?;
        let mut pools = Vec::with_capacity(pool_count);
        let mut track_counts = Vec::with_capacity(pool_count);
        for i in 0..pool_count {
            let path = dest.join(format!("{i:02}"));
            let existing = match fs::metadata(&path) {
                Ok(meta) => meta.len() as usize / track_size,
                Err(_) => {
                    fs::write(&path, b"")?;
                    0
                }
            };
            pools.push(path);
            track_counts.push(existing);
        }
        Ok(Self {
            pools,
            track_size,
            tracks_per_pool,
            track_counts: Arc::new(Mutex::new(track_counts)),
        })
    }

    /// Total number of written tracks across all pools.
    pub fn track_count(&self) -> usize {
        self.track_counts.lock().expect("pool lock poisoned").iter().sum()
    }

    fn writer_state(&self) -> PoolWriter {
        PoolWriter {
            pools: self.pools.clone(),
            track_size: self.track_size,
            tracks_per_pool: self.tracks_per_pool,
            track_counts: Arc::clone(&self.track_counts),
        }
    }
}

impl Exporter for PoolDrive {
    fn export_version(&mut self) -> Result<VersionSink> {
        let (chunks_w, chunks_r) = pipe::pipe(8);
        let (recipe_w, recipe_r) = pipe::pipe(8);
        let (files_w, files_r) = pipe::pipe(8);
        let (end_tx, end) = bounded(1);
        let writer = self.writer_state();
        std::thread::spawn(move || {
            if let Err(e) = writer.write_version(chunks_r, recipe_r, files_r) {
                error!(error = %e, "pool drive write failed");
            }
            let _ = end_tx.send(());
        });
        Ok(VersionSink {
            chunks: Box::new(chunks_w),
            recipe: Box::new(recipe_w),
            files: Box::new(files_w),
            end,
        })
    }
}

struct PoolWriter {
    pools: Vec<PathBuf>,
    track_size: usize,
    tracks_per_pool: usize,
    track_counts: Arc<Mutex<Vec<usize>>>,
}

impl PoolWriter {
    /// Consume the three version streams in write order.
    fn write_version(
        &self,
        mut chunks: PipeReader,
        mut recipe: PipeReader,
        mut files: PipeReader,
    ) -> Result<()> {
        let mut chunk_bytes = Vec::new();
        chunks.read_to_end(&mut chunk_bytes)?;
        let mut recipe_bytes = Vec::new();
        recipe.read_to_end(&mut recipe_bytes)?;
        let mut files_bytes = Vec::new();
        files.read_to_end(&mut files_bytes)?;

        self.append_tracks(&chunk_bytes)?;

        let mut header = Vec::new();
        write_uvarint(&mut header, chunk_bytes.len() as u64)?;
        write_uvarint(&mut header, recipe_bytes.len() as u64)?;
        write_uvarint(&mut header, files_bytes.len() as u64)?;
        header.extend_from_slice(&recipe_bytes);
        header.extend_from_slice(&files_bytes);
        self.append_to_pool(0, &header)?;
        Ok(())
    }

    /// Fill whole tracks with the chunk stream, moving to the next pool when
    /// one is full. The last track is zero-padded.
    fn append_tracks(&self, data: &[u8]) -> Result<()> {
        for track in data.chunks(self.track_size) {
            let pool = self.next_data_pool()?;
            let mut padded = track.to_vec();
            padded.resize(self.track_size, 0);
            append_file(&self.pools[pool], &padded)?;
        }
        Ok(())
    }

    fn next_data_pool(&self) -> Result<usize> {
        let mut counts = self.track_counts.lock().expect("pool lock poisoned");
        for pool in 1..self.pools.len() {
            if counts[pool] < self.tracks_per_pool {
                counts[pool] += 1;
                return Ok(pool);
            }
        }
        Err(StrandError::Other("all pools are full".into()))
    }

    fn append_to_pool(&self, pool: usize, data: &[u8]) -> Result<()> {
        let tracks = data.len().div_ceil(self.track_size);
        let mut padded = data.to_vec();
        padded.resize(tracks * self.track_size, 0);
        append_file(&self.pools[pool], &padded)?;
        let mut counts = self.track_counts.lock().expect("pool lock poisoned");
        counts[pool] += tracks;
        Ok(())
    }
}

fn append_file(path: &Path, data: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_counter_tracks_bytes() {
        let mut counter = WriteCounter::new(Box::new(std::io::sink()));
        let count = counter.count();
        counter.write_all(&[0u8; 123]).unwrap();
        counter.write_all(&[0u8; 7]).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::Relaxed), 130);
    }

    #[test]
    fn pool_drive_requires_two_pools() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PoolDrive::new(dir.path(), 1, 1020, 100).is_err());
        assert!(PoolDrive::new(dir.path(), 2, 1020, 100).is_ok());
    }

    #[test]
    fn pool_drive_reloads_existing_track_counts() {
        let dir = tempfile::tempdir().unwrap();
        let drive = PoolDrive::new(dir.path(), 3, 100, 10).unwrap();
        drive.writer_state().append_to_pool(1, &[7u8; 250]).unwrap();
        assert_eq!(drive.track_count(), 3);

        let reopened = PoolDrive::new(dir.path(), 3, 100, 10).unwrap();
        assert_eq!(reopened.track_count(), 3);
    }

    #[test]
    fn tracks_are_padded_to_track_size() {
        let dir = tempfile::tempdir().unwrap();
        let drive = PoolDrive::new(dir.path(), 2, 64, 10).unwrap();
        drive.writer_state().append_tracks(&[1u8; 100]).unwrap();
        let pool = fs::read(dir.path().join("01")).unwrap();
        assert_eq!(pool.len(), 128);
        assert_eq!(&pool[..100], &[1u8; 100][..]);
        assert_eq!(&pool[100..], &[0u8; 28][..]);
    }

    #[test]
    fn pool_drive_consumes_version_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = PoolDrive::new(dir.path(), 3, 64, 100).unwrap();

        let sink = drive.export_version().unwrap();
        let mut chunks = sink.chunks;
        chunks.write_all(&[1u8; 100]).unwrap();
        drop(chunks);
        let mut recipe = sink.recipe;
        recipe.write_all(b"recipe-bytes").unwrap();
        drop(recipe);
        let mut files = sink.files;
        files.write_all(b"files-bytes").unwrap();
        drop(files);
        sink.end.recv().unwrap();

        // 100 chunk bytes fill two 64-byte tracks in pool 1.
        assert_eq!(fs::read(dir.path().join("01")).unwrap().len(), 128);
        // Pool 0 got the header plus recipe and files bytes, track-padded.
        let pool0 = fs::read(dir.path().join("00")).unwrap();
        assert_eq!(pool0.len(), 64);
        assert!(!pool0.starts_with(&[0]));
    }

    #[test]
    fn full_pool_moves_to_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let drive = PoolDrive::new(dir.path(), 3, 16, 2).unwrap();
        // Four tracks fill both data pools; the next append overflows.
        drive.writer_state().append_tracks(&[9u8; 64]).unwrap();
        assert_eq!(fs::read(dir.path().join("01")).unwrap().len(), 32);
        assert_eq!(fs::read(dir.path().join("02")).unwrap().len(), 32);
        let err = drive.writer_state().append_tracks(&[9u8; 32]).unwrap_err();
        assert!(matches!(err, StrandError::Other(_)));
    }
}
