//! Stream matcher: rolling-hash scan of the concatenated file stream.
//!
//! The matcher slides a chunk-sized fingerprint window over the stream. A
//! fingerprint hit emits a reference to the already-stored chunk; windows
//! that never match are cut into chunk-sized temps which are delta-encoded
//! against their best sketch candidate or stored as new chunks. The recipe
//! it returns reproduces the stream byte for byte.

use std::io::{BufReader, ErrorKind, Read};

use crossbeam_channel::Sender;
use tracing::{debug, error, trace};

use crate::chunk::{Chunk, ChunkId};
use crate::error::{Result, StrandError};
use crate::rollsum::RollingHash;
use crate::sketch;

use super::store::{ChunkHashes, ChunkRecord};
use super::Repository;

impl Repository {
    /// Scan `reader`, producing the recipe of the stream and the updated
    /// last-assigned chunk index.
    ///
    /// The buffer holds between one and two windows. A fingerprint hit
    /// flushes whatever precedes the matched window (through the temp-chunk
    /// encoder) and restarts on a fresh window; when the buffer reaches two
    /// windows without a hit, its first half is set aside as the pending
    /// chunk so the scan can keep sliding.
    pub(crate) fn match_stream<R: Read>(
        &mut self,
        reader: R,
        store_tx: &Sender<ChunkRecord>,
        version: u32,
        mut last: u64,
    ) -> Result<(Vec<Chunk>, u64)> {
        let chunk_size = self.config.chunk_size;
        let mut stream = BufReader::with_capacity(chunk_size * 2, reader);
        let mut recipe = Vec::new();

        let mut buffer = Vec::with_capacity(chunk_size * 2);
        fill(&mut stream, &mut buffer, chunk_size)?;
        if buffer.len() < chunk_size {
            if !buffer.is_empty() {
                let (chunk, _) = self.encode_temp_chunk(buffer, version, &mut last, store_tx)?;
                recipe.push(chunk);
            }
            return Ok((recipe, last));
        }

        let mut hasher = RollingHash::new(self.pol);
        hasher.write(&buffer);
        let mut prev: Option<Vec<u8>> = None;

        'scan: loop {
            let fingerprint = hasher.sum64();
            if let Some(id) = self.fingerprints.get(fingerprint) {
                if buffer.len() > chunk_size {
                    // Everything before the matched window is a partial chunk.
                    let boundary = buffer.len() - chunk_size;
                    let partial = buffer[..boundary].to_vec();
                    let mut encoded =
                        self.encode_temp_chunks(prev.take(), partial, version, &mut last, store_tx)?;
                    recipe.append(&mut encoded);
                } else if let Some(pending) = prev.take() {
                    let (chunk, _) =
                        self.encode_temp_chunk(pending, version, &mut last, store_tx)?;
                    recipe.push(chunk);
                }
                trace!(%id, "existing chunk matched");
                recipe.push(Chunk::Stored(id));

                buffer.clear();
                while buffer.len() < chunk_size {
                    match read_byte(&mut stream)? {
                        Some(b) => {
                            hasher.roll(b);
                            buffer.push(b);
                        }
                        None => break 'scan,
                    }
                }
                continue;
            }

            if buffer.len() == chunk_size * 2 {
                if let Some(pending) = prev.take() {
                    let (chunk, _) =
                        self.encode_temp_chunk(pending, version, &mut last, store_tx)?;
                    recipe.push(chunk);
                }
                prev = Some(buffer[..chunk_size].to_vec());
                buffer.drain(..chunk_size);
            }

            match read_byte(&mut stream)? {
                Some(b) => {
                    hasher.roll(b);
                    buffer.push(b);
                }
                None => break,
            }
        }

        if !buffer.is_empty() {
            let current = if buffer.len() > chunk_size {
                if let Some(pending) = prev.take() {
                    let (chunk, _) =
                        self.encode_temp_chunk(pending, version, &mut last, store_tx)?;
                    recipe.push(chunk);
                }
                let tail = buffer[chunk_size..].to_vec();
                buffer.truncate(chunk_size);
                prev = Some(std::mem::take(&mut buffer));
                tail
            } else {
                std::mem::take(&mut buffer)
            };
            let mut encoded =
                self.encode_temp_chunks(prev.take(), current, version, &mut last, store_tx)?;
            recipe.append(&mut encoded);
        }
        Ok((recipe, last))
    }

    /// Try to delta-encode a temp chunk against its best sketch candidate;
    /// otherwise mint a fresh identity for a full window, or keep the bytes
    /// as a partial temp. Returns the chunk and whether it was delta-encoded.
    fn encode_temp_chunk(
        &mut self,
        temp: Vec<u8>,
        version: u32,
        last: &mut u64,
        store_tx: &Sender<ChunkRecord>,
    ) -> Result<(Chunk, bool)> {
        let sketch = sketch::sketch_chunk(
            &temp,
            self.pol,
            self.config.chunk_size,
            self.config.sketch_window,
            self.config.sketch_sf_count,
            self.config.sketch_f_count,
        );
        if let Some(source) = self.sketches.find_similar(&sketch) {
            match self
                .load_chunk_content(&source)
                .and_then(|base| self.differ.diff(&base, &temp))
            {
                Ok(patch) => {
                    debug!(%source, patch = patch.len(), size = temp.len(), "delta chunk");
                    return Ok((
                        Chunk::Delta {
                            source,
                            patch,
                            size: temp.len(),
                        },
                        true,
                    ));
                }
                Err(e) => {
                    error!(%source, error = %e, "delta encoding failed, chunk stays unmatched")
                }
            }
        }
        if temp.len() == self.config.chunk_size {
            let id = ChunkId {
                version,
                index: *last,
            };
            *last += 1;
            let mut hasher = RollingHash::new(self.pol);
            hasher.write(&temp);
            let fingerprint = hasher.sum64();
            self.fingerprints.set(fingerprint, id);
            self.sketches.set(&sketch, id);
            store_tx
                .send(ChunkRecord {
                    hashes: ChunkHashes {
                        fingerprint,
                        super_features: sketch,
                    },
                    payload: temp.clone(),
                    id,
                })
                .map_err(|_| StrandError::Worker("storage worker stopped".into()))?;
            self.cache.set(id, temp);
            debug!(%id, "new stored chunk");
            return Ok((Chunk::Stored(id), false));
        }
        debug!(size = temp.len(), "partial chunk kept as temp");
        Ok((Chunk::Temp(temp), false))
    }

    /// Encode up to two pending temps. A current chunk smaller than one
    /// super-feature carries too little sketch signal on its own, so it is
    /// first merged with its predecessor and the pair is offered to the
    /// delta encoder as one buffer.
    fn encode_temp_chunks(
        &mut self,
        prev: Option<Vec<u8>>,
        curr: Vec<u8>,
        version: u32,
        last: &mut u64,
        store_tx: &Sender<ChunkRecord>,
    ) -> Result<Vec<Chunk>> {
        let Some(prev) = prev else {
            let (chunk, _) = self.encode_temp_chunk(curr, version, last, store_tx)?;
            return Ok(vec![chunk]);
        };
        if curr.len() < self.config.super_feature_size() {
            let mut merged = prev.clone();
            merged.extend_from_slice(&curr);
            let (chunk, delta_encoded) =
                self.encode_temp_chunk(merged, version, last, store_tx)?;
            if delta_encoded {
                return Ok(vec![chunk]);
            }
        }
        let (first, _) = self.encode_temp_chunk(prev, version, last, store_tx)?;
        let (second, _) = self.encode_temp_chunk(curr, version, last, store_tx)?;
        Ok(vec![first, second])
    }
}

/// Read up to `target` further bytes into `buffer`. Read errors on the
/// source stream abort the commit.
fn fill<R: Read>(stream: &mut R, buffer: &mut Vec<u8>, target: usize) -> Result<()> {
    let start = buffer.len();
    buffer.resize(start + target, 0);
    let mut read = 0;
    while read < target {
        match stream.read(&mut buffer[start + read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(StrandError::SourceRead(e.to_string())),
        }
    }
    buffer.truncate(start + read);
    Ok(())
}

fn read_byte<R: Read>(stream: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(StrandError::SourceRead(e.to_string())),
        }
    }
}
