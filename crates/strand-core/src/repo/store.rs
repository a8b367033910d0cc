//! Storage worker: persists new chunk payloads and per-version hash records.
//!
//! Runs concurrently with the matcher during a commit and is the only writer
//! to the version's `hashes` file and `chunks/` directory. The matcher hands
//! it records over a bounded channel and blocks on backpressure.

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::PathBuf;

use crossbeam_channel::Receiver;
use tracing::{debug, trace};

use crate::chunk::ChunkId;
use crate::compress::Codec;
use crate::error::{Result, StrandError};
use crate::varint::{read_uvarint, write_uvarint};

use super::{chunk_file_name, CHUNKS_DIR, HASHES_NAME};

/// Hashes persisted per stored chunk, in commit order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHashes {
    pub fingerprint: u64,
    pub super_features: Vec<u64>,
}

/// One unit of work for the storage worker.
pub(crate) struct ChunkRecord {
    pub hashes: ChunkHashes,
    pub payload: Vec<u8>,
    pub id: ChunkId,
}

pub(crate) struct StorageWorker {
    pub version_dir: PathBuf,
    pub codec: Codec,
}

impl StorageWorker {
    /// Drain the queue until every sender is gone, then flush.
    pub fn run(self, queue: Receiver<ChunkRecord>) -> Result<()> {
        let hashes_path = self.version_dir.join(HASHES_NAME);
        let mut hashes = BufWriter::new(File::create(&hashes_path)?);
        let mut stored = 0u64;
        for record in queue {
            write_hashes_record(&mut hashes, &record.hashes)?;
            self.store_payload(&record)?;
            stored += 1;
            trace!(id = %record.id, "stored chunk payload");
        }
        hashes.flush()?;
        debug!(stored, "storage worker finished");
        Ok(())
    }

    fn store_payload(&self, record: &ChunkRecord) -> Result<()> {
        let path = self
            .version_dir
            .join(CHUNKS_DIR)
            .join(chunk_file_name(record.id.index));
        std::fs::write(&path, self.codec.encode(&record.payload)?)?;
        Ok(())
    }
}

/// Record layout: fingerprint as little-endian u64, varint count, then each
/// super-feature as little-endian u64.
pub(crate) fn write_hashes_record<W: Write>(w: &mut W, hashes: &ChunkHashes) -> Result<()> {
    w.write_all(&hashes.fingerprint.to_le_bytes())?;
    write_uvarint(w, hashes.super_features.len() as u64)?;
    for sf in &hashes.super_features {
        w.write_all(&sf.to_le_bytes())?;
    }
    Ok(())
}

/// Read the next record. `Ok(None)` at a clean end of file; a torn record is
/// a fatal corruption.
pub(crate) fn read_hashes_record<R: Read>(r: &mut R, path: &str) -> Result<Option<ChunkHashes>> {
    let corrupt = |detail: String| StrandError::CorruptHashes {
        path: path.to_string(),
        detail,
    };

    let mut fp = [0u8; 8];
    let mut read = 0;
    while read < fp.len() {
        match r.read(&mut fp[read..]) {
            Ok(0) if read == 0 => return Ok(None),
            Ok(0) => return Err(corrupt(format!("fingerprint cut short at {read} bytes"))),
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    let fingerprint = u64::from_le_bytes(fp);

    let count = read_uvarint(r).map_err(|e| corrupt(format!("super-feature count: {e}")))?;
    let mut super_features = Vec::with_capacity(count.min(64) as usize);
    for i in 0..count {
        let mut sf = [0u8; 8];
        r.read_exact(&mut sf)
            .map_err(|e| corrupt(format!("super-feature {i} of {count}: {e}")))?;
        super_features.push(u64::from_le_bytes(sf));
    }
    Ok(Some(ChunkHashes {
        fingerprint,
        super_features,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip() {
        let records = vec![
            ChunkHashes {
                fingerprint: 0xDEAD_BEEF,
                super_features: vec![1, 2, 3],
            },
            ChunkHashes {
                fingerprint: 7,
                super_features: vec![],
            },
        ];
        let mut buf = Vec::new();
        for record in &records {
            write_hashes_record(&mut buf, record).unwrap();
        }

        let mut reader = buf.as_slice();
        let mut decoded = Vec::new();
        while let Some(record) = read_hashes_record(&mut reader, "test").unwrap() {
            decoded.push(record);
        }
        assert_eq!(decoded, records);
    }

    #[test]
    fn torn_record_is_corrupt() {
        let mut buf = Vec::new();
        write_hashes_record(
            &mut buf,
            &ChunkHashes {
                fingerprint: 1,
                super_features: vec![9, 9, 9],
            },
        )
        .unwrap();
        buf.truncate(buf.len() - 3);

        let mut reader = buf.as_slice();
        let err = loop {
            match read_hashes_record(&mut reader, "test") {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("torn record read as clean EOF"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, StrandError::CorruptHashes { .. }));
    }

    #[test]
    fn worker_writes_payloads_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("00000");
        std::fs::create_dir_all(version_dir.join(CHUNKS_DIR)).unwrap();

        let worker = StorageWorker {
            version_dir: version_dir.clone(),
            codec: Codec::Zlib,
        };
        let (tx, rx) = crossbeam_channel::bounded(4);
        let handle = std::thread::spawn(move || worker.run(rx));

        for index in 0..3u64 {
            tx.send(ChunkRecord {
                hashes: ChunkHashes {
                    fingerprint: index,
                    super_features: vec![index, index + 1],
                },
                payload: vec![index as u8; 128],
                id: ChunkId { version: 0, index },
            })
            .unwrap();
        }
        drop(tx);
        handle.join().unwrap().unwrap();

        for index in 0..3u64 {
            let raw = std::fs::read(version_dir.join(CHUNKS_DIR).join(chunk_file_name(index)))
                .unwrap();
            assert_eq!(Codec::Zlib.decode(&raw).unwrap(), vec![index as u8; 128]);
        }

        let hashes = std::fs::read(version_dir.join(HASHES_NAME)).unwrap();
        let mut reader = hashes.as_slice();
        let mut count = 0;
        while let Some(record) = read_hashes_record(&mut reader, "test").unwrap() {
            assert_eq!(record.fingerprint, count);
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
