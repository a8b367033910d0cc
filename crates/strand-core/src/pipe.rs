//! Bounded in-process byte pipe.
//!
//! Connects the file-reader thread to the matcher during a commit: a finite,
//! sequential, non-restartable stream with backpressure. Dropping the writer
//! yields EOF on the reader; dropping the reader turns further writes into
//! `BrokenPipe`.

use std::io::{self, Read, Write};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Create a pipe buffering at most `capacity` in-flight write blocks.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(capacity);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            current: Vec::new(),
            pos: 0,
        },
    )
}

pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.current.len() {
            match self.rx.recv() {
                Ok(block) => {
                    self.current = block;
                    self.pos = 0;
                }
                // All writers gone: end of stream.
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_across_threads() {
        let (mut writer, mut reader) = pipe(4);
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let handle = std::thread::spawn(move || {
            for block in payload.chunks(1024) {
                writer.write_all(block).unwrap();
            }
            // Writer drops here, signalling EOF.
        });

        let mut received = Vec::new();
        reader.read_to_end(&mut received).unwrap();
        handle.join().unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn eof_after_writer_drop() {
        let (writer, mut reader) = pipe(1);
        drop(writer);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_after_reader_drop_is_broken_pipe() {
        let (mut writer, reader) = pipe(1);
        drop(reader);
        let err = writer.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn bounded_capacity_applies_backpressure() {
        let (mut writer, mut reader) = pipe(2);
        writer.write_all(b"a").unwrap();
        writer.write_all(b"b").unwrap();

        let handle = std::thread::spawn(move || {
            // This send blocks until the reader drains a block.
            writer.write_all(b"c").unwrap();
        });

        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"a");
        handle.join().unwrap();
    }
}
