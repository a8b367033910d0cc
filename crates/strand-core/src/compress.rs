//! Payload codec: optional zlib around chunk payloads and version files.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};

/// Codec wrapped around chunk payloads and version delta files. `None` is
/// the identity wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Codec {
    None,
    #[default]
    Zlib,
}

impl Codec {
    /// Parse a codec name, e.g. from the CLI.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(Codec::None),
            "zlib" => Ok(Codec::Zlib),
            other => Err(StrandError::Codec(format!("unknown codec: {other}"))),
        }
    }

    pub fn encode(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub fn decode(self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.wrap_reader(data).read_to_end(&mut out)?;
        Ok(out)
    }

    /// Wrap a sink for streaming writes; [`WrappedWrite::finish`] flushes
    /// the codec trailer and drops the inner writer.
    pub fn wrap_writer(self, w: Box<dyn Write + Send>) -> Box<dyn WrappedWrite + Send> {
        match self {
            Codec::None => Box::new(Passthrough(w)),
            Codec::Zlib => Box::new(ZlibStream(ZlibEncoder::new(w, Compression::default()))),
        }
    }

    /// Wrap a source for streaming reads of a wrapped payload.
    pub fn wrap_reader<'a, R: Read + Send + 'a>(self, r: R) -> Box<dyn Read + Send + 'a> {
        match self {
            Codec::None => Box::new(r),
            Codec::Zlib => Box::new(ZlibDecoder::new(r)),
        }
    }
}

/// A writer that must be finished to be valid.
pub trait WrappedWrite: Write {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

struct Passthrough(Box<dyn Write + Send>);

impl Write for Passthrough {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl WrappedWrite for Passthrough {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

struct ZlibStream(ZlibEncoder<Box<dyn Write + Send>>);

impl Write for ZlibStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl WrappedWrite for ZlibStream {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.0.finish().map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_roundtrip() {
        let payload = b"strand strand strand strand strand strand".repeat(16);
        let encoded = Codec::Zlib.encode(&payload).unwrap();
        assert!(encoded.len() < payload.len());
        assert_eq!(Codec::Zlib.decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn identity_codec_is_transparent() {
        let payload = b"as-is".to_vec();
        let encoded = Codec::None.encode(&payload).unwrap();
        assert_eq!(encoded, payload);
        assert_eq!(Codec::None.decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn empty_payload_roundtrip() {
        for codec in [Codec::None, Codec::Zlib] {
            let encoded = codec.encode(&[]).unwrap();
            assert_eq!(codec.decode(&encoded).unwrap(), Vec::<u8>::new());
        }
    }

    #[test]
    fn streaming_writer_matches_buffer_encode() {
        use std::sync::{Arc, Mutex};

        /// Test-only sink collecting writes into shared storage.
        struct SharedSink(Arc<Mutex<Vec<u8>>>);

        impl Write for SharedSink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let payload = b"streaming and buffered zlib must agree".repeat(64);
        let storage = Arc::new(Mutex::new(Vec::new()));
        let mut w = Codec::Zlib.wrap_writer(Box::new(SharedSink(Arc::clone(&storage))));
        w.write_all(&payload).unwrap();
        w.finish().unwrap();

        let streamed = storage.lock().unwrap().clone();
        assert_eq!(Codec::Zlib.decode(&streamed).unwrap(), payload);
    }

    #[test]
    fn from_name_parses_known_codecs() {
        assert_eq!(Codec::from_name("zlib").unwrap(), Codec::Zlib);
        assert_eq!(Codec::from_name("none").unwrap(), Codec::None);
        assert!(Codec::from_name("lzma").is_err());
    }
}
