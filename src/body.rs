//! Replayable request bodies.
//!
//! A request body may be read by the normalizer, by rule evaluation and
//! again when the request is forwarded upstream. [`ReplayReader`] mirrors
//! every consumed byte into a backing buffer and rewinds itself when the
//! end of the stream is reached, so the next full read yields the same
//! bytes.

use bytes::{Bytes, BytesMut};
use std::io::{self, Read};

/// Body decorator that rewinds itself at end-of-stream.
///
/// Not safe for concurrent readers: one in-flight call owns it.
#[derive(Debug, Default)]
pub struct ReplayReader {
    forward: BytesMut,
    backing: BytesMut,
}

impl ReplayReader {
    /// Buffer the whole of `source`.
    pub fn new<R: Read>(mut source: R) -> io::Result<Self> {
        let mut buffered = Vec::new();
        source.read_to_end(&mut buffered)?;
        Ok(Self::from_bytes(buffered))
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes: Bytes = bytes.into();
        Self {
            forward: BytesMut::from(&bytes[..]),
            backing: BytesMut::with_capacity(bytes.len()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Total body length, regardless of the current read position.
    pub fn len(&self) -> usize {
        self.forward.len() + self.backing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole body from the current position to the end, leaving
    /// the reader rewound.
    pub fn read_all(&mut self) -> io::Result<Bytes> {
        let mut out = Vec::with_capacity(self.len());
        self.read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }

    fn rewind(&mut self) {
        let mut replay = self.backing.split();
        replay.unsplit(self.forward.split());
        self.forward = replay;
    }
}

impl Read for ReplayReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.forward.is_empty() {
            self.rewind();
            return Ok(0);
        }

        let n = buf.len().min(self.forward.len());
        let chunk = self.forward.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        self.backing.extend_from_slice(&chunk);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_read_replays() {
        let data = b"Hello, world!";
        let mut reader = ReplayReader::new(&data[..]).unwrap();

        let mut first = String::new();
        reader.read_to_string(&mut first).unwrap();
        assert_eq!(first.as_bytes(), data);

        let mut second = String::new();
        reader.read_to_string(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_partial_reads_then_rewind() {
        let mut reader = ReplayReader::from_bytes("abcdef");
        let mut buf = [0u8; 4];

        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        // End of stream rewinds.
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.len(), 6);
    }

    #[test]
    fn test_read_all_from_middle_keeps_whole_body() {
        let mut reader = ReplayReader::from_bytes("abcdef");
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).unwrap();

        assert_eq!(reader.read_all().unwrap(), Bytes::from_static(b"cdef"));
        assert_eq!(reader.read_all().unwrap(), Bytes::from_static(b"abcdef"));
    }

    #[test]
    fn test_empty_body() {
        let mut reader = ReplayReader::empty();
        assert!(reader.is_empty());
        assert_eq!(reader.read_all().unwrap(), Bytes::new());
    }
}
