//! Byte-counting and SHA-1 wrappers placed around a stream.
//!
//! Each wrapper forwards every byte to or from its inner stream unchanged.
//! Counters reflect the bytes observed so far and can be read at any time;
//! the digest only becomes readable once the wrapper has been closed.

use std::io::{self, Read, Write};

use sha1::{Digest, Sha1};

use crate::error::{Result, TransformError};
use crate::metadata::to_hex;

/// Final figures of a digest wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDigest {
    pub bytes: u64,
    pub sha1: [u8; 20],
}

impl StreamDigest {
    pub fn to_hex(&self) -> String {
        to_hex(&self.sha1)
    }
}

struct DigestState {
    hasher: Option<Sha1>,
    bytes: u64,
    finalized: Option<[u8; 20]>,
}

impl DigestState {
    fn new() -> Self {
        Self {
            hasher: Some(Sha1::new()),
            bytes: 0,
            finalized: None,
        }
    }

    fn observe(&mut self, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        self.bytes += buf.len() as u64;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(buf);
        }
    }

    fn is_closed(&self) -> bool {
        self.finalized.is_some()
    }

    fn finalize(&mut self) {
        if let Some(hasher) = self.hasher.take() {
            self.finalized = Some(hasher.finalize().into());
        }
    }

    fn digest(&self) -> Result<StreamDigest> {
        let sha1 = self
            .finalized
            .ok_or(TransformError::IllegalState("digest not finalized"))?;
        Ok(StreamDigest {
            bytes: self.bytes,
            sha1,
        })
    }
}

// ── Digest wrappers ────────────────────────────────────────────────────────

/// Reader that hashes and counts everything read through it.
pub struct DigestReader<R> {
    inner: R,
    state: DigestState,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: DigestState::new(),
        }
    }

    /// Bytes read so far.
    pub fn byte_count(&self) -> u64 {
        self.state.bytes
    }

    /// Finalizes the digest. Further reads fail; closing again is a no-op.
    pub fn close(&mut self) {
        self.state.finalize();
    }

    pub fn digest(&self) -> Result<StreamDigest> {
        self.state.digest()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state.is_closed() {
            return Err(crate::error::closed_stream_error());
        }
        let n = self.inner.read(buf)?;
        self.state.observe(&buf[..n]);
        Ok(n)
    }
}

/// Writer that hashes and counts everything written through it.
pub struct DigestWriter<W> {
    inner: W,
    state: DigestState,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            state: DigestState::new(),
        }
    }

    /// Bytes accepted so far.
    pub fn byte_count(&self) -> u64 {
        self.state.bytes
    }

    /// Finalizes the digest. The inner writer is neither flushed nor
    /// dropped; finishing it is up to the owner.
    pub fn close(&mut self) {
        self.state.finalize();
    }

    pub fn digest(&self) -> Result<StreamDigest> {
        self.state.digest()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state.is_closed() {
            return Err(crate::error::closed_stream_error());
        }
        let n = self.inner.write(buf)?;
        self.state.observe(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.inner.flush()
    }
}

// ── Plain counters ─────────────────────────────────────────────────────────

/// Reader that counts the bytes read through it.
pub struct CountingReader<R> {
    inner: R,
    bytes: u64,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, bytes: 0 }
    }

    pub fn byte_count(&self) -> u64 {
        self.bytes
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Writer that counts the bytes accepted by its inner writer.
pub struct CountingWriter<W> {
    inner: W,
    bytes: u64,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    pub fn byte_count(&self) -> u64 {
        self.bytes
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SHA-1("abc")
    const ABC_SHA1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";
    // SHA-1("")
    const EMPTY_SHA1: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn reader_hashes_what_it_forwards() {
        let mut reader = DigestReader::new(&b"abc"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(reader.byte_count(), 3);

        reader.close();
        let digest = reader.digest().unwrap();
        assert_eq!(digest.bytes, 3);
        assert_eq!(digest.to_hex(), ABC_SHA1);
    }

    #[test]
    fn digest_before_close_is_illegal_state() {
        let mut reader = DigestReader::new(&b"abc"[..]);
        let mut buf = [0u8; 2];
        reader.read(&mut buf).unwrap();
        assert_eq!(reader.byte_count(), 2);
        assert!(matches!(reader.digest(), Err(TransformError::IllegalState(_))));
    }

    #[test]
    fn writer_hashes_across_split_writes() {
        let mut sink = Vec::new();
        let mut writer = DigestWriter::new(&mut sink);
        writer.write_all(b"a").unwrap();
        writer.write_all(b"").unwrap();
        writer.write_all(b"bc").unwrap();
        assert!(writer.digest().is_err());
        writer.close();
        assert_eq!(writer.digest().unwrap().to_hex(), ABC_SHA1);
        assert!(writer.write(b"more").is_err());
        assert_eq!(sink, b"abc");
    }

    #[test]
    fn empty_stream_has_well_known_digest() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.close();
        let digest = writer.digest().unwrap();
        assert_eq!(digest.bytes, 0);
        assert_eq!(digest.to_hex(), EMPTY_SHA1);
    }

    #[test]
    fn counters_track_forwarded_bytes() {
        let mut reader = CountingReader::new(&[7u8; 100][..]);
        io::copy(&mut reader, &mut io::sink()).unwrap();
        assert_eq!(reader.byte_count(), 100);

        let mut writer = CountingWriter::new(Vec::new());
        writer.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(writer.byte_count(), 3);
        assert_eq!(writer.into_inner(), vec![1, 2, 3]);
    }
}
