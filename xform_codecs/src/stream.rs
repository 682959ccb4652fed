//! Instrumented stream stacks shared by every codec.
//!
//! ```text
//! push:   caller ─▶ DigestWriter ─▶ encoder ─▶ CountingWriter ─▶ sink
//! pull:   source ─▶ DigestReader ─▶ encoder ─▶ CountingReader ─▶ caller
//! decode: source ─▶ CountingReader ─▶ decoder ─▶ DigestReader ─▶ caller
//! ```
//!
//! The digest always covers the uncompressed side and the counter the
//! compressed side. Closing a stack computes [`CompressionStats`] and seals
//! them, merged over the caller's metadata, into a [`FinalMetadata`].

use std::io::{self, Read, Write};

use xform_core::error::closed_stream_error;
use xform_core::{
    CompressionStats, CountingReader, DigestReader, DigestWriter, FinalMetadata, Metadata,
    Result, StreamDigest, TransformError, WorkerProbe,
};

/// Raw bytes in, encoded bytes out to the sink given at construction.
pub trait EncodeWriter: Write + Send {
    /// Writes the stream trailer, flushes the sink, and seals the metadata.
    fn close(&mut self) -> Result<()>;

    fn metadata(&self) -> Result<&Metadata>;
}

/// Encoded bytes out, raw bytes pulled from the source given at construction.
pub trait EncodeReader: Read + Send {
    fn close(&mut self) -> Result<()>;

    fn metadata(&self) -> Result<&Metadata>;

    /// Set when encoding runs on a worker thread behind this reader.
    fn worker_probe(&self) -> Option<WorkerProbe>;
}

/// Decoded bytes out, encoded bytes pulled from the source.
pub trait DecodeReader: Read + Send {
    fn close(&mut self) -> Result<()>;

    /// Stored metadata with the compression keys recomputed from the
    /// bytes actually decoded.
    fn metadata(&self) -> Result<&Metadata>;
}

fn already_closed() -> TransformError {
    TransformError::IllegalState("stream already closed")
}

// ── Push ───────────────────────────────────────────────────────────────────

/// A compressor writing into a counted sink.
pub trait SinkEncoder: Write + Send {
    /// Emits buffered data and the stream trailer.
    fn finish_stream(&mut self) -> io::Result<()>;

    /// Flushes the caller's sink, below the encoder.
    fn flush_sink(&mut self) -> io::Result<()>;

    /// Bytes the encoder has written into the sink.
    fn compressed_bytes(&self) -> u64;

    /// Forwarded from `Write::flush` on the stack.
    fn flush_encoder(&mut self) -> io::Result<()> {
        self.flush()
    }
}

pub struct PushStream<E: SinkEncoder> {
    encoder: DigestWriter<E>,
    meta: FinalMetadata,
}

impl<E: SinkEncoder> PushStream<E> {
    pub(crate) fn new(encoder: E, metadata: Metadata) -> Self {
        Self {
            encoder: DigestWriter::new(encoder),
            meta: FinalMetadata::new(metadata),
        }
    }

    /// Encoded bytes written to the sink so far.
    pub fn bytes_out(&self) -> u64 {
        self.encoder.get_ref().compressed_bytes()
    }
}

impl<E: SinkEncoder> Write for PushStream<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.meta.is_final() {
            return Err(closed_stream_error());
        }
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.meta.is_final() {
            return Ok(());
        }
        self.encoder.get_mut().flush_encoder()
    }
}

impl<E: SinkEncoder> EncodeWriter for PushStream<E> {
    fn close(&mut self) -> Result<()> {
        if self.meta.is_final() {
            return Err(already_closed());
        }
        let encoder = self.encoder.get_mut();
        encoder.finish_stream()?;
        encoder.flush_sink()?;
        self.encoder.close();
        let digest = self.encoder.digest()?;
        let stats = CompressionStats {
            uncompressed_size: digest.bytes,
            compressed_size: self.bytes_out(),
            sha1: digest.sha1,
        };
        self.meta.finalize(&stats)
    }

    fn metadata(&self) -> Result<&Metadata> {
        self.meta.get()
    }
}

// ── Pull ───────────────────────────────────────────────────────────────────

/// A compressor reading raw bytes through a [`DigestReader`].
pub trait SourceEncoder: Read + Send {
    /// Stops reading the source and finalizes its digest.
    fn close_source(&mut self) -> io::Result<()>;

    fn source_digest(&self) -> Result<StreamDigest>;

    fn worker_probe(&self) -> Option<WorkerProbe> {
        None
    }
}

pub struct PullStream<E: SourceEncoder> {
    encoder: CountingReader<E>,
    meta: FinalMetadata,
}

impl<E: SourceEncoder> PullStream<E> {
    pub(crate) fn new(encoder: E, metadata: Metadata) -> Self {
        Self {
            encoder: CountingReader::new(encoder),
            meta: FinalMetadata::new(metadata),
        }
    }

    /// Encoded bytes handed out so far.
    pub fn bytes_out(&self) -> u64 {
        self.encoder.byte_count()
    }
}

impl<E: SourceEncoder> Read for PullStream<E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.meta.is_final() {
            return Err(closed_stream_error());
        }
        self.encoder.read(buf)
    }
}

impl<E: SourceEncoder> EncodeReader for PullStream<E> {
    fn close(&mut self) -> Result<()> {
        if self.meta.is_final() {
            return Err(already_closed());
        }
        self.encoder.get_mut().close_source()?;
        let digest = self.encoder.get_ref().source_digest()?;
        let stats = CompressionStats {
            uncompressed_size: digest.bytes,
            compressed_size: self.bytes_out(),
            sha1: digest.sha1,
        };
        self.meta.finalize(&stats)
    }

    fn metadata(&self) -> Result<&Metadata> {
        self.meta.get()
    }

    fn worker_probe(&self) -> Option<WorkerProbe> {
        self.encoder.get_ref().worker_probe()
    }
}

// ── Decode ─────────────────────────────────────────────────────────────────

/// A decompressor reading from a counted source.
pub trait SourceDecoder: Read + Send {
    /// Encoded bytes consumed from the source so far.
    fn compressed_bytes(&self) -> u64;
}

pub struct DecodeStream<D: SourceDecoder> {
    decoder: DigestReader<D>,
    meta: FinalMetadata,
}

impl<D: SourceDecoder> DecodeStream<D> {
    pub(crate) fn new(decoder: D, metadata: Metadata) -> Self {
        Self {
            decoder: DigestReader::new(decoder),
            meta: FinalMetadata::new(metadata),
        }
    }
}

impl<D: SourceDecoder> Read for DecodeStream<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // DigestReader refuses reads once closed.
        self.decoder.read(buf)
    }
}

impl<D: SourceDecoder> DecodeReader for DecodeStream<D> {
    fn close(&mut self) -> Result<()> {
        if self.meta.is_final() {
            return Err(already_closed());
        }
        self.decoder.close();
        let digest = self.decoder.digest()?;
        let stats = CompressionStats {
            uncompressed_size: digest.bytes,
            compressed_size: self.decoder.get_ref().compressed_bytes(),
            sha1: digest.sha1,
        };
        self.meta.finalize(&stats)
    }

    fn metadata(&self) -> Result<&Metadata> {
        self.meta.get()
    }
}
