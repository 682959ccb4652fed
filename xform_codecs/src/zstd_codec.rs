use std::io::{self, BufReader, Read, Write};

use xform_core::{
    CountingReader, CountingWriter, DigestReader, Metadata, Result, StreamDigest, TransformError,
    TransformIdentifier,
};
use zstd::stream::read::{Decoder, Encoder as ReadEncoder};
use zstd::stream::write::Encoder;

use crate::config::Algorithm;
use crate::stream::{
    DecodeStream, EncodeReader, EncodeWriter, PullStream, PushStream, SinkEncoder,
    SourceDecoder, SourceEncoder,
};
use crate::{StreamCodec, CLASS};

pub type ZstdEncodeWriter<W> = PushStream<Encoder<'static, CountingWriter<W>>>;
pub type ZstdEncodeReader<R> = PullStream<ReadEncoder<'static, BufReader<DigestReader<R>>>>;
pub type ZstdDecodeReader<R> = DecodeStream<Decoder<'static, BufReader<CountingReader<R>>>>;

/// Zstandard frames via `zstd`.
///
/// Best for: fast encode and decode at ratios near deflate's upper levels.
#[derive(Clone, Copy, Debug)]
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self {
            level: Algorithm::Zstd.default_level() as i32,
        }
    }
}

impl ZstdCodec {
    pub const LEVELS: std::ops::RangeInclusive<u32> = 1..=22;

    pub fn new(level: u32) -> Result<Self> {
        if !Self::LEVELS.contains(&level) {
            return Err(TransformError::invalid(format!(
                "zstd level {level} is outside the supported range 1-22"
            )));
        }
        Ok(Self { level: level as i32 })
    }

    pub fn level(&self) -> u32 {
        self.level as u32
    }

    pub fn writer<W: Write + Send>(&self, sink: W, metadata: Metadata) -> Result<ZstdEncodeWriter<W>> {
        let encoder = Encoder::new(CountingWriter::new(sink), self.level)?;
        Ok(PushStream::new(encoder, metadata))
    }

    pub fn reader<R: Read + Send>(&self, source: R, metadata: Metadata) -> Result<ZstdEncodeReader<R>> {
        let encoder = ReadEncoder::with_buffer(BufReader::new(DigestReader::new(source)), self.level)?;
        Ok(PullStream::new(encoder, metadata))
    }

    pub fn decoder<R: Read + Send>(source: R, metadata: Metadata) -> Result<ZstdDecodeReader<R>> {
        let decoder = Decoder::new(CountingReader::new(source))?;
        Ok(DecodeStream::new(decoder, metadata))
    }
}

impl StreamCodec for ZstdCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Zstd
    }

    fn identifier(&self) -> Result<TransformIdentifier> {
        let level = self.level().to_string();
        TransformIdentifier::new(CLASS, &[Algorithm::Zstd.token(), &level])
    }

    fn encode_writer<'a>(
        &self,
        sink: Box<dyn Write + Send + 'a>,
        metadata: Metadata,
    ) -> Result<Box<dyn EncodeWriter + 'a>> {
        Ok(Box::new(self.writer(sink, metadata)?))
    }

    fn encode_reader(
        &self,
        source: Box<dyn Read + Send>,
        metadata: Metadata,
    ) -> Result<Box<dyn EncodeReader>> {
        Ok(Box::new(self.reader(source, metadata)?))
    }
}

// ── Stream stack plumbing ──────────────────────────────────────────────────

impl<W: Write + Send> SinkEncoder for Encoder<'static, CountingWriter<W>> {
    fn finish_stream(&mut self) -> io::Result<()> {
        self.do_finish()
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        self.get_mut().flush()
    }

    fn compressed_bytes(&self) -> u64 {
        self.get_ref().byte_count()
    }
}

impl<R: Read + Send> SourceEncoder for ReadEncoder<'static, BufReader<DigestReader<R>>> {
    fn close_source(&mut self) -> io::Result<()> {
        self.get_mut().get_mut().close();
        Ok(())
    }

    fn source_digest(&self) -> Result<StreamDigest> {
        self.get_ref().get_ref().digest()
    }
}

impl<R: Read + Send> SourceDecoder for Decoder<'static, BufReader<CountingReader<R>>> {
    fn compressed_bytes(&self) -> u64 {
        self.get_ref().get_ref().byte_count()
    }
}
