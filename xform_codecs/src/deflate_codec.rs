use std::io::{self, BufRead, BufReader, Read, Write};

use flate2::read::ZlibEncoder as ZlibReadEncoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use xform_core::{
    CountingWriter, DigestReader, Metadata, Result, StreamDigest, TransformError,
    TransformIdentifier,
};

use crate::config::Algorithm;
use crate::stream::{
    DecodeStream, EncodeReader, EncodeWriter, PullStream, PushStream, SinkEncoder,
    SourceDecoder, SourceEncoder,
};
use crate::{StreamCodec, CLASS};

/// Deflate compression level, `0..=9`.
///
/// Level 0 selects zlib's fastest setting rather than stored blocks, so
/// every level actually compresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeflateLevel(u32);

impl DeflateLevel {
    pub fn new(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(TransformError::invalid(format!(
                "deflate level {level} is outside the supported range 0-9"
            )));
        }
        Ok(Self(level))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    fn compression(self) -> Compression {
        Compression::new(self.0.max(1))
    }
}

pub type DeflateEncodeWriter<W> = PushStream<ZlibEncoder<CountingWriter<W>>>;
pub type DeflateEncodeReader<R> = PullStream<ZlibReadEncoder<DigestReader<R>>>;
pub type DeflateDecodeReader<R> = DecodeStream<ZlibStreamDecoder<R>>;

/// zlib-framed deflate streams via `flate2`.
///
/// Both orientations are native: flate2 offers the compressor as a write
/// filter and as a read filter, so no worker thread is involved.
#[derive(Clone, Copy, Debug)]
pub struct DeflateCodec {
    level: DeflateLevel,
}

impl DeflateCodec {
    pub fn new(level: u32) -> Result<Self> {
        Ok(Self {
            level: DeflateLevel::new(level)?,
        })
    }

    pub fn level(&self) -> u32 {
        self.level.get()
    }

    pub fn writer<W: Write + Send>(&self, sink: W, metadata: Metadata) -> DeflateEncodeWriter<W> {
        PushStream::new(
            ZlibEncoder::new(CountingWriter::new(sink), self.level.compression()),
            metadata,
        )
    }

    pub fn reader<R: Read + Send>(&self, source: R, metadata: Metadata) -> DeflateEncodeReader<R> {
        PullStream::new(
            ZlibReadEncoder::new(DigestReader::new(source), self.level.compression()),
            metadata,
        )
    }

    pub fn decoder<R: Read + Send>(source: R, metadata: Metadata) -> DeflateDecodeReader<R> {
        DecodeStream::new(ZlibStreamDecoder::new(source), metadata)
    }
}

impl StreamCodec for DeflateCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Deflate
    }

    fn identifier(&self) -> Result<TransformIdentifier> {
        let level = self.level().to_string();
        TransformIdentifier::new(CLASS, &[Algorithm::Deflate.token(), &level])
    }

    fn encode_writer<'a>(
        &self,
        sink: Box<dyn Write + Send + 'a>,
        metadata: Metadata,
    ) -> Result<Box<dyn EncodeWriter + 'a>> {
        Ok(Box::new(self.writer(sink, metadata)))
    }

    fn encode_reader(
        &self,
        source: Box<dyn Read + Send>,
        metadata: Metadata,
    ) -> Result<Box<dyn EncodeReader>> {
        Ok(Box::new(self.reader(source, metadata)))
    }
}

// ── Stream stack plumbing ──────────────────────────────────────────────────

impl<W: Write + Send> SinkEncoder for ZlibEncoder<CountingWriter<W>> {
    fn finish_stream(&mut self) -> io::Result<()> {
        self.try_finish()
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        self.get_mut().flush()
    }

    fn compressed_bytes(&self) -> u64 {
        self.get_ref().byte_count()
    }
}

impl<R: Read + Send> SourceEncoder for ZlibReadEncoder<DigestReader<R>> {
    fn close_source(&mut self) -> io::Result<()> {
        self.get_mut().close();
        Ok(())
    }

    fn source_digest(&self) -> Result<StreamDigest> {
        self.get_ref().digest()
    }
}

/// zlib decoder that treats end of input before the stream trailer as an
/// error instead of a clean EOF.
pub struct ZlibStreamDecoder<R> {
    source: BufReader<R>,
    state: Decompress,
    done: bool,
}

impl<R: Read> ZlibStreamDecoder<R> {
    fn new(source: R) -> Self {
        Self {
            source: BufReader::new(source),
            state: Decompress::new(true),
            done: false,
        }
    }
}

impl<R: Read> Read for ZlibStreamDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        loop {
            let input = self.source.fill_buf()?;
            let eof = input.is_empty();
            let flush = if eof { FlushDecompress::Finish } else { FlushDecompress::None };
            let (in_before, out_before) = (self.state.total_in(), self.state.total_out());
            let status = self
                .state
                .decompress(input, buf, flush)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            let consumed = (self.state.total_in() - in_before) as usize;
            let produced = (self.state.total_out() - out_before) as usize;
            self.source.consume(consumed);

            if status == Status::StreamEnd {
                self.done = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if eof {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "deflate stream ended before its trailer",
                ));
            }
        }
    }
}

impl<R: Read + Send> SourceDecoder for ZlibStreamDecoder<R> {
    fn compressed_bytes(&self) -> u64 {
        self.state.total_in()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_outside_zero_to_nine_are_rejected() {
        for level in 0..=9 {
            assert_eq!(DeflateCodec::new(level).unwrap().level(), level);
        }
        let err = DeflateCodec::new(10).unwrap_err();
        assert!(matches!(err, TransformError::InvalidArgument(_)));
    }

    #[test]
    fn level_zero_still_compresses() {
        assert_eq!(DeflateLevel::new(0).unwrap().compression().level(), 1);
        assert_eq!(DeflateLevel::new(9).unwrap().compression().level(), 9);
    }

    #[test]
    fn identifier_carries_level() {
        assert_eq!(DeflateCodec::new(4).unwrap().identifier().unwrap().to_string(), "COMP:DEFLATE/4");
    }

    #[test]
    fn push_output_is_plain_zlib() {
        let mut sink = Vec::new();
        let mut writer = DeflateCodec::new(6).unwrap().writer(&mut sink, Metadata::new());
        writer.write_all(b"zlib framed payload, zlib framed payload").unwrap();
        writer.close().unwrap();
        let compressed_size = writer.metadata().unwrap()["compressed-size"].clone();
        drop(writer);

        assert_eq!(compressed_size, sink.len().to_string());
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(&sink[..]).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"zlib framed payload, zlib framed payload");
    }

    #[test]
    fn truncated_stream_is_an_error_not_eof() {
        let payload = b"cut short, cut short, cut short, cut short".repeat(64);
        let mut sink = Vec::new();
        let mut writer = DeflateCodec::new(6).unwrap().writer(&mut sink, Metadata::new());
        writer.write_all(&payload).unwrap();
        writer.close().unwrap();
        drop(writer);

        let mut whole = Vec::new();
        ZlibStreamDecoder::new(&sink[..]).read_to_end(&mut whole).unwrap();
        assert_eq!(whole, payload);

        let mut decoder = ZlibStreamDecoder::new(&sink[..sink.len() - 3]);
        assert!(decoder.read_to_end(&mut Vec::new()).is_err());
    }
}
