//! LZMA streams in the `.lzma` ("LZMA alone") container.
//!
//! The container is a 13-byte header followed by raw LZMA1 data terminated by
//! an end-of-payload marker:
//!
//! ```text
//! [props: u8 = (pb*5+lp)*9+lc][dict_size: u32 LE][uncompressed size: u64 LE = u64::MAX]
//! ```
//!
//! liblzma only encodes this format as a push stream, so the pull orientation
//! runs it on a [`PullEncoder`] worker. The header comes out of the encoder's
//! first, input-less step, which happens on the constructing thread.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use xz2::read::XzDecoder;
use xz2::stream::{Action, LzmaOptions, MatchFinder, Mode, Stream};
use xz2::write::XzEncoder;
use xform_core::{
    BlockingEncoder, CountingReader, CountingWriter, Metadata, PullEncoder, Result, StreamDigest,
    TransformError, TransformIdentifier, WorkerProbe,
};

use crate::config::Algorithm;
use crate::stream::{
    DecodeStream, EncodeReader, EncodeWriter, PullStream, PushStream, SinkEncoder,
    SourceDecoder, SourceEncoder,
};
use crate::{StreamCodec, CLASS};

const KIB: u32 = 1024;
const MIB: u32 = 1024 * KIB;

pub const MIN_DICTIONARY_SIZE: u32 = 4 * KIB;
pub const MAX_DICTIONARY_SIZE: u32 = 1536 * MIB;
pub const MIN_MATCH_LENGTH: u32 = 2;
pub const MAX_MATCH_LENGTH: u32 = 273;

pub const LITERAL_CONTEXT_BITS: u32 = 3;
pub const LITERAL_POSITION_BITS: u32 = 0;
pub const POSITION_BITS: u32 = 2;

/// Both match finders hash 4 bytes; liblzma needs at least that much lookahead.
const HASH_BYTES: u32 = 4;

/// Match finder of the LZMA encoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchFinderKind {
    /// Hash chain over 4-byte hashes. Faster, weaker matches.
    Hc4,
    /// Binary tree over 4-byte hashes.
    Bt4,
}

impl MatchFinderKind {
    pub const fn name(self) -> &'static str {
        match self {
            MatchFinderKind::Hc4 => "HC4",
            MatchFinderKind::Bt4 => "BT4",
        }
    }

    fn finder(self) -> MatchFinder {
        match self {
            MatchFinderKind::Hc4 => MatchFinder::HashChain4,
            MatchFinderKind::Bt4 => MatchFinder::BinaryTree4,
        }
    }

    fn mode(self) -> Mode {
        match self {
            MatchFinderKind::Hc4 => Mode::Fast,
            MatchFinderKind::Bt4 => Mode::Normal,
        }
    }
}

/// Encoder tuning. `lc`, `lp` and `pb` are fixed at 3, 0 and 2.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LzmaProfile {
    /// Set when the profile came from the level table.
    #[serde(default)]
    pub level: Option<u32>,
    pub dictionary_size: u32,
    pub match_length: u32,
    pub match_finder: MatchFinderKind,
}

const LEVELS: [(u32, u32, MatchFinderKind); 10] = [
    (16 * KIB, 32, MatchFinderKind::Hc4),
    (64 * KIB, 32, MatchFinderKind::Hc4),
    (512 * KIB, 64, MatchFinderKind::Hc4),
    (MIB, 64, MatchFinderKind::Bt4),
    (8 * MIB, 64, MatchFinderKind::Bt4),
    (16 * MIB, 128, MatchFinderKind::Bt4),
    (24 * MIB, 128, MatchFinderKind::Bt4),
    (32 * MIB, 192, MatchFinderKind::Bt4),
    (48 * MIB, 273, MatchFinderKind::Bt4),
    (64 * MIB, 273, MatchFinderKind::Bt4),
];

impl LzmaProfile {
    pub const MAX_LEVEL: u32 = 9;

    pub fn for_level(level: u32) -> Result<Self> {
        let &(dictionary_size, match_length, match_finder) = LEVELS
            .get(level as usize)
            .ok_or_else(|| {
                TransformError::invalid(format!("lzma level {level} is outside the supported range 0-9"))
            })?;
        Ok(Self {
            level: Some(level),
            dictionary_size,
            match_length,
            match_finder,
        })
    }

    pub fn custom(
        dictionary_size: u32,
        match_length: u32,
        match_finder: MatchFinderKind,
    ) -> Result<Self> {
        let profile = Self {
            level: None,
            dictionary_size,
            match_length,
            match_finder,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Checks bounds; profiles deserialized from config skip the constructors.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DICTIONARY_SIZE..=MAX_DICTIONARY_SIZE).contains(&self.dictionary_size) {
            return Err(TransformError::invalid(format!(
                "lzma dictionary size {} is outside {MIN_DICTIONARY_SIZE}..={MAX_DICTIONARY_SIZE}",
                self.dictionary_size
            )));
        }
        if !(MIN_MATCH_LENGTH..=MAX_MATCH_LENGTH).contains(&self.match_length) {
            return Err(TransformError::invalid(format!(
                "lzma match length {} is outside {MIN_MATCH_LENGTH}..={MAX_MATCH_LENGTH}",
                self.match_length
            )));
        }
        if let Some(level) = self.level {
            if Self::for_level(level)? != *self {
                return Err(TransformError::invalid(format!(
                    "lzma profile claims level {level} but does not match its settings"
                )));
            }
        }
        Ok(())
    }

    /// Approximate encoder memory in bytes.
    pub fn memory_estimate(&self) -> u64 {
        memory_estimate(self)
    }

    /// Identifier parameter: the level, or `custom`.
    pub fn label(&self) -> String {
        match self.level {
            Some(level) => level.to_string(),
            None => "custom".to_string(),
        }
    }

    fn options(&self) -> Result<LzmaOptions> {
        let mut opts = LzmaOptions::new_preset(6)
            .map_err(|err| TransformError::invalid(format!("lzma options rejected: {err}")))?;
        opts.dict_size(self.dictionary_size)
            .literal_context_bits(LITERAL_CONTEXT_BITS)
            .literal_position_bits(LITERAL_POSITION_BITS)
            .position_bits(POSITION_BITS)
            .nice_len(self.match_length.max(HASH_BYTES))
            .match_finder(self.match_finder.finder())
            .mode(self.match_finder.mode());
        Ok(opts)
    }

    fn encoder_stream(&self) -> Result<Stream> {
        Stream::new_lzma_encoder(&self.options()?)
            .map_err(|err| TransformError::invalid(format!("lzma encoder setup failed: {err}")))
    }

    /// The `.lzma` properties byte.
    pub fn properties_byte(&self) -> u8 {
        ((POSITION_BITS * 5 + LITERAL_POSITION_BITS) * 9 + LITERAL_CONTEXT_BITS) as u8
    }
}

/// Approximate encoder memory for `profile`: 11.5 bytes per dictionary byte.
pub fn memory_estimate(profile: &LzmaProfile) -> u64 {
    u64::from(profile.dictionary_size) * 23 / 2
}

fn decoder_stream() -> Result<Stream> {
    Stream::new_lzma_decoder(u64::MAX)
        .map_err(|err| TransformError::invalid(format!("lzma decoder setup failed: {err}")))
}

pub type LzmaEncodeWriter<W> = PushStream<XzEncoder<CountingWriter<W>>>;
pub type LzmaEncodeReader = PullStream<LzmaPullSource>;
pub type LzmaDecodeReader<R> = DecodeStream<XzDecoder<CountingReader<R>>>;

#[derive(Clone, Debug)]
pub struct LzmaCodec {
    profile: LzmaProfile,
    pipe_depth: usize,
}

impl LzmaCodec {
    pub fn new(profile: LzmaProfile, pipe_depth: usize) -> Result<Self> {
        profile.validate()?;
        Ok(Self {
            profile,
            pipe_depth: pipe_depth.max(1),
        })
    }

    pub fn with_level(level: u32) -> Result<Self> {
        Self::new(LzmaProfile::for_level(level)?, xform_core::pipe::DEFAULT_PIPE_DEPTH)
    }

    pub fn profile(&self) -> &LzmaProfile {
        &self.profile
    }

    pub fn writer<W: Write + Send>(&self, sink: W, metadata: Metadata) -> Result<LzmaEncodeWriter<W>> {
        let stream = self.profile.encoder_stream()?;
        Ok(PushStream::new(
            XzEncoder::new_stream(CountingWriter::new(sink), stream),
            metadata,
        ))
    }

    /// Pull-mode encoder; starts one worker thread.
    pub fn reader<R: Read + Send + 'static>(&self, source: R, metadata: Metadata) -> Result<LzmaEncodeReader> {
        let worker = LzmaWorker {
            stream: self.profile.encoder_stream()?,
        };
        let encoder = PullEncoder::spawn(source, worker, self.pipe_depth)?;
        Ok(PullStream::new(
            LzmaPullSource {
                encoder,
                digest: None,
            },
            metadata,
        ))
    }

    pub fn decoder<R: Read + Send>(source: R, metadata: Metadata) -> Result<LzmaDecodeReader<R>> {
        Ok(DecodeStream::new(
            XzDecoder::new_stream(CountingReader::new(source), decoder_stream()?),
            metadata,
        ))
    }
}

impl StreamCodec for LzmaCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Lzma
    }

    fn identifier(&self) -> Result<TransformIdentifier> {
        TransformIdentifier::new(CLASS, &[Algorithm::Lzma.token(), &self.profile.label()])
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

/// Runs one liblzma `.lzma` encoder across the two threads of a pull stream.
struct LzmaWorker {
    stream: Stream,
}

impl BlockingEncoder for LzmaWorker {
    fn write_header(&mut self, out: &mut dyn Write) -> io::Result<()> {
        let mut buf = [0u8; 64];
        let before = self.stream.total_out();
        self.stream
            .process(&[], &mut buf, Action::Run)
            .map_err(io::Error::other)?;
        let produced = (self.stream.total_out() - before) as usize;
        out.write_all(&buf[..produced])
    }

    fn encode(self, input: &mut dyn Read, out: &mut dyn Write) -> io::Result<()> {
        let mut encoder = XzEncoder::new_stream(out, self.stream);
        io::copy(input, &mut encoder)?;
        encoder.try_finish()
    }
}

/// Consumer side of an LZMA pull stream.
pub struct LzmaPullSource {
    encoder: PullEncoder,
    digest: Option<StreamDigest>,
}

impl Read for LzmaPullSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.encoder.read(buf)
    }
}

impl SourceEncoder for LzmaPullSource {
    fn close_source(&mut self) -> io::Result<()> {
        self.digest = Some(self.encoder.close()?);
        Ok(())
    }

    fn source_digest(&self) -> Result<StreamDigest> {
        self.digest
            .ok_or(TransformError::IllegalState("digest not finalized"))
    }

    fn worker_probe(&self) -> Option<WorkerProbe> {
        Some(self.encoder.worker_probe())
    }
}

// ── Stream stack plumbing ──────────────────────────────────────────────────

impl<W: Write + Send> SinkEncoder for XzEncoder<CountingWriter<W>> {
    fn finish_stream(&mut self) -> io::Result<()> {
        self.try_finish()
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        self.get_mut().flush()
    }

    fn compressed_bytes(&self) -> u64 {
        self.get_ref().byte_count()
    }

    // The .lzma encoder has no sync-flush; only the sink below it is flushed.
    fn flush_encoder(&mut self) -> io::Result<()> {
        self.get_mut().flush()
    }
}

impl<R: Read + Send> SourceDecoder for XzDecoder<CountingReader<R>> {
    fn compressed_bytes(&self) -> u64 {
        self.get_ref().byte_count()
    }
}
