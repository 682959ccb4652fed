//! Compression transforms for xform.
//!
//! Three algorithms, each available as a push stream (write raw bytes into
//! an encoding sink), a pull stream (read encoded bytes out of a raw source)
//! and a decode stream:
//!
//! | algorithm | crate   | pull encoding                    |
//! |-----------|---------|----------------------------------|
//! | LZMA      | `xz2`   | worker thread over a bounded pipe |
//! | Deflate   | `flate2`| native read filter               |
//! | Zstd      | `zstd`  | native read filter               |
//!
//! [`CompressionTransformFactory`] exposes them to the framework under the
//! `COMP` transform class.

mod config;
mod deflate_codec;
mod factory;
mod lzma_codec;
mod stream;
mod zstd_codec;

pub use config::{Algorithm, CompressionConfig};
pub use deflate_codec::{
    DeflateCodec, DeflateDecodeReader, DeflateEncodeReader, DeflateEncodeWriter, DeflateLevel,
};
pub use factory::{CompressionInputTransform, CompressionOutputTransform, CompressionTransformFactory};
pub use lzma_codec::{
    memory_estimate, LzmaCodec, LzmaDecodeReader, LzmaEncodeReader, LzmaEncodeWriter,
    LzmaProfile, MatchFinderKind,
};
pub use stream::{DecodeReader, EncodeReader, EncodeWriter};
pub use zstd_codec::{ZstdCodec, ZstdDecodeReader, ZstdEncodeReader, ZstdEncodeWriter};

use std::io::{Read, Write};

use tracing::debug;
use xform_core::{Metadata, Result, TransformIdentifier};

/// Transform class of every compression identifier.
pub const CLASS: &str = "COMP";

/// Compression sits closest to the payload: compressing ciphertext is futile.
pub const DEFAULT_PRIORITY: i32 = 100;

/// One configured compression algorithm.
///
/// Implementations are cheap value types; every call builds a fresh,
/// single-use stream.
pub trait StreamCodec: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// Identifier stored with objects this codec encodes.
    fn identifier(&self) -> Result<TransformIdentifier>;

    /// Push-mode encoder writing into `sink`.
    fn encode_writer<'a>(
        &self,
        sink: Box<dyn Write + Send + 'a>,
        metadata: Metadata,
    ) -> Result<Box<dyn EncodeWriter + 'a>>;

    /// Pull-mode encoder reading from `source`.
    fn encode_reader(
        &self,
        source: Box<dyn Read + Send>,
        metadata: Metadata,
    ) -> Result<Box<dyn EncodeReader>>;
}

/// Builds the codec described by `config`, validating its level.
pub fn codec_for(config: &CompressionConfig) -> Result<Box<dyn StreamCodec>> {
    let codec: Box<dyn StreamCodec> = match config.algorithm {
        Algorithm::Lzma => {
            let profile = match &config.lzma_profile {
                Some(profile) => profile.clone(),
                None => LzmaProfile::for_level(config.level)?,
            };
            Box::new(LzmaCodec::new(profile, config.pipe_depth)?)
        }
        Algorithm::Deflate => Box::new(DeflateCodec::new(config.level)?),
        Algorithm::Zstd => Box::new(ZstdCodec::new(config.level)?),
    };
    debug!(algorithm = %config.algorithm, level = config.level, "compression codec selected");
    Ok(codec)
}

/// Decoder for a stream written by `algorithm` at any level.
pub fn decoder_for<'a>(
    algorithm: Algorithm,
    source: Box<dyn Read + Send + 'a>,
    metadata: Metadata,
) -> Result<Box<dyn DecodeReader + 'a>> {
    let stream: Box<dyn DecodeReader + 'a> = match algorithm {
        Algorithm::Lzma => Box::new(LzmaCodec::decoder(source, metadata)?),
        Algorithm::Deflate => Box::new(DeflateCodec::decoder(source, metadata)),
        Algorithm::Zstd => Box::new(ZstdCodec::decoder(source, metadata)?),
    };
    Ok(stream)
}
