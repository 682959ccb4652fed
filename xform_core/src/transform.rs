use std::io::{Read, Write};

use crate::adapter::WorkerProbe;
use crate::error::Result;
use crate::identifier::TransformIdentifier;
use crate::metadata::Metadata;

/// Orientation an output transform was created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Caller writes raw bytes; encoded bytes go to the caller's sink.
    Push,
    /// Caller reads encoded bytes; raw bytes are pulled from the caller's source.
    Pull,
}

/// One-shot encoder bound to a single sink or source.
///
/// Lifecycle: drive the stream returned by [`encoded_sink`](Self::encoded_sink)
/// or [`encoded_source`](Self::encoded_source), then [`close`](Self::close)
/// exactly once, then read [`metadata`](Self::metadata). Asking for the
/// accessor of the other orientation is an `IllegalState` error.
pub trait OutputTransform: Send {
    /// Identifier to store with the object, fixed at construction.
    fn identifier(&self) -> &TransformIdentifier;

    fn binding(&self) -> Binding;

    /// Writer accepting raw bytes. Push mode only.
    fn encoded_sink(&mut self) -> Result<&mut dyn Write>;

    /// Reader yielding encoded bytes. Pull mode only.
    fn encoded_source(&mut self) -> Result<&mut dyn Read>;

    /// Finalizes the encoder and computes the metadata.
    fn close(&mut self) -> Result<()>;

    /// Caller metadata merged with transform metadata. Only after close.
    fn metadata(&self) -> Result<&Metadata>;

    /// Liveness of the background encoder thread, for transforms that run one.
    fn worker_probe(&self) -> Option<WorkerProbe> {
        None
    }
}

/// One-shot decoder over a source of encoded bytes.
pub trait InputTransform: Send {
    /// Object metadata as seen after this transform. Compression passes the
    /// stored map through untouched; other transforms may strip private keys.
    fn metadata(&self) -> &Metadata;

    /// Reader yielding decoded bytes.
    fn decoded_source(&mut self) -> Result<&mut dyn Read>;

    fn close(&mut self) -> Result<()>;

    /// Metadata recomputed from the bytes actually decoded, for verification
    /// against [`metadata`](Self::metadata). Only after close.
    fn observed_metadata(&self) -> Result<&Metadata>;
}

/// Entry point producing transforms of one class (`COMP`, `ENC`, ...).
pub trait TransformFactory: Send + Sync {
    /// Class tag this factory owns.
    fn transform_class(&self) -> &str;

    /// Higher runs closer to the raw payload and wins decode ties.
    fn priority(&self) -> i32;

    fn set_priority(&mut self, priority: i32);

    /// Push-mode encoder writing into `sink`.
    fn encode_into<'a>(
        &self,
        sink: Box<dyn Write + Send + 'a>,
        metadata: Metadata,
    ) -> Result<Box<dyn OutputTransform + 'a>>;

    /// Pull-mode encoder reading from `source`.
    fn encode_from(
        &self,
        source: Box<dyn Read + Send>,
        metadata: Metadata,
    ) -> Result<Box<dyn OutputTransform>>;

    /// Decoder for an object stored under `identifier`.
    fn decode_from<'a>(
        &self,
        identifier: &TransformIdentifier,
        source: Box<dyn Read + Send + 'a>,
        metadata: Metadata,
    ) -> Result<Box<dyn InputTransform + 'a>>;

    /// Whether this factory can decode `class`/`config`. Never fails.
    fn can_decode(&self, class: &str, config: Option<&str>, metadata: &Metadata) -> bool;
}
