//! Streaming object-transform framework.
//!
//! An object's payload is passed through a reversible transform (compression
//! today, encryption alongside it) while its size and SHA-1 digest are
//! measured on the way through. Transforms come in two orientations: push,
//! where the caller writes into an encoding sink, and pull, where the caller
//! reads encoded bytes out of a source.
//!
//! This crate holds the algorithm-independent pieces: the transform and
//! factory traits, stored identifiers and metadata keys, the counting/digest
//! wrappers, the pipe-backed pull adapter for push-only encoders, and the
//! priority-ordered registry that picks a decoder for a stored object.

pub mod adapter;
pub mod error;
pub mod identifier;
pub mod instrument;
pub mod metadata;
pub mod pipe;
pub mod pipeline;
pub mod registry;
pub mod transform;

pub use adapter::{BlockingEncoder, PullEncoder, WorkerProbe};
pub use error::{Result, TransformError};
pub use identifier::TransformIdentifier;
pub use instrument::{CountingReader, CountingWriter, DigestReader, DigestWriter, StreamDigest};
pub use metadata::{CompressionStats, FinalMetadata, Metadata};
pub use pipeline::{EncodedObject, TransformPipeline};
pub use registry::TransformRegistry;
pub use transform::{Binding, InputTransform, OutputTransform, TransformFactory};
