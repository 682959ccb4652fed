use std::io::{self, Read, Write};

use tracing::debug;

use crate::error::{Result, TransformError};
use crate::identifier::TransformIdentifier;
use crate::metadata::Metadata;
use crate::registry::TransformRegistry;
use crate::transform::{InputTransform, OutputTransform, TransformFactory};

/// What a caller persists next to an encoded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedObject {
    pub identifier: TransformIdentifier,
    pub metadata: Metadata,
}

/// Encode/decode surface used by storage code.
///
/// Outbound data is encoded by the factory of `encode_class`; inbound data
/// is decoded by whichever registered factory claims its stored identifier.
///
/// Exactly one transform is applied per object. Chaining is left to
/// callers: walk [`TransformRegistry::by_priority`] and nest the transforms
/// so the highest priority sits closest to the raw payload.
pub struct TransformPipeline {
    registry: TransformRegistry,
    encode_class: String,
}

impl TransformPipeline {
    pub fn new(registry: TransformRegistry, encode_class: impl Into<String>) -> Self {
        Self {
            registry,
            encode_class: encode_class.into(),
        }
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    fn encoder(&self) -> Result<&dyn TransformFactory> {
        self.registry
            .get(&self.encode_class)
            .ok_or_else(|| TransformError::NotFound(self.encode_class.clone()))
    }

    /// Encodes all of `payload` into `sink` and returns what to store with it.
    ///
    /// The sink stays the caller's: it is flushed, not closed.
    pub fn encode<'a>(
        &self,
        payload: &mut dyn Read,
        sink: Box<dyn Write + Send + 'a>,
        metadata: Metadata,
    ) -> Result<EncodedObject> {
        let mut transform = self.encoder()?.encode_into(sink, metadata)?;
        let copied = io::copy(payload, transform.encoded_sink()?)?;
        transform.close()?;
        debug!(identifier = %transform.identifier(), copied, "encoded object");
        Ok(EncodedObject {
            identifier: transform.identifier().clone(),
            metadata: transform.metadata()?.clone(),
        })
    }

    /// Pull-mode encoder over `source` for the caller to drive and close.
    pub fn encode_pull(
        &self,
        source: Box<dyn Read + Send>,
        metadata: Metadata,
    ) -> Result<Box<dyn OutputTransform>> {
        self.encoder()?.encode_from(source, metadata)
    }

    /// Decoder for an object stored under `identifier` with `metadata`.
    pub fn decode<'a>(
        &self,
        identifier: &str,
        source: Box<dyn Read + Send + 'a>,
        metadata: Metadata,
    ) -> Result<Box<dyn InputTransform + 'a>> {
        let id = TransformIdentifier::parse(identifier)?;
        let factory = self
            .registry
            .resolve(id.class(), Some(id.config()), &metadata)?;
        debug!(identifier = %id, priority = factory.priority(), "decoding object");
        factory.decode_from(&id, source, metadata)
    }
}
