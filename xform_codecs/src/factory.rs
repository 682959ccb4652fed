use std::io::{Read, Write};

use tracing::{debug, trace};
use xform_core::{
    Binding, InputTransform, Metadata, OutputTransform, Result, TransformError,
    TransformFactory, TransformIdentifier, WorkerProbe,
};

use crate::config::{Algorithm, CompressionConfig};
use crate::stream::{DecodeReader, EncodeReader, EncodeWriter};
use crate::{codec_for, decoder_for, CLASS, DEFAULT_PRIORITY};

/// Factory of the `COMP` transform class.
///
/// Encodes with the algorithm and level of its [`CompressionConfig`];
/// decodes any algorithm it knows, whatever level the object was written at.
#[derive(Debug, Clone)]
pub struct CompressionTransformFactory {
    config: CompressionConfig,
    priority: i32,
}

impl Default for CompressionTransformFactory {
    fn default() -> Self {
        Self {
            config: CompressionConfig::default(),
            priority: DEFAULT_PRIORITY,
        }
    }
}

impl CompressionTransformFactory {
    /// Fails if the config names an invalid level or profile.
    pub fn new(config: CompressionConfig) -> Result<Self> {
        codec_for(&config)?;
        Ok(Self {
            config,
            priority: DEFAULT_PRIORITY,
        })
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    fn algorithm_of(config: Option<&str>) -> Option<Algorithm> {
        Algorithm::from_token(config?.split('/').next()?)
    }
}

impl TransformFactory for CompressionTransformFactory {
    fn transform_class(&self) -> &str {
        CLASS
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    fn encode_into<'a>(
        &self,
        sink: Box<dyn Write + Send + 'a>,
        metadata: Metadata,
    ) -> Result<Box<dyn OutputTransform + 'a>> {
        let codec = codec_for(&self.config)?;
        let identifier = codec.identifier()?;
        let stream = codec.encode_writer(sink, metadata)?;
        Ok(Box::new(CompressionOutputTransform {
            identifier,
            stream: Encoding::Push(stream),
        }))
    }

    fn encode_from(
        &self,
        source: Box<dyn Read + Send>,
        metadata: Metadata,
    ) -> Result<Box<dyn OutputTransform>> {
        let codec = codec_for(&self.config)?;
        let identifier = codec.identifier()?;
        let stream = codec.encode_reader(source, metadata)?;
        Ok(Box::new(CompressionOutputTransform {
            identifier,
            stream: Encoding::Pull(stream),
        }))
    }

    fn decode_from<'a>(
        &self,
        identifier: &TransformIdentifier,
        source: Box<dyn Read + Send + 'a>,
        metadata: Metadata,
    ) -> Result<Box<dyn InputTransform + 'a>> {
        if identifier.class() != CLASS {
            return Err(TransformError::invalid(format!(
                "{identifier} is not a compression identifier"
            )));
        }
        let algorithm = Algorithm::from_token(identifier.algorithm()).ok_or_else(|| {
            TransformError::invalid(format!("{identifier} names an unknown compression algorithm"))
        })?;
        debug!(%identifier, %algorithm, "opening decoder");
        let stream = decoder_for(algorithm, source, metadata.clone())?;
        Ok(Box::new(CompressionInputTransform { stored: metadata, stream }))
    }

    fn can_decode(&self, class: &str, config: Option<&str>, _metadata: &Metadata) -> bool {
        let accepted = class == CLASS && Self::algorithm_of(config).is_some();
        trace!(class, ?config, accepted, "compression can_decode");
        accepted
    }
}

enum Encoding<'a> {
    Push(Box<dyn EncodeWriter + 'a>),
    Pull(Box<dyn EncodeReader>),
}

/// A compression stream in one orientation, plus its stored identifier.
pub struct CompressionOutputTransform<'a> {
    identifier: TransformIdentifier,
    stream: Encoding<'a>,
}

impl OutputTransform for CompressionOutputTransform<'_> {
    fn identifier(&self) -> &TransformIdentifier {
        &self.identifier
    }

    fn binding(&self) -> Binding {
        match self.stream {
            Encoding::Push(_) => Binding::Push,
            Encoding::Pull(_) => Binding::Pull,
        }
    }

    fn encoded_sink(&mut self) -> Result<&mut dyn Write> {
        match &mut self.stream {
            Encoding::Push(writer) => Ok(writer),
            Encoding::Pull(_) => Err(TransformError::IllegalState(
                "pull-mode transform has no encoded sink",
            )),
        }
    }

    fn encoded_source(&mut self) -> Result<&mut dyn Read> {
        match &mut self.stream {
            Encoding::Pull(reader) => Ok(reader),
            Encoding::Push(_) => Err(TransformError::IllegalState(
                "push-mode transform has no encoded source",
            )),
        }
    }

    fn close(&mut self) -> Result<()> {
        match &mut self.stream {
            Encoding::Push(writer) => writer.close(),
            Encoding::Pull(reader) => reader.close(),
        }
    }

    fn metadata(&self) -> Result<&Metadata> {
        match &self.stream {
            Encoding::Push(writer) => writer.metadata(),
            Encoding::Pull(reader) => reader.metadata(),
        }
    }

    fn worker_probe(&self) -> Option<WorkerProbe> {
        match &self.stream {
            Encoding::Push(_) => None,
            Encoding::Pull(reader) => reader.worker_probe(),
        }
    }
}

/// Decoding side of a compression transform.
///
/// Stored metadata passes through unchanged; compression has no private keys.
pub struct CompressionInputTransform<'a> {
    stored: Metadata,
    stream: Box<dyn DecodeReader + 'a>,
}

impl InputTransform for CompressionInputTransform<'_> {
    fn metadata(&self) -> &Metadata {
        &self.stored
    }

    fn decoded_source(&mut self) -> Result<&mut dyn Read> {
        Ok(&mut self.stream)
    }

    fn close(&mut self) -> Result<()> {
        self.stream.close()
    }

    fn observed_metadata(&self) -> Result<&Metadata> {
        self.stream.metadata()
    }
}
