use std::collections::BTreeMap;

use crate::error::{Result, TransformError};

/// String metadata stored alongside an object's payload.
pub type Metadata = BTreeMap<String, String>;

// ── Persisted keys ─────────────────────────────────────────────────────────

pub const UNCOMPRESSED_SIZE: &str = "uncompressed-size";
pub const COMPRESSED_SIZE: &str = "compressed-size";
/// `100 - compressed*100/uncompressed`, formatted `"%.1f%%"`.
pub const COMPRESSION_RATIO: &str = "compression-ratio";
/// Lower-case hex SHA-1 of the uncompressed payload.
pub const UNCOMPRESSED_SHA1: &str = "uncompressed-sha1";

/// Renders a digest as lower-case hex, two characters per byte.
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn from_hex(hex: &str) -> Option<[u8; 20]> {
    if hex.len() != 40 || !hex.is_ascii() {
        return None;
    }
    let mut out = [0u8; 20];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// Size and integrity figures recorded for a compressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStats {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub sha1: [u8; 20],
}

impl CompressionStats {
    /// Space saved as a percentage of the uncompressed size.
    ///
    /// An empty payload reports 0.0.
    pub fn ratio_percent(&self) -> f64 {
        if self.uncompressed_size == 0 {
            return 0.0;
        }
        100.0 - (self.compressed_size as f64 * 100.0 / self.uncompressed_size as f64)
    }

    pub fn ratio_string(&self) -> String {
        format!("{:.1}%", self.ratio_percent())
    }

    pub fn sha1_hex(&self) -> String {
        to_hex(&self.sha1)
    }

    /// Caller metadata with the four compression keys layered on top.
    pub fn merge_into(&self, caller: &Metadata) -> Metadata {
        let mut merged = caller.clone();
        merged.insert(UNCOMPRESSED_SIZE.into(), self.uncompressed_size.to_string());
        merged.insert(COMPRESSED_SIZE.into(), self.compressed_size.to_string());
        merged.insert(COMPRESSION_RATIO.into(), self.ratio_string());
        merged.insert(UNCOMPRESSED_SHA1.into(), self.sha1_hex());
        merged
    }

    /// Reads the stats back from stored metadata.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        let field = |key: &str| {
            metadata
                .get(key)
                .ok_or_else(|| TransformError::invalid(format!("metadata is missing {key}")))
        };
        let size = |key: &str| -> Result<u64> {
            field(key)?
                .parse()
                .map_err(|_| TransformError::invalid(format!("metadata {key} is not a byte count")))
        };
        let sha1 = from_hex(field(UNCOMPRESSED_SHA1)?)
            .ok_or_else(|| TransformError::invalid(format!("metadata {UNCOMPRESSED_SHA1} is not a SHA-1 hex digest")))?;
        Ok(Self {
            uncompressed_size: size(UNCOMPRESSED_SIZE)?,
            compressed_size: size(COMPRESSED_SIZE)?,
            sha1,
        })
    }
}

/// Metadata slot for a stream that only becomes readable after close.
#[derive(Debug, Default)]
pub struct FinalMetadata {
    caller: Metadata,
    finalized: Option<Metadata>,
}

impl FinalMetadata {
    pub fn new(caller: Metadata) -> Self {
        Self {
            caller,
            finalized: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.finalized.is_some()
    }

    /// Seals the slot. Fails if it was already sealed.
    pub fn finalize(&mut self, stats: &CompressionStats) -> Result<()> {
        if self.finalized.is_some() {
            return Err(TransformError::IllegalState("stream already closed"));
        }
        self.finalized = Some(stats.merge_into(&self.caller));
        Ok(())
    }

    pub fn get(&self) -> Result<&Metadata> {
        self.finalized
            .as_ref()
            .ok_or(TransformError::IllegalState("metadata is not available until the stream is closed"))
    }
}
