use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xform_core::pipe::DEFAULT_PIPE_DEPTH;
use xform_core::TransformError;

use crate::lzma_codec::LzmaProfile;

/// Compression algorithms the `COMP` factory understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Lzma,
    Deflate,
    Zstd,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Lzma, Algorithm::Deflate, Algorithm::Zstd];

    /// Token used in transform identifiers.
    pub const fn token(self) -> &'static str {
        match self {
            Algorithm::Lzma => "LZMA",
            Algorithm::Deflate => "DEFLATE",
            Algorithm::Zstd => "ZSTD",
        }
    }

    /// Matches an identifier token, ignoring ASCII case.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.token().eq_ignore_ascii_case(token.trim()))
    }

    pub const fn default_level(self) -> u32 {
        match self {
            Algorithm::Lzma => 5,
            Algorithm::Deflate => 6,
            Algorithm::Zstd => 3,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Algorithm {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s)
            .ok_or_else(|| TransformError::invalid(format!("unknown compression algorithm {s:?}")))
    }
}

/// Settings of the `COMP` factory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub algorithm: Algorithm,
    pub level: u32,
    /// Overrides `level` for LZMA when set.
    pub lzma_profile: Option<LzmaProfile>,
    /// Chunks buffered between the LZMA pull worker and its reader.
    pub pipe_depth: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Lzma,
            level: Algorithm::Lzma.default_level(),
            lzma_profile: None,
            pipe_depth: DEFAULT_PIPE_DEPTH,
        }
    }
}

impl CompressionConfig {
    pub fn new(algorithm: Algorithm, level: u32) -> Self {
        Self {
            algorithm,
            level,
            ..Self::default()
        }
    }

    pub fn with_lzma_profile(mut self, profile: LzmaProfile) -> Self {
        self.algorithm = Algorithm::Lzma;
        self.lzma_profile = Some(profile);
        self
    }

    pub fn with_pipe_depth(mut self, depth: usize) -> Self {
        self.pipe_depth = depth.max(1);
        self
    }
}
