use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TransformError};

/// Stored key describing which transform encoded an object.
///
/// Rendered as `<CLASS>:<ALGORITHM>/<PARAM>[/<PARAM>...]`, e.g. `COMP:LZMA/5`.
/// The class selects the factory family; everything after the `:` is opaque
/// to the framework and interpreted by the owning factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformIdentifier {
    class: String,
    config: String,
}

impl TransformIdentifier {
    /// Builds an identifier from a class tag and algorithm parameters.
    pub fn new(class: impl Into<String>, params: &[&str]) -> Result<Self> {
        let class = class.into();
        let config = params.join("/");
        validate(&class, &config)?;
        Ok(Self { class, config })
    }

    /// Parses a stored identifier string.
    pub fn parse(raw: &str) -> Result<Self> {
        let (class, config) = raw
            .split_once(':')
            .ok_or_else(|| TransformError::invalid(format!("transform identifier {raw:?} has no class separator")))?;
        validate(class, config)?;
        Ok(Self {
            class: class.to_string(),
            config: config.to_string(),
        })
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Everything after the `:`, e.g. `LZMA/5`.
    pub fn config(&self) -> &str {
        &self.config
    }

    /// The `/`-separated parameters of the config.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.config.split('/')
    }

    /// First parameter; for compression identifiers, the algorithm name.
    pub fn algorithm(&self) -> &str {
        self.params().next().unwrap_or_default()
    }
}

fn validate(class: &str, config: &str) -> Result<()> {
    if class.trim().is_empty() {
        return Err(TransformError::invalid("transform identifier has an empty class"));
    }
    if config.split('/').next().map_or(true, |first| first.trim().is_empty()) {
        return Err(TransformError::invalid(format!(
            "transform identifier for class {class} has no algorithm"
        )));
    }
    Ok(())
}

impl fmt::Display for TransformIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.config)
    }
}

impl FromStr for TransformIdentifier {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
