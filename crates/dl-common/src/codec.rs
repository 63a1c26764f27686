//! Run-wide compression codec selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compression codec class for every table file written in a run.
///
/// The names accepted by the original converter (`snappy`, `lz4`, `gzip`,
/// `brotli`) are kept as aliases of the class they belong to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    /// Uncompressed passthrough.
    None,
    /// Fast, low ratio.
    #[serde(alias = "snappy", alias = "lz4")]
    #[value(alias = "snappy", alias = "lz4")]
    Fast,
    /// High ratio, slow.
    #[serde(alias = "gzip", alias = "brotli")]
    #[value(alias = "gzip", alias = "brotli")]
    HighRatio,
    /// Balanced general purpose.
    #[default]
    #[serde(alias = "zstd")]
    #[value(alias = "zstd")]
    Balanced,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Fast => "fast",
            Compression::HighRatio => "high-ratio",
            Compression::Balanced => "balanced",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(Compression::None),
            "fast" | "snappy" | "lz4" => Ok(Compression::Fast),
            "high-ratio" | "gzip" | "brotli" => Ok(Compression::HighRatio),
            "balanced" | "zstd" => Ok(Compression::Balanced),
            other => Err(format!("unknown compression codec: {other}")),
        }
    }
}
