//! Durability presets
//!
//! Each preset maps to a pair of SQLite pragmas applied when the database is
//! opened.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::ConfigError;

/// Commit durability preset
///
/// Names are matched case-insensitively when loaded from YAML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Durability {
    /// Tests and throwaway stores
    ///
    /// - journal_mode=MEMORY, synchronous=OFF
    /// - A crash may corrupt the database
    Fast,

    /// Default
    ///
    /// - journal_mode=WAL, synchronous=NORMAL
    /// - A crash may lose the last commits, never consistency
    #[default]
    Balanced,

    /// Every commit reaches the disk before returning
    ///
    /// - journal_mode=WAL, synchronous=FULL
    Durable,
}

impl Durability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Durable => "durable",
        }
    }

    /// Value for `PRAGMA journal_mode`
    pub fn journal_mode(&self) -> &'static str {
        match self {
            Self::Fast => "MEMORY",
            Self::Balanced | Self::Durable => "WAL",
        }
    }

    /// Value for `PRAGMA synchronous`
    pub fn synchronous(&self) -> &'static str {
        match self {
            Self::Fast => "OFF",
            Self::Balanced => "NORMAL",
            Self::Durable => "FULL",
        }
    }
}

impl FromStr for Durability {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "durable" => Ok(Self::Durable),
            _ => Err(ConfigError::UnknownDurability(s.to_string())),
        }
    }
}

impl TryFrom<String> for Durability {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
