//! YAML schema types
//!
//! Loading and export live in `mod.rs`; this file only defines the on-disk
//! shape.

use super::{DatabaseConfig, IndexConfig, PlacementConfig, QueryConfig};
use serde::{Deserialize, Serialize};

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileV1 {
    /// Schema version (always 1 for v1); optional here so its absence can be
    /// reported as `MissingVersion`
    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub placement: PlacementConfig,

    #[serde(default)]
    pub query: QueryConfig,
}
