// In: src/config.rs

//! The single source of truth for all engine configuration.
//!
//! `EngineConfig` is created once at the application boundary (e.g., from a JSON
//! document or built in code) and then shared read-only through an `Arc` by the
//! engine, its scheduler and its block store.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::tambakError;

/// The unified configuration for a local engine instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Number of partitions used when a source does not ask for a specific count,
    /// and the size of the worker pool that executes partition tasks.
    #[serde(default = "default_parallelism")]
    pub default_parallelism: usize,

    /// Number of output partitions produced by hash shuffles (`distinct`,
    /// `intersect`, `subtract`).
    #[serde(default = "default_shuffle_partitions")]
    pub shuffle_partitions: usize,

    /// How many times a partition task is attempted before its stage fails.
    /// Closures may therefore run more than once per element.
    #[serde(default = "default_task_max_attempts")]
    pub task_max_attempts: u32,

    /// Budget for blocks retained in memory by persisted collections.
    #[serde(default = "default_storage_memory_bytes")]
    pub storage_memory_bytes: usize,

    /// Directory for disk-backed blocks. A per-engine directory under the system
    /// temp dir is used when unset.
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,

    /// Zstd level applied to serialized blocks.
    #[serde(default = "default_serialized_compression_level")]
    pub serialized_compression_level: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_parallelism: default_parallelism(),
            shuffle_partitions: default_shuffle_partitions(),
            task_max_attempts: default_task_max_attempts(),
            storage_memory_bytes: default_storage_memory_bytes(),
            spill_dir: None,
            serialized_compression_level: default_serialized_compression_level(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON. Missing fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, tambakError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), tambakError> {
        if self.default_parallelism == 0 {
            return Err(tambakError::ConfigError(
                "default_parallelism must be at least 1".to_string(),
            ));
        }
        if self.shuffle_partitions == 0 {
            return Err(tambakError::ConfigError(
                "shuffle_partitions must be at least 1".to_string(),
            ));
        }
        if self.task_max_attempts == 0 {
            return Err(tambakError::ConfigError(
                "task_max_attempts must be at least 1".to_string(),
            ));
        }
        if !(1..=22).contains(&self.serialized_compression_level) {
            return Err(tambakError::ConfigError(format!(
                "serialized_compression_level must be within 1..=22, got {}",
                self.serialized_compression_level
            )));
        }
        Ok(())
    }
}

/// Provides a default for `default_parallelism`: the number of available cores.
fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_shuffle_partitions() -> usize {
    8
}

/// Local mode: a failing task fails its stage on the first attempt.
fn default_task_max_attempts() -> u32 {
    1
}

/// Provides a default for `storage_memory_bytes` (256MB).
fn default_storage_memory_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_serialized_compression_level() -> i32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "shuffle_partitions": 3 }"#).unwrap();

        assert_eq!(config.shuffle_partitions, 3);
        assert_eq!(config.task_max_attempts, 1);
        assert_eq!(config.serialized_compression_level, 3);
        assert!(config.spill_dir.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let config = EngineConfig {
            default_parallelism: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(tambakError::ConfigError(_))
        ));

        let result = EngineConfig::from_json_str(r#"{ "task_max_attempts": 0 }"#);
        assert!(matches!(result, Err(tambakError::ConfigError(_))));
    }

    #[test]
    fn test_from_json_rejects_malformed_input() {
        let result = EngineConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(tambakError::SerdeJson(_))));
    }
}
