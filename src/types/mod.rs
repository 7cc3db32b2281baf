//! This module defines the core, strongly-typed value objects shared by the
//! engine and the typed facade.
//!
//! It currently holds the `StorageLevel` retention policy. Identity types for
//! plan nodes live next to the plan in `engine::plan`.

pub mod storage_level;

// Re-export the main type(s) for easier access.
pub use storage_level::StorageLevel;
