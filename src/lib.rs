//! This file is the root of the `tambak_dataset` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of our library (`dataset`, `engine`, etc.)
//!     so the Rust compiler knows they exist.
//! 2.  Re-exporting the handful of types a caller needs to build and run typed
//!     collections, so `use tambak_dataset::*` style imports stay short.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
//==================================================================================
// 1. Module Declarations
//==================================================================================
#[macro_use]
pub mod observability; // Make macros available throughout the crate

pub mod config;
pub mod dataset;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod session;
pub mod types;

//==================================================================================
// 2. Public Surface
//==================================================================================
// `impl_encodable!` expands to paths under `$crate::arrow`.
pub use arrow;
// `log_metric!` expands to `$crate::log::debug!`.
#[doc(hidden)]
pub use log;

pub use config::EngineConfig;
pub use dataset::{GenericView, TypedCollection};
pub use encoding::{ColumnEncodable, Encodable};
pub use engine::{Dependency, LocalEngine, MaterializationId, RawCollection, StorageInfo};
pub use error::tambakError;
pub use observability::enable_verbose_logging;
pub use session::Session;
pub use types::StorageLevel;
