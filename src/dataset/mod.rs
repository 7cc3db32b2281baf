// In: src/dataset/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Typed Facade
// ====================================================================================
//
// `dataset` is the public, statically typed face of the library. It owns no data
// and runs no computation of its own: every operation is forwarded to a
// `RawCollection` and the result is re-wrapped under the right element type.
//
//   1. [TypedCollection<T>]  -> `T: Encodable` is the compile-time proof that
//         |                     `T` maps onto an Arrow schema.
//         |
//         |-> a. pure re-typing: `to_generic_view`, `to_raw_collection`
//         |-> b. element closures are wrapped into a `PartitionFn` that decodes a
//         |      partition as `Vec<T>`, applies the closure and encodes the result
//         |-> c. shape and set operations forward to the engine unchanged
//         `-> d. persistence forwards to the engine's block store
//
//   2. [GenericView]         -> the same handle with the type erased; re-typed
//                               at runtime by `as_typed::<U>()`
//
//   3. [display]             -> tabular rendering shared by both `show`s
//
// ====================================================================================
pub mod display;
pub mod generic;
pub mod typed;

pub use display::{DEFAULT_SHOW_ROWS, DEFAULT_TRUNCATE_WIDTH};
pub use generic::GenericView;
pub use typed::TypedCollection;
