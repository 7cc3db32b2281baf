// In: src/engine/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Local Engine
// ====================================================================================
//
// The `engine` is the untyped half of the library. It knows nothing about Rust
// element types: it moves Arrow `RecordBatch`es between partitions and compares
// rows only through their encoded (Arrow row format) bytes. The typed facade in
// `dataset` sits on top of it and talks to it only through `RawCollection`.
//
// Data Flow (building):
//
//   1. [RawCollection builder (map_partitions, union, distinct, ...)]
//         |
//         `-> allocates a new `PlanNode` with a fresh `MaterializationId`
//             pointing at its parent node(s). Nothing runs.
//
// Data Flow (evaluating):
//
//   1. [RawCollection::evaluate / run_job / count / take]
//         |
//         `-> 2. [executor::compute] walks the lineage depth-first
//                   |
//                   |-> a. serves any persisted node from `storage::BlockStore`
//                   |-> b. narrow steps run as one task per partition
//                   |-> c. wide steps (`shuffle`) exchange encoded rows
//                   `-> d. retains the output of nodes marked by `persist`
//
//   3. [executor::run_tasks] bounded worker pool, per-task retries, first
//      permanent failure aborts the stage.
//
// ====================================================================================
pub(crate) mod codec;
pub(crate) mod context;
pub(crate) mod executor;
pub(crate) mod plan;
pub(crate) mod raw;
pub(crate) mod sample;
pub(crate) mod shuffle;
pub(crate) mod storage;

pub use context::LocalEngine;
pub use plan::{Dependency, MaterializationId, PartitionFn};
pub use raw::RawCollection;
pub use storage::StorageInfo;

#[cfg(test)]
mod tests;
