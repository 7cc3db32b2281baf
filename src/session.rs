// In: src/session.rs

//! The entry point for building collections.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::config::EngineConfig;
use crate::dataset::{GenericView, TypedCollection};
use crate::encoding::Encodable;
use crate::engine::plan::{check_partition_count, contiguous_ranges};
use crate::engine::LocalEngine;
use crate::error::tambakError;

/// Owns a local engine and turns in-memory data into collections.
///
/// Cloning a session shares the engine, so collections built from clones can be
/// combined with each other.
#[derive(Clone)]
pub struct Session {
    engine: Arc<LocalEngine>,
}

impl Session {
    pub fn new(config: EngineConfig) -> Result<Self, tambakError> {
        Ok(Self {
            engine: LocalEngine::new(config)?,
        })
    }

    /// A session with the default configuration.
    pub fn local() -> Result<Self, tambakError> {
        Self::new(EngineConfig::default())
    }

    pub fn engine(&self) -> &Arc<LocalEngine> {
        &self.engine
    }

    /// Distributes `items` over `default_parallelism` partitions.
    pub fn create_collection<T: Encodable>(
        &self,
        items: Vec<T>,
    ) -> Result<TypedCollection<T>, tambakError> {
        let n = self.engine.config().default_parallelism;
        self.create_collection_with_partitions(items, n)
    }

    /// Splits `items` into `num_partitions` contiguous slices, keeping their order.
    pub fn create_collection_with_partitions<T: Encodable>(
        &self,
        items: Vec<T>,
        num_partitions: usize,
    ) -> Result<TypedCollection<T>, tambakError> {
        check_partition_count("create_collection", num_partitions)?;
        let ranges = contiguous_ranges(items.len(), num_partitions);
        let mut items = items.into_iter();
        let batches = ranges
            .into_iter()
            .map(|range| T::encode_batch(items.by_ref().take(range.len()).collect()))
            .collect::<Result<Vec<_>, tambakError>>()?;
        let raw = self.engine.source(T::schema(), batches)?;
        Ok(TypedCollection::from_raw(raw))
    }

    /// The integers from `start` (inclusive) to `end` (exclusive) in steps of
    /// `step`, which may be negative but not zero.
    pub fn range(
        &self,
        start: i64,
        end: i64,
        step: i64,
        num_partitions: usize,
    ) -> Result<TypedCollection<i64>, tambakError> {
        if step == 0 {
            return Err(tambakError::InvalidArgument(
                "range step must not be zero".to_string(),
            ));
        }
        let mut values = Vec::new();
        let mut next = Some(start);
        while let Some(value) = next {
            if (step > 0 && value >= end) || (step < 0 && value <= end) {
                break;
            }
            values.push(value);
            next = value.checked_add(step);
        }
        self.create_collection_with_partitions(values, num_partitions)
    }

    /// Wraps existing batches, one partition per batch.
    pub fn from_batches(
        &self,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<GenericView, tambakError> {
        Ok(GenericView::new(self.engine.source(schema, batches)?))
    }
}
