// In: src/engine/shuffle.rs

//! All-to-all exchanges: round-robin repartitioning and the hash shuffles behind
//! `distinct`, `intersect` and `subtract`.
//!
//! Equality-sensitive operations never look at typed values. Every row is first
//! converted to Arrow's row format, and those bytes are both the shuffle key and
//! the identity used for deduplication. Two rows are the same element exactly when
//! their encoded bytes are identical, which for floats means total-order bit
//! equality (`0.0` and `-0.0` differ, `NaN` equals itself).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use arrow::array::UInt32Array;
use arrow::compute::{concat_batches, take_record_batch};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow::row::{OwnedRow, RowConverter, SortField};
use hashbrown::HashSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::context::LocalEngine;
use crate::engine::executor::run_tasks;
use crate::engine::plan::SetOperation;
use crate::error::tambakError;

//==================================================================================
// 1. Round-robin repartitioning
//==================================================================================

/// Redistributes rows evenly over `num_partitions` outputs.
///
/// Each input partition deals its rows round-robin starting at an offset derived
/// from its own index, so the layout is deterministic for a given input.
pub(crate) fn round_robin(
    engine: &LocalEngine,
    schema: &SchemaRef,
    parent: &[RecordBatch],
    num_partitions: usize,
) -> Result<Vec<RecordBatch>, tambakError> {
    let map_outputs = run_tasks(engine, "Repartition", parent.len(), &|idx: usize| {
        let batch = &parent[idx];
        let mut rng = StdRng::seed_from_u64(idx as u64);
        let start = rng.random_range(0..num_partitions);

        let mut targets: Vec<Vec<u32>> = vec![Vec::new(); num_partitions];
        for row in 0..batch.num_rows() {
            targets[(start + row) % num_partitions].push(row as u32);
        }
        targets
            .into_iter()
            .map(|rows| Ok(take_record_batch(batch, &UInt32Array::from(rows))?))
            .collect::<Result<Vec<_>, tambakError>>()
    })?;

    run_tasks(engine, "Repartition", num_partitions, &|out: usize| {
        let pieces: Vec<&RecordBatch> = map_outputs.iter().map(|buckets| &buckets[out]).collect();
        Ok(concat_batches(schema, pieces)?)
    })
}

//==================================================================================
// 2. Hash shuffles on the encoded row representation
//==================================================================================

fn row_converter(schema: &SchemaRef) -> Result<RowConverter, tambakError> {
    let fields = schema
        .fields()
        .iter()
        .map(|f| SortField::new(f.data_type().clone()))
        .collect();
    Ok(RowConverter::new(fields)?)
}

fn bucket_of(encoded: &[u8], num_partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    encoded.hash(&mut hasher);
    (hasher.finish() % num_partitions as u64) as usize
}

/// Encodes every row of `partitions` and routes it to its hash bucket, keeping
/// encounter order within each bucket.
///
/// The map side runs one task per input partition; the buckets are then merged
/// in partition order.
fn hash_partition(
    engine: &LocalEngine,
    stage: &str,
    converter: &RowConverter,
    partitions: &[RecordBatch],
    num_partitions: usize,
) -> Result<Vec<Vec<OwnedRow>>, tambakError> {
    let map_outputs = run_tasks(engine, stage, partitions.len(), &|idx: usize| {
        let mut buckets: Vec<Vec<OwnedRow>> = vec![Vec::new(); num_partitions];
        let rows = converter.convert_columns(partitions[idx].columns())?;
        for row in rows.iter() {
            buckets[bucket_of(row.as_ref(), num_partitions)].push(row.owned());
        }
        Ok(buckets)
    })?;

    let mut merged: Vec<Vec<OwnedRow>> = vec![Vec::new(); num_partitions];
    for buckets in map_outputs {
        for (target, rows) in merged.iter_mut().zip(buckets) {
            target.extend(rows);
        }
    }
    Ok(merged)
}

/// Builds a batch back from encoded rows. `converter` must be the one that
/// encoded them.
fn rows_to_batch(
    converter: &RowConverter,
    schema: &SchemaRef,
    rows: &[OwnedRow],
) -> Result<RecordBatch, tambakError> {
    if rows.is_empty() {
        return Ok(RecordBatch::new_empty(schema.clone()));
    }
    let columns = converter.convert_rows(rows.iter().map(|r| r.row()))?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Deduplicates by encoded row. Each output partition keeps the first occurrence
/// of every row routed to it.
pub(crate) fn distinct(
    engine: &LocalEngine,
    schema: &SchemaRef,
    parent: &[RecordBatch],
    num_partitions: usize,
) -> Result<Vec<RecordBatch>, tambakError> {
    let converter = row_converter(schema)?;
    let buckets = hash_partition(engine, "Distinct", &converter, parent, num_partitions)?;

    run_tasks(engine, "Distinct", num_partitions, &|idx: usize| {
        let mut seen = HashSet::new();
        let kept: Vec<OwnedRow> = buckets[idx]
            .iter()
            .filter(|row| seen.insert((*row).clone()))
            .cloned()
            .collect();
        rows_to_batch(&converter, schema, &kept)
    })
}

/// Encoded-set intersection or difference. Both results are deduplicated.
pub(crate) fn set_operation(
    engine: &LocalEngine,
    op: SetOperation,
    schema: &SchemaRef,
    left: &[RecordBatch],
    right: &[RecordBatch],
    num_partitions: usize,
) -> Result<Vec<RecordBatch>, tambakError> {
    let stage = match op {
        SetOperation::Intersect => "Intersect",
        SetOperation::Subtract => "Subtract",
    };
    let converter = row_converter(schema)?;
    let left_buckets = hash_partition(engine, stage, &converter, left, num_partitions)?;
    let right_buckets = hash_partition(engine, stage, &converter, right, num_partitions)?;
    run_tasks(engine, stage, num_partitions, &|idx: usize| {
        let other: HashSet<&OwnedRow> = right_buckets[idx].iter().collect();
        let mut seen = HashSet::new();
        let kept: Vec<OwnedRow> = left_buckets[idx]
            .iter()
            .filter(|row| {
                let in_other = other.contains(*row);
                let wanted = match op {
                    SetOperation::Intersect => in_other,
                    SetOperation::Subtract => !in_other,
                };
                wanted && seen.insert(*row)
            })
            .cloned()
            .collect();
        rows_to_batch(&converter, schema, &kept)
    })
}
