//! Per-partition random sampling.
//!
//! Each partition draws from its own `StdRng` seeded with `seed + partition_index`,
//! so a sample is reproducible for a given seed and partition layout.

use arrow::array::UInt32Array;
use arrow::compute::take_record_batch;
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::tambakError;

/// Samples one partition.
///
/// Without replacement every row is kept independently with probability
/// `fraction`. With replacement every row is repeated a Poisson(`fraction`)
/// number of times, so a row may appear more than once.
pub(crate) fn sample_partition(
    batch: &RecordBatch,
    partition: usize,
    with_replacement: bool,
    fraction: f64,
    seed: u64,
) -> Result<RecordBatch, tambakError> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(partition as u64));
    let mut picked: Vec<u32> = Vec::with_capacity((batch.num_rows() as f64 * fraction) as usize);

    for row in 0..batch.num_rows() {
        let copies = if with_replacement {
            poisson(&mut rng, fraction)
        } else if rng.random::<f64>() < fraction {
            1
        } else {
            0
        };
        for _ in 0..copies {
            picked.push(row as u32);
        }
    }

    Ok(take_record_batch(batch, &UInt32Array::from(picked))?)
}

/// Knuth's multiplication method; fine for the small means sampling uses.
fn poisson<R: Rng>(rng: &mut R, mean: f64) -> usize {
    if mean <= 0.0 {
        return 0;
    }
    let limit = (-mean).exp();
    let mut count = 0;
    let mut product = rng.random::<f64>();
    while product > limit {
        count += 1;
        product *= rng.random::<f64>();
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch(n: i32) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("value", DataType::Int32, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from_iter_values(0..n))]).unwrap()
    }

    fn values(batch: &RecordBatch) -> Vec<i32> {
        batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn test_full_fraction_without_replacement_keeps_everything_in_order() {
        let input = batch(100);
        let sampled = sample_partition(&input, 0, false, 1.0, 7).unwrap();
        assert_eq!(values(&sampled), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_fraction_keeps_nothing() {
        let input = batch(50);
        assert_eq!(sample_partition(&input, 0, false, 0.0, 7).unwrap().num_rows(), 0);
        assert_eq!(sample_partition(&input, 0, true, 0.0, 7).unwrap().num_rows(), 0);
    }

    #[test]
    fn test_same_seed_and_partition_reproduce_the_sample() {
        let input = batch(1_000);
        let a = sample_partition(&input, 3, true, 0.5, 42).unwrap();
        let b = sample_partition(&input, 3, true, 0.5, 42).unwrap();
        assert_eq!(values(&a), values(&b));

        let other_partition = sample_partition(&input, 4, true, 0.5, 42).unwrap();
        assert_ne!(values(&a), values(&other_partition));
    }

    #[test]
    fn test_with_replacement_can_repeat_rows() {
        let input = batch(2_000);
        let sampled = sample_partition(&input, 0, true, 1.0, 1).unwrap();
        let picked = values(&sampled);
        let repeats = picked.windows(2).filter(|w| w[0] == w[1]).count();
        assert!(repeats > 0);
        assert!(sampled.column(0).null_count() == 0);
    }
}
