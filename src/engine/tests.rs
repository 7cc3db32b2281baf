use super::*;
use crate::config::EngineConfig;
use crate::error::tambakError;
use crate::types::StorageLevel;
use arrow::array::{Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn int_schema(nullable: bool) -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("value", DataType::Int64, nullable)]))
}

fn int_batch(values: &[i64]) -> RecordBatch {
    RecordBatch::try_new(
        int_schema(false),
        vec![Arc::new(Int64Array::from(values.to_vec()))],
    )
    .unwrap()
}

/// Helper to build an engine with a private spill directory.
fn test_engine(max_attempts: u32) -> (tempfile::TempDir, Arc<LocalEngine>) {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        default_parallelism: 2,
        shuffle_partitions: 3,
        task_max_attempts: max_attempts,
        spill_dir: Some(dir.path().to_path_buf()),
        ..EngineConfig::default()
    };
    (dir, LocalEngine::new(config).unwrap())
}

fn source(engine: &Arc<LocalEngine>, partitions: &[&[i64]]) -> RawCollection {
    let batches = partitions.iter().map(|p| int_batch(p)).collect();
    engine.source(int_schema(false), batches).unwrap()
}

fn sorted_values(collection: &RawCollection) -> Vec<i64> {
    let mut out: Vec<i64> = collection
        .evaluate()
        .unwrap()
        .iter()
        .flat_map(|b| {
            b.column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap()
                .values()
                .to_vec()
        })
        .collect();
    out.sort_unstable();
    out
}

/// A pass-through partition function that counts its invocations.
fn counting_identity(counter: Arc<AtomicUsize>) -> PartitionFn {
    Arc::new(move |_idx: usize, batch: RecordBatch| -> Result<RecordBatch, tambakError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(batch)
    })
}

#[test]
fn test_source_with_no_batches_has_one_empty_partition() {
    let (_dir, engine) = test_engine(1);
    let empty = engine.source(int_schema(false), Vec::new()).unwrap();

    assert_eq!(empty.num_partitions(), 1);
    assert_eq!(empty.count().unwrap(), 0);
    assert_eq!(empty.dependency(), Dependency::Source);
}

#[test]
fn test_source_rejects_batches_with_another_layout() {
    let (_dir, engine) = test_engine(1);
    let other = Arc::new(Schema::new(vec![Field::new("other", DataType::Int64, false)]));

    let result = engine.source(other, vec![int_batch(&[1])]);

    assert!(matches!(result, Err(tambakError::SchemaMismatch(_))));
}

#[test]
fn test_repartition_redistributes_every_row() {
    let (_dir, engine) = test_engine(1);
    let data = source(&engine, &[&[1, 2, 3, 4, 5, 6, 7], &[8, 9]]);

    for n in [1, 2, 5, 12] {
        let repartitioned = data.repartition(n).unwrap();
        assert_eq!(repartitioned.num_partitions(), n);
        assert_eq!(repartitioned.dependency(), Dependency::Shuffle);
        assert_eq!(sorted_values(&repartitioned), (1..=9).collect::<Vec<_>>());
        assert_eq!(repartitioned.evaluate().unwrap().len(), n);
    }
    assert!(matches!(
        data.repartition(0),
        Err(tambakError::InvalidArgument(_))
    ));
}

#[test]
fn test_coalesce_is_narrow_and_merges_contiguous_partitions() {
    let (_dir, engine) = test_engine(1);
    let data = source(&engine, &[&[1], &[2], &[3], &[4], &[5]]);

    // --- Act ---
    let coalesced = data.coalesce(2).unwrap();

    // --- Assert ---
    assert_eq!(coalesced.num_partitions(), 2);
    assert_eq!(
        coalesced.dependency(),
        Dependency::Narrow(vec![vec![0, 1], vec![2, 3, 4]])
    );
    let partitions = coalesced.evaluate().unwrap();
    assert_eq!(partitions[0].num_rows(), 2);
    assert_eq!(partitions[1].num_rows(), 3);

    let unchanged = data.coalesce(9).unwrap();
    assert_eq!(unchanged.num_partitions(), 5);
    assert_eq!(unchanged.id(), data.id());
}

#[test]
fn test_union_concatenates_and_widens_nullability() {
    let (_dir, engine) = test_engine(1);
    let left = source(&engine, &[&[1, 2], &[2]]);
    let nullable = RecordBatch::try_new(
        int_schema(true),
        vec![Arc::new(Int64Array::from(vec![Some(2), None]))],
    )
    .unwrap();
    let right = engine.source(int_schema(true), vec![nullable]).unwrap();

    let union = left.union(&right).unwrap();

    assert_eq!(union.num_partitions(), 3);
    assert_eq!(union.count().unwrap(), 5);
    assert!(union.schema().field(0).is_nullable());
    let last = union.evaluate().unwrap().pop().unwrap();
    assert_eq!(last.column(0).null_count(), 1);
}

#[test]
fn test_binary_operations_reject_foreign_engines() {
    let (_dir_a, engine_a) = test_engine(1);
    let (_dir_b, engine_b) = test_engine(1);
    let a = source(&engine_a, &[&[1]]);
    let b = source(&engine_b, &[&[1]]);

    assert!(matches!(a.union(&b), Err(tambakError::InvalidArgument(_))));
    assert!(matches!(a.intersect(&b), Err(tambakError::InvalidArgument(_))));
}

#[test]
fn test_set_operations_compare_encoded_rows() {
    let (_dir, engine) = test_engine(1);
    let data = source(&engine, &[&[1, 2], &[2, 3, 3]]);
    let other = source(&engine, &[&[2, 3, 4]]);

    assert_eq!(sorted_values(&data.distinct()), vec![1, 2, 3]);
    assert_eq!(sorted_values(&data.intersect(&other).unwrap()), vec![2, 3]);
    assert_eq!(sorted_values(&data.subtract(&other).unwrap()), vec![1]);
    assert_eq!(data.distinct().num_partitions(), 3);
}

#[test]
fn test_unpersisted_lineage_is_recomputed_for_every_job() {
    let (_dir, engine) = test_engine(1);
    let counter = Arc::new(AtomicUsize::new(0));
    let mapped = source(&engine, &[&[1], &[2]]).map_partitions(
        "Identity",
        int_schema(false),
        counting_identity(Arc::clone(&counter)),
    );

    mapped.count().unwrap();
    mapped.count().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[test]
fn test_persisted_materialization_is_computed_once_until_released() {
    let (_dir, engine) = test_engine(1);
    let counter = Arc::new(AtomicUsize::new(0));
    let mapped = source(&engine, &[&[1], &[2]]).map_partitions(
        "Identity",
        int_schema(false),
        counting_identity(Arc::clone(&counter)),
    );

    // --- Act: marking alone computes nothing ---
    let persisted = mapped.persist(StorageLevel::MEMORY_ONLY).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(mapped.storage_info().unwrap().cached_partitions, 0);

    persisted.count().unwrap();
    mapped.count().unwrap();

    // --- Assert: the alias shares the retained blocks ---
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    let info = mapped.storage_info().unwrap();
    assert_eq!(info.level, StorageLevel::MEMORY_ONLY);
    assert_eq!(info.cached_partitions, 2);
    assert!(info.memory_bytes > 0);

    mapped.unpersist(true).unwrap();
    assert_eq!(mapped.storage_level().unwrap(), StorageLevel::NONE);
    mapped.count().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[test]
fn test_repersist_after_background_unpersist_keeps_every_job_readable() {
    let (_dir, engine) = test_engine(1);
    let parts: Vec<Vec<i64>> = (0..16).map(|i| vec![i, i + 100]).collect();
    let slices: Vec<&[i64]> = parts.iter().map(Vec::as_slice).collect();
    let data = source(&engine, &slices);
    data.persist(StorageLevel::DISK_ONLY).unwrap();
    assert_eq!(data.count().unwrap(), 32);

    for _ in 0..20 {
        data.unpersist(false).unwrap();
        data.persist(StorageLevel::DISK_ONLY).unwrap();
        assert_eq!(data.count().unwrap(), 32);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(data.count().unwrap(), 32);
    }
    assert_eq!(data.storage_info().unwrap().cached_partitions, 16);
}

#[test]
fn test_shuffle_and_union_failures_surface_as_task_failures() {
    let (_dir, engine) = test_engine(1);
    // Declares Int64 but emits Int32 columns, so every downstream step that
    // rebuilds batches against the declared schema fails.
    let mistyped: PartitionFn = Arc::new(|_idx: usize, batch: RecordBatch| -> Result<RecordBatch, tambakError> {
        let narrowed = arrow::compute::cast(batch.column(0), &DataType::Int32)?;
        let schema = Arc::new(Schema::new(vec![Field::new("value", DataType::Int32, false)]));
        Ok(RecordBatch::try_new(schema, vec![narrowed])?)
    });
    let data = source(&engine, &[&[1, 2], &[3]]).map_partitions("Mistype", int_schema(false), mistyped);
    let clean = source(&engine, &[&[4]]);

    let cases = [
        ("Union", data.union(&clean).unwrap()),
        ("Repartition", data.repartition(2).unwrap()),
        ("Distinct", data.distinct()),
        ("Intersect", data.intersect(&clean).unwrap()),
    ];
    for (expected_stage, collection) in cases {
        match collection.count().unwrap_err() {
            tambakError::TaskFailed { stage, source, .. } => {
                assert_eq!(stage, expected_stage);
                assert!(matches!(*source, tambakError::Arrow(_)), "{:?}", source);
            }
            other => panic!("expected TaskFailed for {}, got {:?}", expected_stage, other),
        }
    }
}

#[test]
fn test_engine_accessors_share_config_and_store() {
    let (_dir, engine) = test_engine(1);
    let data = source(&engine, &[&[1, 2, 3]]);

    assert!(Arc::ptr_eq(data.engine(), &engine));
    assert!(Arc::ptr_eq(&engine.shared_config(), &engine.shared_config()));
    assert_eq!(engine.shared_config().shuffle_partitions, 3);
    assert_eq!(engine.storage_memory_used().unwrap(), 0);

    data.persist(StorageLevel::MEMORY_ONLY).unwrap();
    data.count().unwrap();
    let used = engine.storage_memory_used().unwrap();
    assert!(used > 0);
    assert_eq!(used, data.storage_info().unwrap().memory_bytes);

    data.unpersist(true).unwrap();
    assert_eq!(engine.storage_memory_used().unwrap(), 0);
}

#[test]
fn test_persist_rejects_the_none_level() {
    let (_dir, engine) = test_engine(1);
    let data = source(&engine, &[&[1]]);

    assert!(matches!(
        data.persist(StorageLevel::NONE),
        Err(tambakError::InvalidArgument(_))
    ));
}

#[test]
fn test_failing_task_is_retried_up_to_the_configured_attempts() {
    let (_dir, engine) = test_engine(3);
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_task = Arc::clone(&calls);
    let flaky: PartitionFn = Arc::new(move |_idx: usize, batch: RecordBatch| -> Result<RecordBatch, tambakError> {
        // Fails on the first two attempts of the only partition.
        if calls_in_task.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(tambakError::InternalError("transient".to_string()));
        }
        Ok(batch)
    });
    let data = source(&engine, &[&[7, 8]]).map_partitions("Flaky", int_schema(false), flaky);

    assert_eq!(data.count().unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_panicking_task_fails_the_job_with_its_stage() {
    let (_dir, engine) = test_engine(1);
    let exploding: PartitionFn = Arc::new(|idx: usize, batch: RecordBatch| -> Result<RecordBatch, tambakError> {
        if idx == 1 {
            panic!("boom in partition one");
        }
        Ok(batch)
    });
    let data = source(&engine, &[&[1], &[2]]).map_partitions("Explode", int_schema(false), exploding);

    let err = data.count().unwrap_err();

    match &err {
        tambakError::TaskFailed {
            stage,
            partition,
            attempts,
            ..
        } => {
            assert_eq!(stage, "Explode");
            assert_eq!(*partition, 1);
            assert_eq!(*attempts, 1);
        }
        other => panic!("expected TaskFailed, got {:?}", other),
    }
    assert!(
        matches!(err.root_cause(), tambakError::TaskPanicked(msg) if msg.contains("boom"))
    );
}

#[test]
fn test_take_stops_after_enough_rows() {
    let (_dir, engine) = test_engine(1);
    let data = source(&engine, &[&[1, 2], &[3, 4], &[5]]);

    let taken = data.take(3).unwrap();

    assert_eq!(taken.iter().map(|b| b.num_rows()).sum::<usize>(), 3);
    assert_eq!(taken.len(), 2);
    assert!(data.take(0).unwrap().is_empty());
    assert_eq!(data.take(100).unwrap().len(), 3);
}

#[test]
fn test_explain_shows_lineage_and_persistence_marks() {
    let (_dir, engine) = test_engine(1);
    let data = source(&engine, &[&[1], &[2]]);
    let sampled = data.sample(false, 0.5, 42).unwrap();
    let distinct = sampled.distinct();
    sampled.persist(StorageLevel::DISK_ONLY).unwrap();

    let plan = distinct.explain();
    let lines: Vec<&str> = plan.lines().collect();

    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Distinct"));
    assert!(lines[1].starts_with("+- Sample"));
    assert!(lines[1].contains("seed=42"));
    assert!(lines[1].contains("[Disk Serialized 1x Replicated]"));
    assert!(lines[2].starts_with("   +- Source"));
}
