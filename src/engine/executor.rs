// In: src/engine/executor.rs

//! Evaluates lineage and schedules partition tasks.
//!
//! `compute` walks a node's lineage depth-first, serving any persisted ancestor
//! from the block store and retaining freshly computed partitions for marked
//! nodes. Per-partition work is handed to `run_tasks`, a bounded worker pool that
//! retries failed tasks (returned errors and panics alike) up to
//! `task_max_attempts` times. A task that exhausts its attempts fails the whole
//! stage; results of other partitions are discarded, never partially reported.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use arrow::record_batch::RecordBatch;

use crate::engine::context::LocalEngine;
use crate::engine::plan::{conform, PlanKind, PlanNode};
use crate::engine::{sample, shuffle};
use crate::error::tambakError;

/// Materializes every partition of `node`.
pub(crate) fn compute(
    engine: &LocalEngine,
    node: &PlanNode,
) -> Result<Arc<Vec<RecordBatch>>, tambakError> {
    if let Some(retained) = engine.store().get(node.id)? {
        return Ok(Arc::new(retained));
    }

    let start = Instant::now();
    let partitions: Arc<Vec<RecordBatch>> = match &node.kind {
        PlanKind::Source { partitions } => Arc::clone(partitions),
        PlanKind::MapPartitions { input, name, func } => {
            let parent = compute(engine, input)?;
            let outputs = run_tasks(engine, name, parent.len(), &|idx: usize| {
                func(idx, parent[idx].clone())
            })?;
            Arc::new(outputs)
        }
        PlanKind::Repartition { input } => {
            let parent = compute(engine, input)?;
            Arc::new(shuffle::round_robin(
                engine,
                &node.schema,
                &parent,
                node.num_partitions,
            )?)
        }
        PlanKind::Coalesce { input, groups } => {
            let parent = compute(engine, input)?;
            let outputs = run_tasks(engine, "Coalesce", groups.len(), &|idx: usize| {
                let range = groups[idx].clone();
                Ok(arrow::compute::concat_batches(
                    &node.schema,
                    &parent[range],
                )?)
            })?;
            Arc::new(outputs)
        }
        PlanKind::Union { left, right } => {
            let left = compute(engine, left)?;
            let right = compute(engine, right)?;
            let split = left.len();
            let outputs = run_tasks(engine, "Union", split + right.len(), &|idx: usize| {
                let batch = if idx < split { &left[idx] } else { &right[idx - split] };
                conform(batch, &node.schema)
            })?;
            Arc::new(outputs)
        }
        PlanKind::Distinct { input } => {
            let parent = compute(engine, input)?;
            Arc::new(shuffle::distinct(
                engine,
                &node.schema,
                &parent,
                node.num_partitions,
            )?)
        }
        PlanKind::SetOp { op, left, right } => {
            let left = compute(engine, left)?;
            let right = compute(engine, right)?;
            Arc::new(shuffle::set_operation(
                engine,
                *op,
                &node.schema,
                &left,
                &right,
                node.num_partitions,
            )?)
        }
        PlanKind::Sample {
            input,
            with_replacement,
            fraction,
            seed,
        } => {
            let parent = compute(engine, input)?;
            let outputs = run_tasks(engine, "Sample", parent.len(), &|idx: usize| {
                sample::sample_partition(&parent[idx], idx, *with_replacement, *fraction, *seed)
            })?;
            Arc::new(outputs)
        }
    };

    log::debug!(
        "{} {} computed {} partition(s) in {:.2?}",
        node.operator_name(),
        node.id,
        partitions.len(),
        start.elapsed()
    );
    engine.store().put(node.id, &partitions)?;
    Ok(partitions)
}

/// Runs `task` for every index in `0..num_tasks` on the engine's worker pool and
/// returns the results in index order.
///
/// Each task may be attempted up to `task_max_attempts` times, so `task` must
/// tolerate re-execution for the same partition.
pub(crate) fn run_tasks<R: Send>(
    engine: &LocalEngine,
    stage: &str,
    num_tasks: usize,
    task: &(dyn Fn(usize) -> Result<R, tambakError> + Sync),
) -> Result<Vec<R>, tambakError> {
    if num_tasks == 0 {
        return Ok(Vec::new());
    }

    let max_attempts = engine.config().task_max_attempts;
    let workers = engine.config().default_parallelism.min(num_tasks);
    let next_task = AtomicUsize::new(0);
    let aborted = AtomicBool::new(false);
    let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..num_tasks).map(|_| None).collect());
    let first_failure: Mutex<Option<tambakError>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if aborted.load(Ordering::Acquire) {
                    break;
                }
                let idx = next_task.fetch_add(1, Ordering::AcqRel);
                if idx >= num_tasks {
                    break;
                }
                match run_with_retries(stage, idx, max_attempts, task) {
                    Ok(value) => {
                        if let Ok(mut slots) = slots.lock() {
                            slots[idx] = Some(value);
                        }
                    }
                    Err(err) => {
                        aborted.store(true, Ordering::Release);
                        if let Ok(mut failure) = first_failure.lock() {
                            failure.get_or_insert(err);
                        }
                        break;
                    }
                }
            });
        }
    });

    let failure = first_failure
        .into_inner()
        .map_err(|_| tambakError::InternalError("task failure slot poisoned".to_string()))?;
    if let Some(err) = failure {
        return Err(err);
    }

    slots
        .into_inner()
        .map_err(|_| tambakError::InternalError("task result slots poisoned".to_string()))?
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.ok_or_else(|| {
                tambakError::InternalError(format!(
                    "stage '{}' finished without a result for partition {}",
                    stage, idx
                ))
            })
        })
        .collect()
}

fn run_with_retries<R>(
    stage: &str,
    partition: usize,
    max_attempts: u32,
    task: &(dyn Fn(usize) -> Result<R, tambakError> + Sync),
) -> Result<R, tambakError> {
    let mut last_error = None;
    for attempt in 1..=max_attempts {
        let outcome = match catch_unwind(AssertUnwindSafe(|| task(partition))) {
            Ok(result) => result,
            Err(payload) => Err(tambakError::TaskPanicked(panic_message(payload.as_ref()))),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                log::warn!(
                    "stage '{}' partition {} attempt {}/{} failed: {}",
                    stage,
                    partition,
                    attempt,
                    max_attempts,
                    err
                );
                last_error = Some(err);
            }
        }
    }
    Err(tambakError::TaskFailed {
        stage: stage.to_string(),
        partition,
        attempts: max_attempts,
        source: Box::new(last_error.unwrap_or_else(|| {
            tambakError::InternalError("task was never attempted".to_string())
        })),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
