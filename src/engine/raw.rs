// In: src/engine/raw.rs

//! `RawCollection`: the untyped collection handle.
//!
//! A handle is an engine reference plus the plan node it stands for. Builders
//! never evaluate anything, they allocate a new node whose parent is this one.
//! Evaluation (`evaluate`, `run_job`, `count`, `take`) walks the lineage through
//! the executor and blocks until the job finishes or fails.

use std::sync::Arc;
use std::time::Instant;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::engine::context::LocalEngine;
use crate::engine::executor::{compute, run_tasks};
use crate::engine::plan::{
    check_fraction, check_partition_count, check_same_layout, contiguous_ranges, union_schema,
    Dependency, MaterializationId, PartitionFn, PlanKind, PlanNode, SetOperation,
};
use crate::engine::storage::StorageInfo;
use crate::error::tambakError;
use crate::types::StorageLevel;

#[derive(Clone)]
pub struct RawCollection {
    engine: Arc<LocalEngine>,
    node: Arc<PlanNode>,
}

impl RawCollection {
    pub(crate) fn new(engine: Arc<LocalEngine>, node: Arc<PlanNode>) -> Self {
        Self { engine, node }
    }

    pub fn id(&self) -> MaterializationId {
        self.node.id()
    }

    pub fn schema(&self) -> SchemaRef {
        self.node.schema()
    }

    pub fn num_partitions(&self) -> usize {
        self.node.num_partitions()
    }

    pub fn dependency(&self) -> Dependency {
        self.node.dependency()
    }

    pub fn engine(&self) -> &Arc<LocalEngine> {
        &self.engine
    }

    /// Renders the lineage of this collection, one node per line, with persisted
    /// nodes annotated by their storage level.
    pub fn explain(&self) -> String {
        let store = self.engine.store();
        self.node.render_tree(&|id| {
            store
                .level_of(id)
                .ok()
                .filter(StorageLevel::is_valid)
                .map(|level| level.description())
        })
    }

    fn derive(&self, schema: SchemaRef, num_partitions: usize, kind: PlanKind) -> Self {
        let node = PlanNode {
            id: self.engine.next_id(),
            schema,
            num_partitions,
            kind,
        };
        Self::new(Arc::clone(&self.engine), Arc::new(node))
    }

    fn check_same_engine(&self, operation: &str, other: &Self) -> Result<(), tambakError> {
        if !Arc::ptr_eq(&self.engine, &other.engine) {
            return Err(tambakError::InvalidArgument(format!(
                "{} cannot combine collections from different engines",
                operation
            )));
        }
        Ok(())
    }

    //==============================================================================
    // Builders
    //==============================================================================

    /// Applies `func` to every partition. `schema` is the schema `func` produces.
    pub fn map_partitions(&self, name: &'static str, schema: SchemaRef, func: PartitionFn) -> Self {
        self.derive(
            schema,
            self.num_partitions(),
            PlanKind::MapPartitions {
                input: Arc::clone(&self.node),
                name,
                func,
            },
        )
    }

    /// Redistributes rows round-robin over exactly `num_partitions` partitions.
    pub fn repartition(&self, num_partitions: usize) -> Result<Self, tambakError> {
        check_partition_count("repartition", num_partitions)?;
        Ok(self.derive(
            self.schema(),
            num_partitions,
            PlanKind::Repartition {
                input: Arc::clone(&self.node),
            },
        ))
    }

    /// Merges contiguous runs of partitions without a shuffle.
    ///
    /// When `num_partitions` is not below the current count the same handle is
    /// returned.
    pub fn coalesce(&self, num_partitions: usize) -> Result<Self, tambakError> {
        check_partition_count("coalesce", num_partitions)?;
        if num_partitions >= self.num_partitions() {
            return Ok(self.clone());
        }
        Ok(self.derive(
            self.schema(),
            num_partitions,
            PlanKind::Coalesce {
                input: Arc::clone(&self.node),
                groups: contiguous_ranges(self.num_partitions(), num_partitions),
            },
        ))
    }

    /// Concatenates the partitions of `self` and `other`. Nothing is deduplicated.
    pub fn union(&self, other: &Self) -> Result<Self, tambakError> {
        self.check_same_engine("union", other)?;
        check_same_layout("union", &self.schema(), &other.schema())?;
        Ok(self.derive(
            union_schema(&self.schema(), &other.schema()),
            self.num_partitions() + other.num_partitions(),
            PlanKind::Union {
                left: Arc::clone(&self.node),
                right: Arc::clone(&other.node),
            },
        ))
    }

    /// Deduplicates rows by their encoded representation.
    pub fn distinct(&self) -> Self {
        self.derive(
            self.schema(),
            self.engine.config().shuffle_partitions,
            PlanKind::Distinct {
                input: Arc::clone(&self.node),
            },
        )
    }

    pub fn intersect(&self, other: &Self) -> Result<Self, tambakError> {
        self.set_operation(SetOperation::Intersect, other)
    }

    pub fn subtract(&self, other: &Self) -> Result<Self, tambakError> {
        self.set_operation(SetOperation::Subtract, other)
    }

    fn set_operation(&self, op: SetOperation, other: &Self) -> Result<Self, tambakError> {
        let name = match op {
            SetOperation::Intersect => "intersect",
            SetOperation::Subtract => "subtract",
        };
        self.check_same_engine(name, other)?;
        check_same_layout(name, &self.schema(), &other.schema())?;
        Ok(self.derive(
            self.schema(),
            self.engine.config().shuffle_partitions,
            PlanKind::SetOp {
                op,
                left: Arc::clone(&self.node),
                right: Arc::clone(&other.node),
            },
        ))
    }

    pub fn sample(
        &self,
        with_replacement: bool,
        fraction: f64,
        seed: u64,
    ) -> Result<Self, tambakError> {
        check_fraction(fraction)?;
        Ok(self.derive(
            self.schema(),
            self.num_partitions(),
            PlanKind::Sample {
                input: Arc::clone(&self.node),
                with_replacement,
                fraction,
                seed,
            },
        ))
    }

    //==============================================================================
    // Persistence
    //==============================================================================

    /// Marks this materialization for retention. Nothing is computed until the
    /// next job that needs it.
    pub fn persist(&self, level: StorageLevel) -> Result<Self, tambakError> {
        self.engine.store().mark(self.id(), level)?;
        Ok(self.clone())
    }

    pub fn unpersist(&self, blocking: bool) -> Result<Self, tambakError> {
        self.engine.store().release(self.id(), blocking)?;
        Ok(self.clone())
    }

    pub fn storage_level(&self) -> Result<StorageLevel, tambakError> {
        self.engine.store().level_of(self.id())
    }

    pub fn storage_info(&self) -> Result<StorageInfo, tambakError> {
        self.engine.store().info(self.id(), self.num_partitions())
    }

    //==============================================================================
    // Evaluation
    //==============================================================================

    /// Computes and returns every partition, in partition order.
    pub fn evaluate(&self) -> Result<Vec<RecordBatch>, tambakError> {
        let partitions = compute(&self.engine, &self.node)?;
        Ok(partitions.as_ref().clone())
    }

    /// Computes this collection and runs `task` once per partition on the worker
    /// pool. Results are returned in partition order.
    pub fn run_job<R: Send>(
        &self,
        stage: &str,
        task: &(dyn Fn(usize, RecordBatch) -> Result<R, tambakError> + Sync),
    ) -> Result<Vec<R>, tambakError> {
        let start = Instant::now();
        let partitions = compute(&self.engine, &self.node)?;
        let results = run_tasks(&self.engine, stage, partitions.len(), &|idx: usize| {
            task(idx, partitions[idx].clone())
        })?;
        log_metric!(
            "event" = "job_finished",
            "job" = stage,
            "materialization" = self.id(),
            "partitions" = partitions.len(),
            "elapsed_us" = start.elapsed().as_micros()
        );
        Ok(results)
    }

    pub fn count(&self) -> Result<i64, tambakError> {
        let per_partition = self.run_job("count", &|_idx: usize, batch: RecordBatch| {
            Ok(batch.num_rows())
        })?;
        let total: usize = per_partition.into_iter().sum();
        i64::try_from(total).map_err(|_| {
            tambakError::InternalError(format!("row count {} does not fit in an i64", total))
        })
    }

    /// The first `n` rows in partition order, as slices of the computed batches.
    pub fn take(&self, n: usize) -> Result<Vec<RecordBatch>, tambakError> {
        let mut remaining = n;
        let mut taken = Vec::new();
        if remaining == 0 {
            return Ok(taken);
        }
        for batch in compute(&self.engine, &self.node)?.iter() {
            let rows = batch.num_rows().min(remaining);
            if rows > 0 {
                taken.push(batch.slice(0, rows));
                remaining -= rows;
            }
            if remaining == 0 {
                break;
            }
        }
        Ok(taken)
    }
}

impl std::fmt::Debug for RawCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCollection")
            .field("id", &self.id())
            .field("operator", &self.node.operator_name())
            .field("num_partitions", &self.num_partitions())
            .finish()
    }
}
