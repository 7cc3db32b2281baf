// In: src/engine/plan.rs

//! The lineage model of the local engine.
//!
//! Every collection handle points at an immutable `PlanNode`. A node records how
//! its partitions are derived from its parents, its output schema and its
//! (statically known) partition count. Nodes are never evaluated when they are
//! built; the executor walks the lineage only when a job forces it.
//!
//! A node's `MaterializationId` is the key under which persistence state is
//! tracked, so every handle that references the same node shares that state.

use std::fmt::{self, Write as _};
use std::ops::Range;
use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::error::tambakError;

/// Engine-unique identity of a plan node and therefore of its materialization.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaterializationId(pub(crate) u64);

impl MaterializationId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MaterializationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An opaque per-partition function: `(partition_index, input) -> output`.
///
/// This is the operation descriptor through which the typed facade expresses all
/// of its element transformations. The engine never looks inside it.
pub type PartitionFn =
    Arc<dyn Fn(usize, RecordBatch) -> Result<RecordBatch, tambakError> + Send + Sync>;

/// The two equality-sensitive binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    Intersect,
    Subtract,
}

/// How the partitions of a node depend on the partitions of its parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// The node reads no parent (in-memory source data).
    Source,
    /// Output partition `i` reads exactly the listed parent partitions. For nodes with
    /// several parents the indices address the parents' partitions laid end to end.
    Narrow(Vec<Vec<usize>>),
    /// Every output partition may read every parent partition (all-to-all exchange).
    Shuffle,
}

pub(crate) enum PlanKind {
    Source {
        partitions: Arc<Vec<RecordBatch>>,
    },
    MapPartitions {
        input: Arc<PlanNode>,
        name: &'static str,
        func: PartitionFn,
    },
    Repartition {
        input: Arc<PlanNode>,
    },
    Coalesce {
        input: Arc<PlanNode>,
        groups: Vec<Range<usize>>,
    },
    Union {
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
    },
    Distinct {
        input: Arc<PlanNode>,
    },
    SetOp {
        op: SetOperation,
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
    },
    Sample {
        input: Arc<PlanNode>,
        with_replacement: bool,
        fraction: f64,
        seed: u64,
    },
}

/// A single, immutable step of a collection's lineage.
pub struct PlanNode {
    pub(crate) id: MaterializationId,
    pub(crate) schema: SchemaRef,
    pub(crate) num_partitions: usize,
    pub(crate) kind: PlanKind,
}

impl PlanNode {
    pub fn id(&self) -> MaterializationId {
        self.id
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Short operator name used in logs and in `explain` output.
    pub fn operator_name(&self) -> &'static str {
        match &self.kind {
            PlanKind::Source { .. } => "Source",
            PlanKind::MapPartitions { name, .. } => *name,
            PlanKind::Repartition { .. } => "Repartition",
            PlanKind::Coalesce { .. } => "Coalesce",
            PlanKind::Union { .. } => "Union",
            PlanKind::Distinct { .. } => "Distinct",
            PlanKind::SetOp {
                op: SetOperation::Intersect,
                ..
            } => "Intersect",
            PlanKind::SetOp {
                op: SetOperation::Subtract,
                ..
            } => "Subtract",
            PlanKind::Sample { .. } => "Sample",
        }
    }

    pub(crate) fn parents(&self) -> Vec<&Arc<PlanNode>> {
        match &self.kind {
            PlanKind::Source { .. } => vec![],
            PlanKind::MapPartitions { input, .. }
            | PlanKind::Repartition { input }
            | PlanKind::Coalesce { input, .. }
            | PlanKind::Distinct { input }
            | PlanKind::Sample { input, .. } => vec![input],
            PlanKind::Union { left, right } | PlanKind::SetOp { left, right, .. } => {
                vec![left, right]
            }
        }
    }

    /// Describes how this node's partitions are wired to its parents' partitions.
    pub fn dependency(&self) -> Dependency {
        match &self.kind {
            PlanKind::Source { .. } => Dependency::Source,
            PlanKind::MapPartitions { .. } | PlanKind::Sample { .. } => {
                Dependency::Narrow((0..self.num_partitions).map(|i| vec![i]).collect())
            }
            PlanKind::Coalesce { groups, .. } => {
                Dependency::Narrow(groups.iter().map(|r| r.clone().collect()).collect())
            }
            PlanKind::Union { .. } => {
                Dependency::Narrow((0..self.num_partitions).map(|i| vec![i]).collect())
            }
            PlanKind::Repartition { .. } | PlanKind::Distinct { .. } | PlanKind::SetOp { .. } => {
                Dependency::Shuffle
            }
        }
    }

    /// Renders the lineage below this node as an indented tree.
    ///
    /// `annotate` may attach a suffix to any node (the engine uses it to show
    /// persistence marks).
    pub(crate) fn render_tree(&self, annotate: &dyn Fn(MaterializationId) -> Option<String>) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0, annotate);
        out
    }

    fn render_into(
        &self,
        out: &mut String,
        depth: usize,
        annotate: &dyn Fn(MaterializationId) -> Option<String>,
    ) {
        let prefix = if depth == 0 {
            String::new()
        } else {
            format!("{}+- ", "   ".repeat(depth - 1))
        };
        let detail = match &self.kind {
            PlanKind::Sample {
                with_replacement,
                fraction,
                seed,
                ..
            } => format!(
                " [with_replacement={}, fraction={}, seed={}]",
                with_replacement, fraction, seed
            ),
            _ => String::new(),
        };
        let _ = write!(
            out,
            "{}{} {}{} partitions={}",
            prefix,
            self.operator_name(),
            self.id,
            detail,
            self.num_partitions
        );
        if let Some(note) = annotate(self.id) {
            let _ = write!(out, " [{}]", note);
        }
        out.push('\n');
        for parent in self.parents() {
            parent.render_into(out, depth + 1, annotate);
        }
    }
}

//==================================================================================
// Preconditions shared by the builders
//==================================================================================

pub(crate) fn check_partition_count(operation: &str, n: usize) -> Result<(), tambakError> {
    if n == 0 {
        return Err(tambakError::InvalidArgument(format!(
            "{} requires a positive partition count, got 0",
            operation
        )));
    }
    Ok(())
}

pub(crate) fn check_fraction(fraction: f64) -> Result<(), tambakError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(tambakError::InvalidArgument(format!(
            "sample fraction must be within [0.0, 1.0], got {}",
            fraction
        )));
    }
    Ok(())
}

/// Two schemas are interchangeable when their columns agree on name and type in
/// order. Nullability is ignored: it does not change the encoded row layout.
pub(crate) fn check_same_layout(
    operation: &str,
    left: &SchemaRef,
    right: &SchemaRef,
) -> Result<(), tambakError> {
    let same = left.fields().len() == right.fields().len()
        && left
            .fields()
            .iter()
            .zip(right.fields().iter())
            .all(|(l, r)| l.name() == r.name() && l.data_type() == r.data_type());
    if !same {
        return Err(tambakError::SchemaMismatch(format!(
            "{} needs identical column layouts, got {:?} and {:?}",
            operation,
            left.fields(),
            right.fields()
        )));
    }
    Ok(())
}

/// Re-labels `batch` with `schema`. The column layouts must already agree; a
/// nullable column moving under a non-nullable field must not contain nulls.
pub(crate) fn conform(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch, tambakError> {
    if batch.schema() == *schema {
        return Ok(batch.clone());
    }
    Ok(RecordBatch::try_new(schema.clone(), batch.columns().to_vec())?)
}

/// The schema of a concatenation: a column is nullable if it is nullable on
/// either side.
pub(crate) fn union_schema(left: &SchemaRef, right: &SchemaRef) -> SchemaRef {
    if left == right {
        return left.clone();
    }
    let fields: Vec<Field> = left
        .fields()
        .iter()
        .zip(right.fields().iter())
        .map(|(l, r)| l.as_ref().clone().with_nullable(l.is_nullable() || r.is_nullable()))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Splits `0..total` into `n` contiguous, near-equal ranges.
pub(crate) fn contiguous_ranges(total: usize, n: usize) -> Vec<Range<usize>> {
    (0..n).map(|i| (i * total / n)..((i + 1) * total / n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_ranges_cover_everything_once() {
        let ranges = contiguous_ranges(10, 3);
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);

        let ranges = contiguous_ranges(2, 4);
        let covered: Vec<usize> = ranges.into_iter().flatten().collect();
        assert_eq!(covered, vec![0, 1]);
    }

    #[test]
    fn test_check_fraction_bounds() {
        assert!(check_fraction(0.0).is_ok());
        assert!(check_fraction(1.0).is_ok());
        assert!(check_fraction(1.0001).is_err());
        assert!(check_fraction(-0.1).is_err());
        assert!(check_fraction(f64::NAN).is_err());
    }

    #[test]
    fn test_check_partition_count_rejects_zero() {
        assert!(matches!(
            check_partition_count("repartition", 0),
            Err(tambakError::InvalidArgument(msg)) if msg.contains("repartition")
        ));
        assert!(check_partition_count("coalesce", 1).is_ok());
    }
}
