// In: src/dataset/generic.rs

use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::json::writer::JsonArray;
use arrow::json::WriterBuilder;
use arrow::record_batch::RecordBatch;
use serde_json::{Map, Value};

use crate::dataset::display::DEFAULT_TRUNCATE_WIDTH;
use crate::dataset::typed::{show_raw, TypedCollection};
use crate::encoding::Encodable;
use crate::engine::{PartitionFn, RawCollection};
use crate::error::tambakError;

/// A collection whose element type is only known at runtime, through its schema.
///
/// Rows can be inspected as JSON objects, printed, or re-typed with
/// [`GenericView::as_typed`] once the caller knows what they hold.
#[derive(Clone, Debug)]
pub struct GenericView {
    raw: RawCollection,
}

impl GenericView {
    pub(crate) fn new(raw: RawCollection) -> Self {
        Self { raw }
    }

    pub fn schema(&self) -> SchemaRef {
        self.raw.schema()
    }

    /// The schema as JSON, in `arrow-schema`'s serde representation.
    pub fn schema_json(&self) -> Result<String, tambakError> {
        Ok(serde_json::to_string(self.raw.schema().as_ref())?)
    }

    pub fn columns(&self) -> Vec<String> {
        self.raw
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn num_partitions(&self) -> usize {
        self.raw.num_partitions()
    }

    pub fn count(&self) -> Result<i64, tambakError> {
        self.raw.count()
    }

    /// Every row as a JSON object keyed by column name. Nulls are kept as `null`.
    pub fn collect_rows(&self) -> Result<Vec<Map<String, Value>>, tambakError> {
        let batches = self.raw.evaluate()?;
        let refs: Vec<&RecordBatch> = batches.iter().filter(|b| b.num_rows() > 0).collect();
        if refs.is_empty() {
            return Ok(Vec::new());
        }

        let mut writer = WriterBuilder::new()
            .with_explicit_nulls(true)
            .build::<_, JsonArray>(Vec::new());
        writer.write_batches(&refs)?;
        writer.finish()?;
        Ok(serde_json::from_slice(&writer.into_inner())?)
    }

    pub fn show(&self, num_rows: usize, truncate: bool) -> Result<(), tambakError> {
        let width = if truncate { DEFAULT_TRUNCATE_WIDTH } else { 0 };
        print!("{}", self.show_string(num_rows, width)?);
        Ok(())
    }

    pub fn show_string(&self, num_rows: usize, truncate_width: usize) -> Result<String, tambakError> {
        show_raw(&self.raw, num_rows, truncate_width)
    }

    pub fn to_raw_collection(&self) -> RawCollection {
        self.raw.clone()
    }

    /// Views the rows as `U`.
    ///
    /// Columns are matched to `U`'s fields by name. A single-field `U` over a
    /// single-column view takes that column whatever it is called. Matched columns
    /// must have exactly the field's Arrow type; anything else is a
    /// `SchemaMismatch`, reported here rather than when the data is read.
    pub fn as_typed<U: Encodable>(&self) -> Result<TypedCollection<U>, tambakError> {
        let source = self.raw.schema();
        let target = U::schema();
        let (indices, projected) = resolve_projection(&source, &target)?;

        let identity = indices.iter().enumerate().all(|(i, &idx)| i == idx)
            && indices.len() == source.fields().len()
            && projected == source;
        if identity {
            return Ok(TypedCollection::from_raw(self.raw.clone()));
        }

        let schema = Arc::clone(&projected);
        let project: PartitionFn = Arc::new(
            move |_idx: usize, batch: RecordBatch| -> Result<RecordBatch, tambakError> {
                let columns = indices.iter().map(|&i| Arc::clone(batch.column(i))).collect();
                Ok(RecordBatch::try_new(Arc::clone(&schema), columns)?)
            },
        );
        Ok(TypedCollection::from_raw(
            self.raw.map_partitions("Project", projected, project),
        ))
    }
}

/// Maps every field of `target` to a column of `source`. The projected schema
/// takes names and types from `target` and keeps the source's nullability, so
/// nulls reach the decoder and are rejected there.
fn resolve_projection(
    source: &SchemaRef,
    target: &SchemaRef,
) -> Result<(Vec<usize>, SchemaRef), tambakError> {
    let mut indices = Vec::with_capacity(target.fields().len());
    let mut fields = Vec::with_capacity(target.fields().len());

    for wanted in target.fields() {
        let index = if target.fields().len() == 1 && source.fields().len() == 1 {
            0
        } else {
            source.index_of(wanted.name()).map_err(|_| {
                tambakError::SchemaMismatch(format!(
                    "no column named '{}' among [{}]",
                    wanted.name(),
                    source
                        .fields()
                        .iter()
                        .map(|f| f.name().as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })?
        };
        let found = source.field(index);
        if found.data_type() != wanted.data_type() {
            return Err(tambakError::SchemaMismatch(format!(
                "column '{}' has type {} but '{}' needs {}",
                found.name(),
                found.data_type(),
                wanted.name(),
                wanted.data_type()
            )));
        }
        indices.push(index);
        fields.push(Field::new(
            wanted.name(),
            wanted.data_type().clone(),
            found.is_nullable(),
        ));
    }
    Ok((indices, Arc::new(Schema::new(fields))))
}
