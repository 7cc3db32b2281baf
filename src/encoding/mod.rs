//! The encoder evidence subsystem.
//!
//! A type may only flow through a `TypedCollection` if the compiler can prove it
//! maps to and from the engine's Arrow representation. That proof is the
//! [`Encodable`] bound: there is no runtime type inspection anywhere in the facade,
//! and a missing implementation is a compile error at the call site.
//!
//! Two layers exist:
//!
//! * [`ColumnEncodable`] maps a scalar type onto a single Arrow column.
//! * [`Encodable`] maps an element type onto a whole `RecordBatch`. Every column type
//!   is encodable on its own (one column named `value`), 2- and 3-tuples of column
//!   types use `_1`, `_2`, `_3`, and named structs use [`impl_encodable!`].

mod columns;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::error::tambakError;

/// Name of the only column of a single-value collection.
pub const VALUE_COLUMN: &str = "value";

/// A scalar type with a stable mapping onto one Arrow column.
pub trait ColumnEncodable: Sized + Send + Sync + 'static {
    /// The Arrow type of the column.
    fn data_type() -> DataType;

    /// Whether the column may contain nulls. Only `Option<_>` implementations say yes.
    fn nullable() -> bool {
        false
    }

    /// Builds a column from owned values.
    fn to_array(values: Vec<Self>) -> ArrayRef;

    /// Reads a column back. Fails on a type mismatch, or on nulls when `nullable()` is false.
    fn from_array(array: &dyn Array) -> Result<Vec<Self>, tambakError>;
}

/// Compile-time evidence that `Self` can be stored by the untyped engine.
///
/// The element encoding also defines equality for `distinct`, `intersect` and
/// `subtract`: two elements are equal exactly when their encoded rows are.
pub trait Encodable: Sized + Send + Sync + 'static {
    /// The schema every encoded batch of this type carries.
    fn schema() -> SchemaRef;

    /// Encodes a partition worth of elements.
    fn encode_batch(items: Vec<Self>) -> Result<RecordBatch, tambakError>;

    /// Decodes a batch produced by `encode_batch` (or any batch with a compatible schema).
    fn decode_batch(batch: &RecordBatch) -> Result<Vec<Self>, tambakError>;
}

/// Builds the schema field for a column type.
pub fn field<C: ColumnEncodable>(name: &str) -> Field {
    Field::new(name, C::data_type(), C::nullable())
}

/// Looks up a column by name, failing with a `Decoding` error if it is absent.
pub fn column_by_name<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, tambakError> {
    batch.column_by_name(name).ok_or_else(|| {
        tambakError::Decoding(format!(
            "column '{}' not found in batch with columns [{}]",
            name,
            batch
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })
}

fn single_column_schema<C: ColumnEncodable>() -> SchemaRef {
    Arc::new(Schema::new(vec![field::<C>(VALUE_COLUMN)]))
}

fn single_column(batch: &RecordBatch) -> Result<&ArrayRef, tambakError> {
    if batch.num_columns() != 1 {
        return Err(tambakError::Decoding(format!(
            "a single-value type needs exactly one column, found {}",
            batch.num_columns()
        )));
    }
    Ok(batch.column(0))
}

macro_rules! impl_value_encodable {
    ($($ty:ty),+ $(,)?) => {$(
        impl Encodable for $ty {
            fn schema() -> SchemaRef {
                single_column_schema::<$ty>()
            }

            fn encode_batch(items: Vec<Self>) -> Result<RecordBatch, tambakError> {
                let column = <$ty as ColumnEncodable>::to_array(items);
                Ok(RecordBatch::try_new(Self::schema(), vec![column])?)
            }

            fn decode_batch(batch: &RecordBatch) -> Result<Vec<Self>, tambakError> {
                <$ty as ColumnEncodable>::from_array(single_column(batch)?.as_ref())
            }
        }
    )+};
}

impl_value_encodable!(
    i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, bool, String, chrono::NaiveDate,
    Option<i8>, Option<i16>, Option<i32>, Option<i64>,
    Option<u8>, Option<u16>, Option<u32>, Option<u64>,
    Option<f32>, Option<f64>, Option<bool>, Option<String>, Option<chrono::NaiveDate>,
);

impl<A: ColumnEncodable, B: ColumnEncodable> Encodable for (A, B) {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![field::<A>("_1"), field::<B>("_2")]))
    }

    fn encode_batch(items: Vec<Self>) -> Result<RecordBatch, tambakError> {
        let (a, b): (Vec<A>, Vec<B>) = items.into_iter().unzip();
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![A::to_array(a), B::to_array(b)],
        )?)
    }

    fn decode_batch(batch: &RecordBatch) -> Result<Vec<Self>, tambakError> {
        let a = A::from_array(column_by_name(batch, "_1")?.as_ref())?;
        let b = B::from_array(column_by_name(batch, "_2")?.as_ref())?;
        Ok(a.into_iter().zip(b).collect())
    }
}

impl<A: ColumnEncodable, B: ColumnEncodable, C: ColumnEncodable> Encodable for (A, B, C) {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            field::<A>("_1"),
            field::<B>("_2"),
            field::<C>("_3"),
        ]))
    }

    fn encode_batch(items: Vec<Self>) -> Result<RecordBatch, tambakError> {
        let mut a = Vec::with_capacity(items.len());
        let mut b = Vec::with_capacity(items.len());
        let mut c = Vec::with_capacity(items.len());
        for (x, y, z) in items {
            a.push(x);
            b.push(y);
            c.push(z);
        }
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![A::to_array(a), B::to_array(b), C::to_array(c)],
        )?)
    }

    fn decode_batch(batch: &RecordBatch) -> Result<Vec<Self>, tambakError> {
        let a = A::from_array(column_by_name(batch, "_1")?.as_ref())?;
        let b = B::from_array(column_by_name(batch, "_2")?.as_ref())?;
        let c = C::from_array(column_by_name(batch, "_3")?.as_ref())?;
        Ok(a.into_iter()
            .zip(b)
            .zip(c)
            .map(|((x, y), z)| (x, y, z))
            .collect())
    }
}

/// Implements [`Encodable`] for a struct with named fields, one column per field.
///
/// Every field type must implement [`ColumnEncodable`]. The struct must not
/// implement `Drop`, since encoding moves each field out of its element.
///
/// ```
/// use tambak_dataset::impl_encodable;
///
/// struct Reading {
///     sensor: String,
///     value: f64,
///     flagged: Option<bool>,
/// }
///
/// impl_encodable!(Reading { sensor: String, value: f64, flagged: Option<bool> });
/// ```
#[macro_export]
macro_rules! impl_encodable {
    ($name:ident { $($field:ident : $ty:ty),+ $(,)? }) => {
        impl $crate::encoding::Encodable for $name {
            fn schema() -> $crate::arrow::datatypes::SchemaRef {
                ::std::sync::Arc::new($crate::arrow::datatypes::Schema::new(vec![
                    $( $crate::encoding::field::<$ty>(stringify!($field)) ),+
                ]))
            }

            fn encode_batch(
                items: Vec<Self>,
            ) -> Result<$crate::arrow::record_batch::RecordBatch, $crate::tambakError> {
                $( let mut $field: Vec<$ty> = Vec::with_capacity(items.len()); )+
                for item in items {
                    $( $field.push(item.$field); )+
                }
                let columns = vec![
                    $( <$ty as $crate::encoding::ColumnEncodable>::to_array($field) ),+
                ];
                Ok($crate::arrow::record_batch::RecordBatch::try_new(
                    <Self as $crate::encoding::Encodable>::schema(),
                    columns,
                )?)
            }

            fn decode_batch(
                batch: &$crate::arrow::record_batch::RecordBatch,
            ) -> Result<Vec<Self>, $crate::tambakError> {
                $(
                    let mut $field = <$ty as $crate::encoding::ColumnEncodable>::from_array(
                        $crate::encoding::column_by_name(batch, stringify!($field))?.as_ref(),
                    )?
                    .into_iter();
                )+
                let mut items = Vec::with_capacity(batch.num_rows());
                for _ in 0..batch.num_rows() {
                    items.push($name {
                        $(
                            $field: $field.next().ok_or_else(|| {
                                $crate::tambakError::Decoding(format!(
                                    "column '{}' is shorter than its batch",
                                    stringify!($field)
                                ))
                            })?,
                        )+
                    });
                }
                Ok(items)
            }
        }
    };
}
