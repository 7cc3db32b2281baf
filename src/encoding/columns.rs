//! `ColumnEncodable` implementations for the scalar types the engine stores natively.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Date32Array, PrimitiveArray, StringArray};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use chrono::NaiveDate;

use super::ColumnEncodable;
use crate::error::tambakError;

fn downcast<'a, A: Array + 'static>(
    array: &'a dyn Array,
    expected: &DataType,
) -> Result<&'a A, tambakError> {
    array.as_any().downcast_ref::<A>().ok_or_else(|| {
        tambakError::Decoding(format!(
            "expected a {} column, found {}",
            expected,
            array.data_type()
        ))
    })
}

fn reject_nulls(array: &dyn Array) -> Result<(), tambakError> {
    if array.null_count() > 0 {
        return Err(tambakError::Decoding(format!(
            "{} column holds {} null(s) but the target type is not optional",
            array.data_type(),
            array.null_count()
        )));
    }
    Ok(())
}

//==================================================================================
// 1. Primitive numeric columns
//==================================================================================

macro_rules! impl_primitive_column {
    ($($native:ty => $arrow_ty:ty),+ $(,)?) => {$(
        impl ColumnEncodable for $native {
            fn data_type() -> DataType {
                <$arrow_ty as ArrowPrimitiveType>::DATA_TYPE
            }

            fn to_array(values: Vec<Self>) -> ArrayRef {
                Arc::new(PrimitiveArray::<$arrow_ty>::from_iter_values(values))
            }

            fn from_array(array: &dyn Array) -> Result<Vec<Self>, tambakError> {
                let typed = downcast::<PrimitiveArray<$arrow_ty>>(array, &Self::data_type())?;
                reject_nulls(array)?;
                Ok(typed.values().to_vec())
            }
        }

        impl ColumnEncodable for Option<$native> {
            fn data_type() -> DataType {
                <$arrow_ty as ArrowPrimitiveType>::DATA_TYPE
            }

            fn nullable() -> bool {
                true
            }

            fn to_array(values: Vec<Self>) -> ArrayRef {
                Arc::new(values.into_iter().collect::<PrimitiveArray<$arrow_ty>>())
            }

            fn from_array(array: &dyn Array) -> Result<Vec<Self>, tambakError> {
                let typed = downcast::<PrimitiveArray<$arrow_ty>>(array, &Self::data_type())?;
                Ok(typed.iter().collect())
            }
        }
    )+};
}

impl_primitive_column!(
    i8 => Int8Type,
    i16 => Int16Type,
    i32 => Int32Type,
    i64 => Int64Type,
    u8 => UInt8Type,
    u16 => UInt16Type,
    u32 => UInt32Type,
    u64 => UInt64Type,
    f32 => Float32Type,
    f64 => Float64Type,
);

//==================================================================================
// 2. Booleans and strings
//==================================================================================

impl ColumnEncodable for bool {
    fn data_type() -> DataType {
        DataType::Boolean
    }

    fn to_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(BooleanArray::from(values))
    }

    fn from_array(array: &dyn Array) -> Result<Vec<Self>, tambakError> {
        let typed = downcast::<BooleanArray>(array, &DataType::Boolean)?;
        reject_nulls(array)?;
        Ok((0..typed.len()).map(|i| typed.value(i)).collect())
    }
}

impl ColumnEncodable for Option<bool> {
    fn data_type() -> DataType {
        DataType::Boolean
    }

    fn nullable() -> bool {
        true
    }

    fn to_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(BooleanArray::from(values))
    }

    fn from_array(array: &dyn Array) -> Result<Vec<Self>, tambakError> {
        let typed = downcast::<BooleanArray>(array, &DataType::Boolean)?;
        Ok(typed.iter().collect())
    }
}

impl ColumnEncodable for String {
    fn data_type() -> DataType {
        DataType::Utf8
    }

    fn to_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(StringArray::from_iter_values(values))
    }

    fn from_array(array: &dyn Array) -> Result<Vec<Self>, tambakError> {
        let typed = downcast::<StringArray>(array, &DataType::Utf8)?;
        reject_nulls(array)?;
        Ok((0..typed.len()).map(|i| typed.value(i).to_owned()).collect())
    }
}

impl ColumnEncodable for Option<String> {
    fn data_type() -> DataType {
        DataType::Utf8
    }

    fn nullable() -> bool {
        true
    }

    fn to_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(values.into_iter().collect::<StringArray>())
    }

    fn from_array(array: &dyn Array) -> Result<Vec<Self>, tambakError> {
        let typed = downcast::<StringArray>(array, &DataType::Utf8)?;
        Ok(typed.iter().map(|v| v.map(str::to_owned)).collect())
    }
}

//==================================================================================
// 3. Calendar dates (Arrow Date32: days since the Unix epoch)
//==================================================================================

fn unix_epoch() -> NaiveDate {
    NaiveDate::default()
}

fn date_to_days(date: NaiveDate) -> i32 {
    date.signed_duration_since(unix_epoch()).num_days() as i32
}

fn days_to_date(days: i32) -> Result<NaiveDate, tambakError> {
    unix_epoch()
        .checked_add_signed(chrono::Duration::days(i64::from(days)))
        .ok_or_else(|| {
            tambakError::Decoding(format!("{} days since epoch is not a valid date", days))
        })
}

impl ColumnEncodable for NaiveDate {
    fn data_type() -> DataType {
        DataType::Date32
    }

    fn to_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(Date32Array::from_iter_values(
            values.into_iter().map(date_to_days),
        ))
    }

    fn from_array(array: &dyn Array) -> Result<Vec<Self>, tambakError> {
        let typed = downcast::<Date32Array>(array, &DataType::Date32)?;
        reject_nulls(array)?;
        typed.values().iter().map(|&d| days_to_date(d)).collect()
    }
}

impl ColumnEncodable for Option<NaiveDate> {
    fn data_type() -> DataType {
        DataType::Date32
    }

    fn nullable() -> bool {
        true
    }

    fn to_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(
            values
                .into_iter()
                .map(|v| v.map(date_to_days))
                .collect::<Date32Array>(),
        )
    }

    fn from_array(array: &dyn Array) -> Result<Vec<Self>, tambakError> {
        let typed = downcast::<Date32Array>(array, &DataType::Date32)?;
        typed
            .iter()
            .map(|v| v.map(days_to_date).transpose())
            .collect()
    }
}
