use super::*;
use crate::impl_encodable;
use arrow::array::{Float64Array, Int32Array, Int64Array, StringArray};
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
struct Trade {
    symbol: String,
    quantity: i64,
    price: f64,
    note: Option<String>,
}

impl_encodable!(Trade {
    symbol: String,
    quantity: i64,
    price: f64,
    note: Option<String>,
});

#[test]
fn test_single_value_schema_uses_value_column() {
    let schema = <i32 as Encodable>::schema();
    assert_eq!(schema.fields().len(), 1);
    assert_eq!(schema.field(0).name(), VALUE_COLUMN);
    assert_eq!(schema.field(0).data_type(), &DataType::Int32);
    assert!(!schema.field(0).is_nullable());

    let optional = <Option<String> as Encodable>::schema();
    assert!(optional.field(0).is_nullable());
}

#[test]
fn test_struct_macro_encodes_one_column_per_field() {
    // 1. Arrange
    let trades = vec![
        Trade {
            symbol: "ACME".to_string(),
            quantity: 10,
            price: 12.5,
            note: None,
        },
        Trade {
            symbol: "INIT".to_string(),
            quantity: -3,
            price: 99.0,
            note: Some("late fill".to_string()),
        },
    ];

    // 2. Act
    let batch = Trade::encode_batch(trades.clone()).unwrap();

    // 3. Assert
    assert_eq!(batch.num_rows(), 2);
    let names: Vec<_> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(names, vec!["symbol", "quantity", "price", "note"]);
    let quantities = batch
        .column(1)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(quantities.values().to_vec(), vec![10, -3]);
    assert_eq!(batch.column(3).null_count(), 1);

    assert_eq!(Trade::decode_batch(&batch).unwrap(), trades);
}

#[test]
fn test_struct_decode_resolves_columns_by_name() {
    // Columns arrive in a different order than the struct declares them.
    let schema = Arc::new(Schema::new(vec![
        Field::new("price", DataType::Float64, false),
        Field::new("note", DataType::Utf8, true),
        Field::new("quantity", DataType::Int64, false),
        Field::new("symbol", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Float64Array::from(vec![1.0])),
            Arc::new(StringArray::from(vec![Some("x")])),
            Arc::new(Int64Array::from(vec![7])),
            Arc::new(StringArray::from(vec!["ZED"])),
        ],
    )
    .unwrap();

    let decoded = Trade::decode_batch(&batch).unwrap();
    assert_eq!(decoded[0].symbol, "ZED");
    assert_eq!(decoded[0].quantity, 7);
    assert_eq!(decoded[0].note.as_deref(), Some("x"));
}

#[test]
fn test_tuple_encoding_uses_positional_names() {
    let batch = <(i32, String)>::encode_batch(vec![(1, "a".into()), (2, "b".into())]).unwrap();
    assert_eq!(batch.schema().field(0).name(), "_1");
    assert_eq!(batch.schema().field(1).name(), "_2");

    let decoded = <(i32, String)>::decode_batch(&batch).unwrap();
    assert_eq!(decoded, vec![(1, "a".to_string()), (2, "b".to_string())]);

    let triple = <(u8, bool, Option<f32>)>::encode_batch(vec![(1, true, None)]).unwrap();
    assert_eq!(triple.num_columns(), 3);
    assert_eq!(
        <(u8, bool, Option<f32>)>::decode_batch(&triple).unwrap(),
        vec![(1, true, None)]
    );
}

#[test]
fn test_decoding_nulls_into_required_type_fails() {
    let schema = Arc::new(Schema::new(vec![Field::new("value", DataType::Int32, true)]));
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(Int32Array::from(vec![Some(1), None]))],
    )
    .unwrap();

    assert!(matches!(
        i32::decode_batch(&batch),
        Err(tambakError::Decoding(_))
    ));
    assert_eq!(
        <Option<i32>>::decode_batch(&batch).unwrap(),
        vec![Some(1), None]
    );
}

#[test]
fn test_decoding_wrong_column_type_fails() {
    let batch = i64::encode_batch(vec![1, 2, 3]).unwrap();
    let result = String::decode_batch(&batch);
    assert!(matches!(result, Err(tambakError::Decoding(msg)) if msg.contains("Utf8")));

    let result = Trade::decode_batch(&batch);
    assert!(matches!(result, Err(tambakError::Decoding(msg)) if msg.contains("symbol")));
}

#[test]
fn test_dates_are_stored_as_days_since_epoch() {
    let dates = vec![
        NaiveDate::from_ymd_opt(1970, 1, 2).unwrap(),
        NaiveDate::from_ymd_opt(1969, 12, 31).unwrap(),
    ];
    let batch = NaiveDate::encode_batch(dates.clone()).unwrap();

    let raw = batch
        .column(0)
        .as_any()
        .downcast_ref::<arrow::array::Date32Array>()
        .unwrap();
    assert_eq!(raw.values().to_vec(), vec![1, -1]);
    assert_eq!(NaiveDate::decode_batch(&batch).unwrap(), dates);
}

#[test]
fn test_empty_batches_round_trip() {
    let batch = Trade::encode_batch(Vec::new()).unwrap();
    assert_eq!(batch.num_rows(), 0);
    assert_eq!(batch.num_columns(), 4);
    assert!(Trade::decode_batch(&batch).unwrap().is_empty());
}
