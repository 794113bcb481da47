use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType, Date32Type, Int64Type, TimeUnit, TimestampMicrosecondType};
use warehouse_loader::{ChunkTransformer, ColumnType, ColumnTypeMap, TextBatch, normalize_column_name};

fn text(headers: &[&str], rows: &[&[&str]]) -> TextBatch {
    let mut batch = TextBatch::new(headers.iter().map(ToString::to_string).collect());
    for row in rows {
        for (column, value) in batch.columns.iter_mut().zip(row.iter()) {
            column.push((*value).to_string());
        }
    }
    batch
}

fn types(columns: &[(&str, ColumnType)]) -> ColumnTypeMap {
    let mut map = ColumnTypeMap::new();
    for (name, column_type) in columns {
        map.push(*name, *column_type);
    }
    map
}

#[test]
fn null_sentinels_become_real_nulls() -> anyhow::Result<()> {
    let transformer = ChunkTransformer::new(types(&[
        ("id", ColumnType::Int64),
        ("name", ColumnType::String),
        ("seen", ColumnType::DateTime),
    ]));
    let raw = text(
        &["id", "name", "seen"],
        &[&["NULL", "null", ""], &["", "", " "], &[" ", "NaN", "NaT"], &["n/a", "None", "<NA>"]],
    );
    let chunk = transformer.transform(3, raw)?.expect("non-empty chunk");
    assert_eq!(chunk.index, 3);
    assert_eq!(chunk.num_rows(), 4);
    for column in chunk.batch.columns() {
        assert_eq!(column.null_count(), 4);
    }
    Ok(())
}

#[test]
fn names_are_normalized_and_types_applied() -> anyhow::Result<()> {
    let transformer = ChunkTransformer::new(types(&[
        ("order id", ColumnType::Int64),
        ("Shipped On", ColumnType::Date),
        ("created-at", ColumnType::DateTime),
        ("price", ColumnType::Float64),
    ]));
    let raw = text(
        &["order id", "Shipped On", "created-at", "price"],
        &[
            &["7", "1970-01-02", "1970-01-01 00:00:01", "9.5"],
            &["oops", "not a date", "2024-01-01T00:00:00.5", "1"],
        ],
    );
    let chunk = transformer.transform(0, raw)?.expect("non-empty chunk");
    let schema = chunk.batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, ["ORDER_ID", "SHIPPED_ON", "CREATED_AT", "PRICE"]);
    assert_eq!(schema.field(0).data_type(), &DataType::Int64);
    assert_eq!(schema.field(1).data_type(), &DataType::Date32);
    assert_eq!(
        schema.field(2).data_type(),
        &DataType::Timestamp(TimeUnit::Microsecond, None)
    );
    assert_eq!(schema.field(3).data_type(), &DataType::Float64);

    let ids = chunk.batch.column(0).as_primitive::<Int64Type>();
    assert_eq!(ids.value(0), 7);
    assert!(ids.is_null(1));

    let days = chunk.batch.column(1).as_primitive::<Date32Type>();
    assert_eq!(days.value(0), 1);
    assert!(days.is_null(1));

    let micros = chunk.batch.column(2).as_primitive::<TimestampMicrosecondType>();
    assert_eq!(micros.value(0), 1_000_000);
    assert_eq!(micros.value(1), 1_704_067_200_500_000);
    Ok(())
}

#[test]
fn fractional_value_keeps_int_column_as_text() -> anyhow::Result<()> {
    let transformer = ChunkTransformer::new(types(&[("id", ColumnType::Int64), ("n", ColumnType::Int64)]));
    let raw = text(&["id", "n"], &[&["1", "1"], &["2.5", "2"], &["NULL", "x"]]);
    let chunk = transformer.transform(1, raw)?.expect("non-empty chunk");

    assert_eq!(chunk.batch.schema().field(0).data_type(), &DataType::Utf8);
    let ids = chunk.batch.column(0).as_string::<i32>();
    assert_eq!(ids.value(0), "1");
    assert_eq!(ids.value(1), "2.5");
    assert!(ids.is_null(2));

    assert_eq!(chunk.batch.schema().field(1).data_type(), &DataType::Int64);
    assert!(chunk.batch.column(1).is_null(2));
    Ok(())
}

#[test]
fn out_of_range_integer_keeps_int_column_as_text() -> anyhow::Result<()> {
    let transformer = ChunkTransformer::new(types(&[("id", ColumnType::Int64)]));
    let raw = text(&["id"], &[&["1"], &["9223372036854775808"]]);
    let chunk = transformer.transform(0, raw)?.expect("non-empty chunk");
    assert_eq!(chunk.batch.schema().field(0).data_type(), &DataType::Utf8);
    Ok(())
}

#[test]
fn empty_chunk_is_none() -> anyhow::Result<()> {
    let transformer = ChunkTransformer::new(types(&[("id", ColumnType::Int64)]));
    assert!(transformer.transform(4, text(&["id"], &[]))?.is_none());
    Ok(())
}

#[test]
fn header_mismatch_fails_the_chunk() {
    let transformer = ChunkTransformer::new(types(&[("id", ColumnType::Int64), ("name", ColumnType::String)]));
    assert!(transformer.transform(0, text(&["id"], &[&["1"]])).is_err());
    assert!(transformer.transform(0, text(&["id", "title"], &[&["1", "x"]])).is_err());
}

#[test]
fn normalization_is_idempotent_for_non_ascii_names() {
    assert_eq!(normalize_column_name("ǰ_code"), "J_CODE");
    assert_eq!(normalize_column_name("Straße Nr."), "STRASSE_NR");
    assert_eq!(normalize_column_name("ﬁle name"), "FILE_NAME");
    assert_eq!(normalize_column_name("preço unitário"), "PREÇO_UNITÁRIO");

    for name in [
        "ǰ_code",
        "ΐ valor",
        "ǅemal",
        "Straße Nr.",
        "ﬁle name",
        "preço unitário",
        "número-do-CPF",
        "  __x__  ",
        "Ἀθῆναι",
    ] {
        let once = normalize_column_name(name);
        assert_eq!(normalize_column_name(&once), once, "normalizing {name:?} twice");
    }
}
