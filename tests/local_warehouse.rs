use arrow::array::{Array, AsArray};
use arrow::datatypes::Int64Type;
use std::sync::Arc;
use tempfile::TempDir;
use warehouse_loader::fallback::{fallback_dialect, stage_batch};
use warehouse_loader::testing::{TempCsv, test_config};
use warehouse_loader::{
    ChunkTransformer, ColumnType, ColumnTypeMap, LocalWarehouse, Loader, SinkErrorKind, TableRef,
    TableSchema, TextBatch, WarehouseSink,
};

fn source() -> anyhow::Result<TempCsv> {
    TempCsv::from_rows(
        &["id", "comment"],
        &[
            vec!["1", "first"],
            vec!["2", "has, comma"],
            vec!["3", "has \"quotes\""],
            vec!["4", "line\nbreak"],
            vec!["5", "NULL"],
        ],
    )
}

#[test]
fn loader_writes_one_part_per_chunk() -> anyhow::Result<()> {
    let csv = source()?;
    let root = TempDir::new()?;
    let warehouse = LocalWarehouse::open(root.path())?;
    let table = TableRef::new("local", "raw", "comments");
    let mut config = test_config(&csv, table.clone());
    config.chunk_rows = 2;

    for _ in 0..2 {
        let report = Loader::new(config.clone(), Arc::new(warehouse.clone())).run()?;
        assert_eq!(report.stats.num_rows, 5);
        assert!(report.stats.num_bytes > 0);
        assert_eq!(warehouse.parts(&table)?.len(), 3);
    }

    let schema = warehouse.schema(&table)?;
    assert_eq!(schema.fields[0].column_type, ColumnType::Int64);
    assert_eq!(schema.fields[1].column_type, ColumnType::String);

    let batches = warehouse.read_batches(&table)?;
    let ids: Vec<i64> = batches
        .iter()
        .flat_map(|b| b.column(0).as_primitive::<Int64Type>().values().to_vec())
        .collect();
    assert_eq!(ids, [1, 2, 3, 4, 5]);
    let last = batches.last().expect("three parts");
    assert!(last.column(1).is_null(0));
    Ok(())
}

#[test]
fn staged_text_loads_into_string_table() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let warehouse = LocalWarehouse::open(root.path())?;
    let table = TableRef::new("local", "raw", "degraded");

    let mut types = ColumnTypeMap::new();
    types.push("id", ColumnType::Int64);
    types.push("comment", ColumnType::String);
    let mut raw = TextBatch::new(vec!["id".to_string(), "comment".to_string()]);
    for (id, comment) in [("7", "tab\there"), ("8", "back\\slash \"q\""), ("", "multi\r\nline")] {
        raw.columns[0].push(id.to_string());
        raw.columns[1].push(comment.to_string());
    }
    let chunk = ChunkTransformer::new(types.clone())
        .transform(0, raw)?
        .expect("non-empty chunk");

    warehouse.create_dataset(&table.dataset_ref(), "EU")?;
    warehouse.create_table(&table, &TableSchema::typed(&types).degraded())?;
    let staged = stage_batch(&chunk.batch)?;
    warehouse.append_text_file(&table, staged.path(), &fallback_dialect())?;

    assert_eq!(warehouse.table_stats(&table)?.num_rows, 3);
    let batches = warehouse.read_batches(&table)?;
    let ids = batches[0].column(0).as_string::<i32>();
    let comments = batches[0].column(1).as_string::<i32>();
    assert_eq!(ids.value(0), "7");
    assert!(ids.is_null(2));
    assert_eq!(comments.value(0), "tab\there");
    assert_eq!(comments.value(1), "back\\slash \"q\"");
    assert_eq!(comments.value(2), "multi line");
    Ok(())
}

#[test]
fn typed_append_with_wrong_schema_is_rejected() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let warehouse = LocalWarehouse::open(root.path())?;
    let table = TableRef::new("local", "raw", "strict");

    let mut types = ColumnTypeMap::new();
    types.push("id", ColumnType::Int64);
    warehouse.create_dataset(&table.dataset_ref(), "US")?;
    warehouse.create_table(&table, &TableSchema::typed(&types))?;

    let mut raw = TextBatch::new(vec!["id".to_string()]);
    raw.columns[0].push("1.5".to_string());
    let chunk = ChunkTransformer::new(types).transform(0, raw)?.expect("non-empty chunk");

    let err = warehouse.append_batch(&table, &chunk.batch).expect_err("utf8 into INT64");
    assert_eq!(err.kind, SinkErrorKind::SchemaMismatch);
    assert!(warehouse.parts(&table)?.is_empty());
    Ok(())
}

#[test]
fn missing_objects_report_not_found() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let warehouse = LocalWarehouse::open(root.path())?;
    let table = TableRef::new("local", "raw", "absent");

    assert!(!warehouse.dataset_exists(&table.dataset_ref())?);
    assert!(!warehouse.table_exists(&table)?);
    assert!(warehouse.delete_table(&table).expect_err("absent").is_not_found());
    assert!(warehouse.table_stats(&table).expect_err("absent").is_not_found());

    let escape = TableRef::new("local", "..", "t");
    let err = warehouse.table_exists(&escape).expect_err("path escape");
    assert_eq!(err.kind, SinkErrorKind::InvalidInput);
    Ok(())
}
