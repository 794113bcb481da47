use std::sync::Arc;
use warehouse_loader::sink::AppendKind;
use warehouse_loader::{
    ChunkBatch, ChunkTransformer, ColumnType, ColumnTypeMap, DegradePolicy, MemoryWarehouse,
    TableLifecycle, TableRef, TableSchema, TextBatch, UploadSequencer, WarehouseSink,
};

fn types() -> ColumnTypeMap {
    let mut map = ColumnTypeMap::new();
    map.push("id", ColumnType::Int64);
    map.push("amount", ColumnType::Float64);
    map
}

fn chunk(index: usize, rows: &[[&str; 2]]) -> anyhow::Result<Option<ChunkBatch>> {
    let mut raw = TextBatch::new(vec!["id".to_string(), "amount".to_string()]);
    for row in rows {
        raw.columns[0].push(row[0].to_string());
        raw.columns[1].push(row[1].to_string());
    }
    ChunkTransformer::new(types()).transform(index, raw)
}

fn setup(warehouse: &MemoryWarehouse) -> anyhow::Result<(TableLifecycle, TableSchema)> {
    let lifecycle = TableLifecycle::new(
        Arc::new(warehouse.clone()),
        TableRef::new("c", "d", "t"),
        "EU",
    );
    let schema = TableSchema::typed(&types());
    lifecycle.ensure_dataset()?;
    lifecycle.recreate_table(&schema)?;
    Ok((lifecycle, schema))
}

#[test]
fn empty_chunks_advance_without_appending() -> anyhow::Result<()> {
    let warehouse = MemoryWarehouse::new();
    let (lifecycle, schema) = setup(&warehouse)?;
    let results = vec![
        chunk(0, &[["1", "1.5"], ["2", "2.5"]])?,
        chunk(1, &[])?,
        chunk(2, &[["3", "3.5"]])?,
    ];
    assert!(results[1].is_none());

    let mut sequencer = UploadSequencer::new(&lifecycle, schema, DegradePolicy::ReplayAll);
    sequencer.run(&results)?;
    let summary = sequencer.summary();
    assert_eq!(summary.chunks_appended, 2);
    assert_eq!(summary.chunks_empty, 1);
    assert_eq!(summary.rows_appended, 3);
    assert_eq!(summary.degraded_at, None);
    assert!(!sequencer.is_degraded());
    assert_eq!(lifecycle.final_stats()?.num_rows, 3);
    Ok(())
}

#[test]
fn replay_skips_empty_chunks_too() -> anyhow::Result<()> {
    let warehouse = MemoryWarehouse::new();
    let (lifecycle, schema) = setup(&warehouse)?;
    let results = vec![
        chunk(0, &[["1", "1.5"]])?,
        chunk(1, &[])?,
        chunk(2, &[["2", "2.5"]])?,
        chunk(3, &[["3", "x"]])?,
    ];
    warehouse.fail_typed_append_at(1);

    let mut sequencer = UploadSequencer::new(&lifecycle, schema, DegradePolicy::ReplayAll);
    sequencer.run(&results)?;
    let summary = sequencer.summary().clone();
    assert_eq!(summary.degraded_at, Some(2));
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.chunks_appended, 3);
    assert_eq!(summary.chunks_empty, 1);

    let kinds: Vec<AppendKind> = warehouse.appends().iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        [AppendKind::Typed, AppendKind::Text, AppendKind::Text, AppendKind::Text]
    );
    let rows = warehouse.rows(lifecycle.table()).expect("table exists");
    assert_eq!(
        rows,
        vec![
            vec![Some("1".to_string()), Some("1.5".to_string())],
            vec![Some("2".to_string()), Some("2.5".to_string())],
            vec![Some("3".to_string()), None],
        ]
    );
    Ok(())
}

#[test]
fn lifecycle_treats_missing_table_as_dropped() -> anyhow::Result<()> {
    let warehouse = MemoryWarehouse::new();
    let lifecycle = TableLifecycle::new(
        Arc::new(warehouse.clone()),
        TableRef::new("c", "d", "never_created"),
        "EU",
    );
    lifecycle.ensure_dataset()?;
    lifecycle.ensure_dataset()?;
    lifecycle.drop_table()?;
    assert!(!warehouse.table_exists(lifecycle.table())?);
    assert_eq!(
        warehouse.dataset_location(&lifecycle.table().dataset_ref()).as_deref(),
        Some("EU")
    );
    Ok(())
}
