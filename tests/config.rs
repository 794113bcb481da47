use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use warehouse_loader::testing::{TempCsv, test_config};
use warehouse_loader::{
    DegradePolicy, LoadError, Loader, LoaderConfig, MemoryWarehouse, SinkErrorKind, TableRef,
};

#[test]
fn json_config_overrides_defaults() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("load.json");
    fs::write(
        &path,
        r#"{
            "source_path": "exports/calls.csv",
            "table": {"catalog": "proj", "dataset": "raw", "table": "calls"},
            "chunk_rows": 1000,
            "degrade_policy": "replay_all",
            "delimiter": ";"
        }"#,
    )?;

    let config = LoaderConfig::from_json_file(&path)?;
    assert_eq!(config.chunk_rows, 1000);
    assert_eq!(config.workers, 4);
    assert_eq!(config.location, "US");
    assert_eq!(config.degrade_policy, DegradePolicy::ReplayAll);
    assert_eq!(config.delimiter_byte()?, b';');
    assert_eq!(config.table.to_string(), "proj.raw.calls");
    config.validate()?;
    Ok(())
}

#[test]
fn malformed_json_names_the_file() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json")?;
    let err = LoaderConfig::from_json_file(&path).expect_err("malformed");
    assert!(format!("{err:#}").contains("broken.json"));
    Ok(())
}

#[test]
fn non_ascii_delimiter_is_rejected() {
    let mut config = LoaderConfig::new("a.csv", TableRef::new("c", "d", "t"));
    config.delimiter = '§';
    assert!(matches!(config.validate(), Err(LoadError::Config(_))));
}

#[test]
fn incomplete_table_is_rejected() {
    let config = LoaderConfig::new("a.csv", TableRef::new("c", " ", "t"));
    assert!(matches!(config.validate(), Err(LoadError::Config(_))));
}

#[test]
fn table_refs_parse_from_dotted_names() {
    let table: TableRef = "proj.raw.calls".parse().expect("three parts");
    assert_eq!(table, TableRef::new("proj", "raw", "calls"));
    assert_eq!(table.dataset_ref().to_string(), "proj.raw");

    for bad in ["proj.raw", "a.b.c.d", "a..c", ""] {
        let err = bad.parse::<TableRef>().expect_err(bad);
        assert_eq!(err.kind, SinkErrorKind::InvalidInput);
    }
}

#[test]
fn degrade_policy_parses_either_separator() {
    assert_eq!("replay-all".parse::<DegradePolicy>(), Ok(DegradePolicy::ReplayAll));
    assert_eq!("replay_all".parse::<DegradePolicy>(), Ok(DegradePolicy::ReplayAll));
    assert_eq!("abort".parse::<DegradePolicy>(), Ok(DegradePolicy::Abort));
    assert!("retry".parse::<DegradePolicy>().is_err());
    assert_eq!(DegradePolicy::default(), DegradePolicy::ReplayAll);
}

#[test]
fn scratch_dir_must_not_contain_the_source() -> anyhow::Result<()> {
    let csv = TempCsv::from_rows(&["id"], &[vec!["1"], vec!["2"], vec!["3"]])?;
    let table = TableRef::new("c", "d", "t");

    let mut config = test_config(&csv, table.clone());
    config.scratch_dir = csv.dir().to_path_buf();
    config.cache_threshold_rows = 1;
    assert!(matches!(config.validate(), Err(LoadError::Config(_))));

    let failure = Loader::new(config, Arc::new(MemoryWarehouse::new()))
        .run()
        .expect_err("scratch over the source dir");
    assert!(matches!(failure.error, LoadError::Config(_)));
    assert!(csv.path().is_file(), "source survives the rejected run");

    let mut config = test_config(&csv, table);
    config.scratch_dir = csv.dir().join("nested").join("cache");
    config.validate()?;
    Ok(())
}
