use warehouse_loader::schema::SchemaError;
use warehouse_loader::{ColumnType, TableSchema, TextBatch, TypeInferencer};

fn sample(headers: &[&str], rows: &[&[&str]]) -> TextBatch {
    let mut batch = TextBatch::new(headers.iter().map(ToString::to_string).collect());
    for row in rows {
        for (column, value) in batch.columns.iter_mut().zip(row.iter()) {
            column.push((*value).to_string());
        }
    }
    batch
}

fn infer_one(values: &[&str]) -> ColumnType {
    TypeInferencer::default().infer_column("VALUE", values.iter().copied())
}

#[test]
fn int64_bound_is_exact() {
    assert_eq!(infer_one(&["1", "9223372036854775807"]), ColumnType::Int64);
    assert_eq!(infer_one(&["1", "9223372036854775808"]), ColumnType::String);
    assert_eq!(infer_one(&["-9223372036854775807"]), ColumnType::Int64);
    // the bound is on magnitude, so i64::MIN is kept as text
    assert_eq!(infer_one(&["-9223372036854775808"]), ColumnType::String);
    assert_eq!(infer_one(&["1", "-9223372036854775808"]), ColumnType::String);
}

#[test]
fn any_fraction_makes_float() {
    assert_eq!(infer_one(&["1", "2.5", "3"]), ColumnType::Float64);
    assert_eq!(infer_one(&["1.0", "2"]), ColumnType::Int64);
    assert_eq!(infer_one(&["1e3", "7"]), ColumnType::Int64);
    assert_eq!(infer_one(&["0.1", "99999999999999999999"]), ColumnType::Float64);
}

#[test]
fn nulls_are_ignored_and_all_null_is_string() {
    assert_eq!(infer_one(&["NULL", "", " ", "nan"]), ColumnType::String);
    assert_eq!(infer_one(&[]), ColumnType::String);
    assert_eq!(infer_one(&["NULL", "42", "", "None"]), ColumnType::Int64);
}

#[test]
fn midnight_only_timestamps_are_dates() {
    assert_eq!(infer_one(&["2024-01-01", "2024-02-03 00:00:00"]), ColumnType::Date);
    assert_eq!(infer_one(&["2024-01-01", "2024-01-01 10:00"]), ColumnType::DateTime);
    assert_eq!(infer_one(&["31/12/2023", "01/01/2024"]), ColumnType::Date);
    assert_eq!(infer_one(&["2024-01-01", "soon"]), ColumnType::String);
}

#[test]
fn numeric_wins_over_timestamp() {
    assert_eq!(infer_one(&["20240101", "20240102"]), ColumnType::Int64);
}

#[test]
fn forced_terms_keep_identifiers_textual() {
    let batch = sample(
        &["CPF do cliente", "Telefone", "valor"],
        &[&["12345678901", "11999990000", "10"], &["98765432100", "11988880000", "20"]],
    );
    let types = TypeInferencer::default().infer(&batch);
    assert_eq!(types.get("CPF_DO_CLIENTE"), Some(ColumnType::String));
    assert_eq!(types.get("TELEFONE"), Some(ColumnType::String));
    assert_eq!(types.get("VALOR"), Some(ColumnType::Int64));

    let custom = TypeInferencer::new(["zip code"]);
    assert_eq!(custom.infer_column("ZIP_CODE_1", ["01310100"]), ColumnType::String);
    assert_eq!(custom.infer_column("TELEFONE", ["11999990000"]), ColumnType::Int64);
}

#[test]
fn inference_is_deterministic() {
    let batch = sample(
        &["id", "amount", "created", "note"],
        &[
            &["1", "1.5", "2024-01-01 08:00:00", "x"],
            &["2", "", "2024-01-02 09:30:00", "NULL"],
            &["3", "7", "NaT", "y"],
        ],
    );
    let first = TypeInferencer::default().infer(&batch);
    for _ in 0..5 {
        assert_eq!(TypeInferencer::default().infer(&batch), first);
    }
    let types: Vec<ColumnType> = first.iter().map(|c| c.column_type).collect();
    assert_eq!(
        types,
        vec![ColumnType::Int64, ColumnType::Float64, ColumnType::DateTime, ColumnType::String]
    );
}

#[test]
fn colliding_names_fail_validation() {
    let batch = sample(&["Created At", "created_at", "id"], &[&["a", "b", "1"]]);
    let types = TypeInferencer::default().infer(&batch);
    let err = TableSchema::typed(&types).validate().unwrap_err();
    assert_eq!(
        err,
        SchemaError::Collision {
            name: "CREATED_AT".to_string(),
            first: 0,
            second: 1
        }
    );
}

#[test]
fn blank_names_fail_validation() {
    let batch = sample(&["id", "???"], &[&["1", "2"]]);
    let types = TypeInferencer::default().infer(&batch);
    assert_eq!(
        TableSchema::typed(&types).validate(),
        Err(SchemaError::EmptyName { position: 1 })
    );
}
