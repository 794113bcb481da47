//! Column types, the inferred type map and warehouse table schemas.
//!
//! A [`ColumnTypeMap`] is built once per run from the sample and never mutated.
//! The target table always carries exactly one [`TableSchema`]: the *typed*
//! schema derived from the map, or the all-STRING *degraded* schema produced
//! by [`TableSchema::degraded`] after a typed append fails.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("static pattern compiles"));

/// Normalize a source column name into a warehouse column name.
///
/// The name is upper-cased first. Runs of anything that is not a letter or
/// digit then collapse to one `_` and leading and trailing `_` are dropped.
/// Upper-casing can produce combining marks (`ǰ` becomes `J` + U+030C), so
/// the order matters for `normalize_column_name(normalize_column_name(x)) ==
/// normalize_column_name(x)`.
///
/// ```
/// use warehouse_loader::schema::normalize_column_name;
///
/// assert_eq!(normalize_column_name(" created at (UTC) "), "CREATED_AT_UTC");
/// assert_eq!(normalize_column_name("CREATED_AT_UTC"), "CREATED_AT_UTC");
/// ```
#[must_use]
pub fn normalize_column_name(name: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(&name.to_uppercase(), "_")
        .trim_matches('_')
        .to_string()
}

/// Semantic type of a warehouse column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    Int64,
    Float64,
    Date,
    DateTime,
}

impl ColumnType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Int64 => "INT64",
            ColumnType::Float64 => "FLOAT64",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "DATETIME",
        }
    }

    /// Arrow type used for this column in typed record batches.
    #[must_use]
    pub fn arrow_type(self) -> DataType {
        match self {
            ColumnType::String => DataType::Utf8,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Date => DataType::Date32,
            ColumnType::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inferred column: where it came from and what it became.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Header text as found in the source file.
    pub source_name: String,
    /// Normalized warehouse column name.
    pub name: String,
    pub column_type: ColumnType,
}

/// Normalized column name → type, in source column order.
///
/// Distinct source headers that normalize to the same name are kept as
/// separate entries so [`TableSchema::validate`] can reject them instead of
/// one silently shadowing the other.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTypeMap {
    columns: Vec<ColumnSpec>,
}

impl ColumnTypeMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, normalizing its source name.
    pub fn push(&mut self, source_name: impl Into<String>, column_type: ColumnType) {
        let source_name = source_name.into();
        let name = normalize_column_name(&source_name);
        self.columns.push(ColumnSpec {
            source_name,
            name,
            column_type,
        });
    }

    /// Type of the first column with this normalized name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter()
    }

    #[must_use]
    pub fn column(&self, position: usize) -> Option<&ColumnSpec> {
        self.columns.get(position)
    }
}

/// A named, typed warehouse column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("table schema has no columns")]
    NoColumns,
    #[error("column #{position} has a name that normalizes to nothing")]
    EmptyName { position: usize },
    #[error("columns #{first} and #{second} both normalize to {name}")]
    Collision {
        name: String,
        first: usize,
        second: usize,
    },
}

/// Ordered column list of a warehouse table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<SchemaField>,
}

impl TableSchema {
    #[must_use]
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    /// The typed schema: one field per inferred column, with its inferred type.
    #[must_use]
    pub fn typed(types: &ColumnTypeMap) -> Self {
        Self::new(
            types
                .iter()
                .map(|c| SchemaField::new(c.name.clone(), c.column_type))
                .collect(),
        )
    }

    /// Same columns, every one widened to STRING.
    #[must_use]
    pub fn degraded(&self) -> Self {
        Self::new(
            self.fields
                .iter()
                .map(|f| SchemaField::new(f.name.clone(), ColumnType::String))
                .collect(),
        )
    }

    #[must_use]
    pub fn is_all_string(&self) -> bool {
        self.fields.iter().all(|f| f.column_type == ColumnType::String)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reject schemas a warehouse cannot hold: no columns, blank names, or
    /// two columns sharing one normalized name.
    ///
    /// # Errors
    /// Returns the first problem found, scanning columns in order.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::NoColumns);
        }
        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(self.fields.len());
        for (position, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(SchemaError::EmptyName { position });
            }
            if let Some(&first) = seen.get(field.name.as_str()) {
                return Err(SchemaError::Collision {
                    name: field.name.clone(),
                    first,
                    second: position,
                });
            }
            seen.insert(field.name.as_str(), position);
        }
        Ok(())
    }

    /// Arrow schema of batches matching this table; every column is nullable.
    #[must_use]
    pub fn to_arrow(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.fields
                .iter()
                .map(|f| Field::new(&f.name, f.column_type.arrow_type(), true))
                .collect::<Vec<_>>(),
        ))
    }
}
