//! Chunk transformation: raw text rows → typed, null-normalized Arrow batch.
//!
//! Coercion is forgiving per value and strict per column:
//! - a value that does not parse as the column's type becomes null;
//! - a column that cannot be represented in its type as a whole (an INT64
//!   column holding a fractional or out-of-range number) is kept as STRING
//!   for this chunk, with a warning. The batch then no longer matches the
//!   typed table schema, which is what routes it through the fallback load.
//!
//! Only a structural problem (header mismatch, unreadable chunk) fails the
//! chunk as a whole.

use crate::schema::{ColumnType, ColumnTypeMap, normalize_column_name};
use crate::source::TextBatch;
use crate::values::{is_null_token, parse_number, parse_timestamp};
use anyhow::{Context, Result, bail, ensure};
use arrow::array::{
    ArrayRef, Date32Array, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A transformed, non-empty chunk ready for upload.
#[derive(Clone, Debug)]
pub struct ChunkBatch {
    pub index: usize,
    pub batch: RecordBatch,
}

impl ChunkBatch {
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

/// Why a whole column could not be coerced to its inferred type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("value {value:?} has a fractional part")]
    Fractional { value: String },
    #[error("value {value:?} does not fit in INT64")]
    OutOfRange { value: String },
}

/// Maps raw chunks to typed batches under a fixed [`ColumnTypeMap`].
#[derive(Clone, Debug)]
pub struct ChunkTransformer {
    types: ColumnTypeMap,
}

impl ChunkTransformer {
    #[must_use]
    pub fn new(types: ColumnTypeMap) -> Self {
        Self { types }
    }

    #[must_use]
    pub fn types(&self) -> &ColumnTypeMap {
        &self.types
    }

    /// Transform chunk `index`. Returns `Ok(None)` for a chunk with no rows.
    ///
    /// # Errors
    /// Returns an error if the chunk's header does not match the inferred
    /// columns or the batch cannot be assembled.
    pub fn transform(&self, index: usize, raw: TextBatch) -> Result<Option<ChunkBatch>> {
        if raw.is_empty() {
            debug!(chunk = index, "chunk is empty");
            return Ok(None);
        }
        ensure!(
            raw.headers.len() == self.types.len(),
            "chunk {index} has {} columns, sample had {}",
            raw.headers.len(),
            self.types.len()
        );

        let mut fields = Vec::with_capacity(raw.headers.len());
        let mut arrays = Vec::with_capacity(raw.headers.len());
        for (position, (header, values)) in raw.headers.iter().zip(&raw.columns).enumerate() {
            let name = normalize_column_name(header);
            let column_type = match self.types.column(position) {
                Some(spec) if spec.name == name => spec.column_type,
                _ => bail!("chunk {index} column #{position} ({name}) does not match the sample header"),
            };

            let array = match coerce_column(values, column_type) {
                Ok(array) => array,
                Err(e) => {
                    warn!(chunk = index, column = %name, target = %column_type, error = %e, "coercion failed; keeping column as STRING");
                    string_column(values)
                }
            };
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .with_context(|| format!("assemble batch for chunk {index}"))?;
        debug!(chunk = index, rows = batch.num_rows(), "chunk transformed");
        Ok(Some(ChunkBatch { index, batch }))
    }
}

/// Coerce raw cells to `column_type`, unparseable values becoming null.
///
/// # Errors
/// Returns a [`CoercionError`] when an INT64 column holds a value that is
/// numeric but not representable as a 64-bit integer.
pub fn coerce_column(values: &[String], column_type: ColumnType) -> Result<ArrayRef, CoercionError> {
    let array: ArrayRef = match column_type {
        ColumnType::String => string_column(values),
        ColumnType::Int64 => Arc::new(
            values
                .iter()
                .map(|v| coerce_int64(v))
                .collect::<Result<Int64Array, _>>()?,
        ),
        ColumnType::Float64 => Arc::new(
            values
                .iter()
                .map(|v| present(v).and_then(parse_number).map(|n| n.as_f64()))
                .collect::<Float64Array>(),
        ),
        ColumnType::Date => Arc::new(
            values
                .iter()
                .map(|v| {
                    present(v)
                        .and_then(parse_timestamp)
                        .and_then(|ts| days_since_epoch(ts.date()))
                })
                .collect::<Date32Array>(),
        ),
        ColumnType::DateTime => Arc::new(
            values
                .iter()
                .map(|v| {
                    present(v)
                        .and_then(parse_timestamp)
                        .map(|ts| ts.and_utc().timestamp_micros())
                })
                .collect::<TimestampMicrosecondArray>(),
        ),
    };
    Ok(array)
}

/// Text column with every null sentinel mapped to a real null.
#[must_use]
pub fn string_column(values: &[String]) -> ArrayRef {
    Arc::new(values.iter().map(|v| present(v)).collect::<StringArray>())
}

fn present(raw: &str) -> Option<&str> {
    (!is_null_token(raw)).then_some(raw)
}

fn coerce_int64(raw: &str) -> Result<Option<i64>, CoercionError> {
    let Some(number) = present(raw).and_then(parse_number) else {
        return Ok(None);
    };
    if number.has_fraction() {
        return Err(CoercionError::Fractional {
            value: raw.to_string(),
        });
    }
    match number.as_i64() {
        Some(v) if !number.exceeds_i64() => Ok(Some(v)),
        _ => Err(CoercionError::OutOfRange {
            value: raw.to_string(),
        }),
    }
}

fn days_since_epoch(date: NaiveDate) -> Option<i32> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    i32::try_from(date.signed_duration_since(epoch).num_days()).ok()
}
