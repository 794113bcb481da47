//! Column type inference from a bounded sample.
//!
//! Each column is decided by an ordered chain of predicates; the first one
//! that matches wins:
//!
//! 1. the normalized name contains a forced-STRING term → `STRING`
//! 2. no non-null sample values → `STRING`
//! 3. every non-null value is numeric → `FLOAT64` if any has a fractional
//!    part, else `STRING` if any magnitude exceeds `i64::MAX`, else `INT64`
//! 4. every non-null value is a timestamp → `DATE` if all are at midnight,
//!    else `DATETIME`
//! 5. `STRING`

use crate::schema::{ColumnType, ColumnTypeMap, normalize_column_name};
use crate::source::TextBatch;
use crate::values::{is_midnight, is_null_token, parse_number, parse_timestamp};

/// Identifier-like fragments that keep a column textual whatever its values
/// look like (tax ids, product codes, phone numbers, postal codes).
pub const DEFAULT_FORCED_STRING_TERMS: [&str; 5] = ["CPF", "CNPJ", "EAN", "TELEFONE", "CEP"];

/// Derives a [`ColumnTypeMap`] from sample rows read as raw text.
#[derive(Clone, Debug)]
pub struct TypeInferencer {
    forced_string_terms: Vec<String>,
}

impl Default for TypeInferencer {
    fn default() -> Self {
        Self::new(DEFAULT_FORCED_STRING_TERMS)
    }
}

impl TypeInferencer {
    /// Build an inferencer with custom forced-STRING terms. Terms are
    /// normalized like column names so `"tax id"` matches `TAX_ID_NUMBER`.
    pub fn new<I, S>(forced_string_terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            forced_string_terms: forced_string_terms
                .into_iter()
                .map(|t| normalize_column_name(t.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Infer one type per sample column, in column order.
    #[must_use]
    pub fn infer(&self, sample: &TextBatch) -> ColumnTypeMap {
        let mut types = ColumnTypeMap::new();
        for (header, values) in sample.headers.iter().zip(&sample.columns) {
            let name = normalize_column_name(header);
            let column_type = self.infer_column(&name, values.iter().map(String::as_str));
            types.push(header.clone(), column_type);
        }
        types
    }

    /// Decide the type of a single column from its normalized name and raw values.
    pub fn infer_column<'a, I>(&self, normalized_name: &str, values: I) -> ColumnType
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.is_forced_string(normalized_name) {
            return ColumnType::String;
        }

        let present: Vec<&str> = values.into_iter().filter(|v| !is_null_token(v)).collect();
        if present.is_empty() {
            return ColumnType::String;
        }

        if let Some(numbers) = present.iter().map(|v| parse_number(v)).collect::<Option<Vec<_>>>() {
            return if numbers.iter().any(|n| n.has_fraction()) {
                ColumnType::Float64
            } else if numbers.iter().any(|n| n.exceeds_i64()) {
                ColumnType::String
            } else {
                ColumnType::Int64
            };
        }

        if let Some(stamps) = present.iter().map(|v| parse_timestamp(v)).collect::<Option<Vec<_>>>() {
            return if stamps.iter().all(is_midnight) {
                ColumnType::Date
            } else {
                ColumnType::DateTime
            };
        }

        ColumnType::String
    }

    fn is_forced_string(&self, normalized_name: &str) -> bool {
        self.forced_string_terms
            .iter()
            .any(|term| normalized_name.contains(term.as_str()))
    }
}
