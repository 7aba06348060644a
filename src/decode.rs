//! Per-column decode dispatch.
//!
//! For each column the declared type oid selects a registry entry and the
//! column's format code selects the strategy. Binary is used only when a
//! binary decoder is registered; everything else goes through the text
//! decoder, so callers can always ask for binary without negotiating per type.

use smallvec::SmallVec;

use crate::error::{PgError, PgResult};
use crate::protocol::{parse_rows_affected, FieldDescription, RawResult, RawRow, SharedColumns};
use crate::registry::TypeRegistry;
use crate::types::{Format, Oid, PgValue};

/// A decoded row. Inline storage for typical column counts.
pub type Row = SmallVec<[PgValue; 8]>;

/// Decode one column payload. `None` is SQL NULL.
pub fn decode_column(
    registry: &TypeRegistry,
    oid: Oid,
    format: Format,
    raw: Option<&[u8]>,
) -> PgResult<PgValue> {
    let Some(data) = raw else {
        return Ok(PgValue::Null);
    };

    let entry = registry.lookup(oid)?;

    let decoder = match (format, entry.binary_decoder()) {
        (Format::Binary, Some(decode)) => decode,
        _ => entry
            .text_decoder()
            .ok_or(PgError::UnsupportedFormat { oid, format })?,
    };

    decoder(data).map_err(|source| PgError::DecodeError {
        oid,
        len: data.len(),
        source,
    })
}

/// Decode a full row against its column descriptions.
///
/// The first failing column aborts the row.
pub fn decode_row(
    registry: &TypeRegistry,
    columns: &[FieldDescription],
    values: &RawRow,
) -> PgResult<Row> {
    if values.len() != columns.len() {
        return Err(PgError::ProtocolError(format!(
            "Row has {} values for {} columns",
            values.len(),
            columns.len()
        )));
    }

    columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            decode_column(registry, column.type_oid, column.format, value.as_deref())
        })
        .collect()
}

/// Decoded result of a query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: SharedColumns,
    pub rows: Vec<Row>,
    /// Command tag (e.g., "SELECT 5" or "INSERT 0 1")
    pub command_tag: String,
}

impl QueryResult {
    pub fn rows_affected(&self) -> u64 {
        parse_rows_affected(&self.command_tag)
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Decode every row of a raw result.
pub fn decode_result(registry: &TypeRegistry, raw: RawResult) -> PgResult<QueryResult> {
    let rows = raw
        .rows
        .iter()
        .map(|row| decode_row(registry, &raw.columns, row))
        .collect::<PgResult<Vec<Row>>>()?;

    Ok(QueryResult {
        columns: raw.columns,
        rows,
        command_tag: raw.command_tag,
    })
}

/// Result formats to request for a statement's columns.
///
/// Binary for every column whose type currently has a binary decoder, text
/// otherwise.
pub fn result_formats(registry: &TypeRegistry, columns: &[FieldDescription]) -> Vec<Format> {
    columns
        .iter()
        .map(|column| {
            if registry.has_binary_decoder(column.type_oid) {
                Format::Binary
            } else {
                Format::Text
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn decode(registry: &TypeRegistry, oid: Oid, format: Format, data: &[u8]) -> PgResult<PgValue> {
        decode_column(registry, oid, format, Some(data))
    }

    #[test]
    fn test_binary_column_uses_binary_decoder() {
        let registry = TypeRegistry::with_defaults();
        let value = decode(&registry, Oid::INT4, Format::Binary, &42i32.to_be_bytes()).unwrap();
        assert_eq!(value, PgValue::Int4(42));
    }

    #[test]
    fn test_text_column_uses_text_decoder() {
        let registry = TypeRegistry::with_defaults();
        let value = decode(&registry, Oid::INT8, Format::Text, b"-17").unwrap();
        assert_eq!(value, PgValue::Int8(-17));
    }

    #[test]
    fn test_binary_without_decoder_matches_text() {
        let registry = TypeRegistry::with_defaults();
        registry.clear_binary_decoder(Oid::INT2).unwrap();

        let as_binary = decode(&registry, Oid::INT2, Format::Binary, b"31000").unwrap();
        let as_text = decode(&registry, Oid::INT2, Format::Text, b"31000").unwrap();
        assert_eq!(as_binary, as_text);
        assert_eq!(as_binary, PgValue::Int2(31000));
    }

    #[test]
    fn test_null_skips_registry() {
        let registry = TypeRegistry::new();
        assert_eq!(
            decode_column(&registry, Oid(123456), Format::Binary, None).unwrap(),
            PgValue::Null
        );
    }

    #[test]
    fn test_unknown_type() {
        let registry = TypeRegistry::with_defaults();
        let err = decode(&registry, Oid(600), Format::Text, b"(1,2)").unwrap_err();
        assert!(matches!(err, PgError::UnknownType(Oid(600))));
    }

    #[test]
    fn test_unsupported_format_when_no_text_decoder() {
        let registry = TypeRegistry::with_defaults();
        registry.clear_text_decoder(Oid::UUID).unwrap();
        registry.clear_binary_decoder(Oid::UUID).unwrap();

        let err = decode(&registry, Oid::UUID, Format::Binary, &[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            PgError::UnsupportedFormat {
                oid: Oid::UUID,
                format: Format::Binary
            }
        ));
    }

    #[test]
    fn test_binary_only_type_rejects_text() {
        let registry = TypeRegistry::with_defaults();
        registry.clear_text_decoder(Oid::INT4).unwrap();

        assert!(decode(&registry, Oid::INT4, Format::Binary, &[0, 0, 0, 1]).is_ok());
        assert!(matches!(
            decode(&registry, Oid::INT4, Format::Text, b"1"),
            Err(PgError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_decode_failure_reports_oid_and_length() {
        let registry = TypeRegistry::with_defaults();
        let err = decode(&registry, Oid::INT8, Format::Binary, &[1, 2, 3]).unwrap_err();
        match err {
            PgError::DecodeError { oid, len, .. } => {
                assert_eq!(oid, Oid::INT8);
                assert_eq!(len, 3);
            }
            other => panic!("Expected DecodeError, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_row_mixed_formats() {
        let registry = TypeRegistry::with_defaults();
        let columns = vec![
            FieldDescription::new("id", Oid::INT4, Format::Binary),
            FieldDescription::new("name", Oid::TEXT, Format::Text),
            FieldDescription::new("deleted_at", Oid::TIMESTAMPTZ, Format::Binary),
            FieldDescription::new("ok", Oid::BOOL, Format::Text),
        ];
        let values: RawRow = vec![
            Some(Bytes::copy_from_slice(&7i32.to_be_bytes())),
            Some(Bytes::from_static(b"widget")),
            None,
            Some(Bytes::from_static(b"t")),
        ];

        let row = decode_row(&registry, &columns, &values).unwrap();
        assert_eq!(
            row.as_slice(),
            &[
                PgValue::Int4(7),
                PgValue::Text("widget".to_string()),
                PgValue::Null,
                PgValue::Bool(true),
            ]
        );
    }

    #[test]
    fn test_decode_row_width_mismatch() {
        let registry = TypeRegistry::with_defaults();
        let columns = vec![FieldDescription::new("a", Oid::INT4, Format::Text)];
        let values: RawRow = vec![None, None];
        assert!(matches!(
            decode_row(&registry, &columns, &values),
            Err(PgError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_decode_result_aborts_on_bad_row() {
        let registry = TypeRegistry::with_defaults();
        let columns = std::sync::Arc::new(vec![FieldDescription::new("n", Oid::INT4, Format::Text)]);
        let good = RawResult {
            columns: columns.clone(),
            rows: vec![vec![Some(Bytes::from_static(b"1"))], vec![None]],
            command_tag: "SELECT 2".to_string(),
        };
        let result = decode_result(&registry, good).unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows_affected(), 2);
        assert_eq!(result.column_index("n"), Some(0));

        let bad = RawResult {
            columns,
            rows: vec![vec![Some(Bytes::from_static(b"1"))], vec![Some(Bytes::from_static(b"x"))]],
            command_tag: "SELECT 2".to_string(),
        };
        assert!(matches!(
            decode_result(&registry, bad),
            Err(PgError::DecodeError { .. })
        ));
    }

    #[test]
    fn test_result_formats_follow_registry() {
        let registry = TypeRegistry::with_defaults();
        let columns = vec![
            FieldDescription::new("a", Oid::INT2, Format::Text),
            FieldDescription::new("b", Oid::FLOAT8, Format::Text),
            FieldDescription::new("c", Oid(600), Format::Text),
        ];
        assert_eq!(
            result_formats(&registry, &columns),
            vec![Format::Binary, Format::Binary, Format::Text]
        );

        let saved = registry.take_binary_decoders();
        assert_eq!(
            result_formats(&registry, &columns),
            vec![Format::Text, Format::Text, Format::Text]
        );
        registry.restore_binary_decoders(saved);
        assert_eq!(result_formats(&registry, &columns)[0], Format::Binary);
    }
}
