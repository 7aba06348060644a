//! Built-in decoders for the well-known server types.
//!
//! Every catalog type has a text decoder. Binary decoders are the fast path
//! and are installed wherever the binary layout is fixed and simple.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::error::DecodeError;
use crate::registry::TranscoderEntry;
use crate::types::{pg_epoch_date, Oid, PgValue, PG_EPOCH_OFFSET_MICROS};

type DecodeResult = Result<PgValue, DecodeError>;

/// The entries a fresh registry is populated with.
pub fn builtin_catalog() -> Vec<(Oid, TranscoderEntry)> {
    vec![
        (
            Oid::BOOL,
            TranscoderEntry::new("bool")
                .with_text(text_bool)
                .with_binary(binary_bool),
        ),
        (
            Oid::INT2,
            TranscoderEntry::new("int2")
                .with_text(text_int2)
                .with_binary(binary_int2),
        ),
        (
            Oid::INT4,
            TranscoderEntry::new("int4")
                .with_text(text_int4)
                .with_binary(binary_int4),
        ),
        (
            Oid::INT8,
            TranscoderEntry::new("int8")
                .with_text(text_int8)
                .with_binary(binary_int8),
        ),
        (
            Oid::FLOAT4,
            TranscoderEntry::new("float4")
                .with_text(text_float4)
                .with_binary(binary_float4),
        ),
        (
            Oid::FLOAT8,
            TranscoderEntry::new("float8")
                .with_text(text_float8)
                .with_binary(binary_float8),
        ),
        (
            Oid::TIMESTAMPTZ,
            TranscoderEntry::new("timestamptz")
                .with_text(text_timestamptz)
                .with_binary(binary_timestamptz),
        ),
        (
            Oid::TIMESTAMP,
            TranscoderEntry::new("timestamp")
                .with_text(text_timestamp)
                .with_binary(binary_timestamp),
        ),
        (
            Oid::DATE,
            TranscoderEntry::new("date")
                .with_text(text_date)
                .with_binary(binary_date),
        ),
        (Oid::TEXT, string_entry("text")),
        (Oid::VARCHAR, string_entry("varchar")),
        (Oid::BPCHAR, string_entry("bpchar")),
        (Oid::NAME, string_entry("name")),
        (
            Oid::JSON,
            TranscoderEntry::new("json")
                .with_text(text_json)
                .with_binary(text_json),
        ),
        (
            Oid::JSONB,
            TranscoderEntry::new("jsonb")
                .with_text(text_json)
                .with_binary(binary_jsonb),
        ),
        (
            Oid::BYTEA,
            TranscoderEntry::new("bytea")
                .with_text(text_bytea)
                .with_binary(binary_bytea),
        ),
        (
            Oid::UUID,
            TranscoderEntry::new("uuid")
                .with_text(text_uuid)
                .with_binary(binary_uuid),
        ),
    ]
}

fn string_entry(name: &'static str) -> TranscoderEntry {
    // Character types are UTF-8 in both formats.
    TranscoderEntry::new(name)
        .with_text(text_string)
        .with_binary(text_string)
}

// ============================================================================
// Helpers
// ============================================================================

fn utf8(data: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(data).map_err(|e| format!("Invalid UTF-8: {}", e).into())
}

fn fixed<const N: usize>(data: &[u8], type_name: &str) -> Result<[u8; N], DecodeError> {
    data.try_into()
        .map_err(|_| format!("Invalid {} length: {}", type_name, data.len()).into())
}

fn micros_to_utc(micros: i64) -> Result<DateTime<Utc>, DecodeError> {
    let unix = micros
        .checked_add(PG_EPOCH_OFFSET_MICROS)
        .ok_or("Timestamp out of range")?;
    DateTime::from_timestamp(
        unix.div_euclid(1_000_000),
        (unix.rem_euclid(1_000_000) * 1_000) as u32,
    )
    .ok_or_else(|| "Timestamp out of range".into())
}

fn parse_float(text: &str) -> Result<f64, DecodeError> {
    match text {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => Ok(text.parse::<f64>()?),
    }
}

fn hex_digit(b: u8) -> Result<u8, DecodeError> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(format!("Invalid hex digit: {:?}", b as char).into()),
    }
}

// ============================================================================
// Text format
// ============================================================================

fn text_bool(data: &[u8]) -> DecodeResult {
    match data {
        b"t" | b"true" => Ok(PgValue::Bool(true)),
        b"f" | b"false" => Ok(PgValue::Bool(false)),
        _ => Err(format!("Invalid BOOL: {:?}", String::from_utf8_lossy(data)).into()),
    }
}

fn text_int2(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Int2(utf8(data)?.parse()?))
}

fn text_int4(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Int4(utf8(data)?.parse()?))
}

fn text_int8(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Int8(utf8(data)?.parse()?))
}

fn text_float4(data: &[u8]) -> DecodeResult {
    let text = utf8(data)?;
    match text {
        "NaN" | "Infinity" | "-Infinity" => Ok(PgValue::Float4(parse_float(text)? as f32)),
        _ => Ok(PgValue::Float4(text.parse()?)),
    }
}

fn text_float8(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Float8(parse_float(utf8(data)?)?))
}

fn text_timestamptz(data: &[u8]) -> DecodeResult {
    // e.g. "2024-01-15 10:30:00.123456+05:30" or "... +00"
    let dt = DateTime::parse_from_str(utf8(data)?, "%Y-%m-%d %H:%M:%S%.f%#z")?;
    Ok(PgValue::TimestampTz(dt.with_timezone(&Utc)))
}

fn text_timestamp(data: &[u8]) -> DecodeResult {
    let dt = NaiveDateTime::parse_from_str(utf8(data)?, "%Y-%m-%d %H:%M:%S%.f")?;
    Ok(PgValue::Timestamp(
        dt.and_utc().timestamp_micros() - PG_EPOCH_OFFSET_MICROS,
    ))
}

fn text_date(data: &[u8]) -> DecodeResult {
    let date = NaiveDate::parse_from_str(utf8(data)?, "%Y-%m-%d")?;
    let days = date.signed_duration_since(pg_epoch_date()).num_days();
    Ok(PgValue::Date(i32::try_from(days)?))
}

fn text_string(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Text(utf8(data)?.to_string()))
}

fn text_json(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Json(serde_json::from_slice(data)?))
}

fn text_bytea(data: &[u8]) -> DecodeResult {
    let hex = data
        .strip_prefix(b"\\x")
        .ok_or("BYTEA text is not in hex format")?;
    if hex.len() % 2 != 0 {
        return Err(format!("Odd BYTEA hex length: {}", hex.len()).into());
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        out.push(hex_digit(pair[0])? << 4 | hex_digit(pair[1])?);
    }
    Ok(PgValue::Bytea(out))
}

fn text_uuid(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Uuid(Uuid::parse_str(utf8(data)?)?))
}

// ============================================================================
// Binary format
// ============================================================================

fn binary_bool(data: &[u8]) -> DecodeResult {
    let [b] = fixed::<1>(data, "BOOL")?;
    Ok(PgValue::Bool(b != 0))
}

fn binary_int2(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Int2(i16::from_be_bytes(fixed(data, "INT2")?)))
}

fn binary_int4(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Int4(i32::from_be_bytes(fixed(data, "INT4")?)))
}

fn binary_int8(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Int8(i64::from_be_bytes(fixed(data, "INT8")?)))
}

fn binary_float4(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Float4(f32::from_be_bytes(fixed(data, "FLOAT4")?)))
}

fn binary_float8(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Float8(f64::from_be_bytes(fixed(data, "FLOAT8")?)))
}

fn binary_timestamptz(data: &[u8]) -> DecodeResult {
    let micros = i64::from_be_bytes(fixed(data, "TIMESTAMPTZ")?);
    Ok(PgValue::TimestampTz(micros_to_utc(micros)?))
}

fn binary_timestamp(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Timestamp(i64::from_be_bytes(fixed(
        data,
        "TIMESTAMP",
    )?)))
}

fn binary_date(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Date(i32::from_be_bytes(fixed(data, "DATE")?)))
}

fn binary_jsonb(data: &[u8]) -> DecodeResult {
    // JSONB has a version byte prefix
    match data.split_first() {
        Some((1, json)) => text_json(json),
        Some((version, _)) => Err(format!("Unsupported JSONB version: {}", version).into()),
        None => Err("Empty data for JSONB".into()),
    }
}

fn binary_bytea(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Bytea(data.to_vec()))
}

fn binary_uuid(data: &[u8]) -> DecodeResult {
    Ok(PgValue::Uuid(Uuid::from_bytes(fixed(data, "UUID")?)))
}
