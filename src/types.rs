//! PostgreSQL type identifiers, format codes and decoded values.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PgError, PgResult};

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifier.
///
/// Only ever used as a lookup key; the client never interprets the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(pub i32);

impl Oid {
    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const NAME: Oid = Oid(19);

    // Integer types
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);

    pub const TEXT: Oid = Oid(25);
    pub const JSON: Oid = Oid(114);

    // Floating point types
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);

    // String types
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);

    // Date/time types
    pub const DATE: Oid = Oid(1082);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);

    pub const UUID: Oid = Oid(2950);
    pub const JSONB: Oid = Oid(3802);

    /// Create from raw i32 value
    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    /// Get the raw i32 value
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }
}

// ============================================================================
// Format codes
// ============================================================================

/// Wire format of a parameter or result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum Format {
    #[default]
    Text = 0,
    Binary = 1,
}

impl Format {
    #[inline]
    pub fn code(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for Format {
    type Error = PgError;

    fn try_from(code: i16) -> PgResult<Self> {
        match code {
            0 => Ok(Format::Text),
            1 => Ok(Format::Binary),
            other => Err(PgError::ProtocolError(format!(
                "Invalid format code: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// PostgreSQL Values
// ============================================================================

/// Microseconds between the Unix epoch and the PostgreSQL epoch (2000-01-01).
pub const PG_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;

/// The PostgreSQL epoch as a calendar date.
pub fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Uuid(Uuid),
    /// Microseconds since 2000-01-01 00:00:00, no time zone
    Timestamp(i64),
    TimestampTz(DateTime<Utc>),
    /// Days since 2000-01-01
    Date(i32),
    Json(serde_json::Value),
}

impl PgValue {
    /// Check if this value is NULL
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    /// Get the OID for this value's type
    pub fn type_oid(&self) -> Oid {
        match self {
            PgValue::Null => Oid::TEXT, // NULL doesn't have a specific type
            PgValue::Bool(_) => Oid::BOOL,
            PgValue::Int2(_) => Oid::INT2,
            PgValue::Int4(_) => Oid::INT4,
            PgValue::Int8(_) => Oid::INT8,
            PgValue::Float4(_) => Oid::FLOAT4,
            PgValue::Float8(_) => Oid::FLOAT8,
            PgValue::Text(_) => Oid::TEXT,
            PgValue::Bytea(_) => Oid::BYTEA,
            PgValue::Uuid(_) => Oid::UUID,
            PgValue::Timestamp(_) => Oid::TIMESTAMP,
            PgValue::TimestampTz(_) => Oid::TIMESTAMPTZ,
            PgValue::Date(_) => Oid::DATE,
            PgValue::Json(_) => Oid::JSON,
        }
    }

    /// Encode this value to binary format.
    pub fn encode_binary(&self) -> Vec<u8> {
        match self {
            PgValue::Null => vec![],
            PgValue::Bool(v) => vec![u8::from(*v)],
            PgValue::Int2(v) => v.to_be_bytes().to_vec(),
            PgValue::Int4(v) => v.to_be_bytes().to_vec(),
            PgValue::Int8(v) => v.to_be_bytes().to_vec(),
            PgValue::Float4(v) => v.to_be_bytes().to_vec(),
            PgValue::Float8(v) => v.to_be_bytes().to_vec(),
            PgValue::Text(v) => v.as_bytes().to_vec(),
            PgValue::Bytea(v) => v.clone(),
            PgValue::Uuid(v) => v.as_bytes().to_vec(),
            PgValue::Timestamp(v) => v.to_be_bytes().to_vec(),
            PgValue::TimestampTz(v) => (v.timestamp_micros() - PG_EPOCH_OFFSET_MICROS)
                .to_be_bytes()
                .to_vec(),
            PgValue::Date(v) => v.to_be_bytes().to_vec(),
            PgValue::Json(v) => v.to_string().into_bytes(),
        }
    }

    /// Encode this value the way the server prints it in text format.
    pub fn encode_text(&self) -> Vec<u8> {
        let text = match self {
            PgValue::Null => return vec![],
            PgValue::Bool(v) => (if *v { "t" } else { "f" }).to_string(),
            PgValue::Int2(v) => v.to_string(),
            PgValue::Int4(v) => v.to_string(),
            PgValue::Int8(v) => v.to_string(),
            PgValue::Float4(v) => format_float(f64::from(*v), v.to_string()),
            PgValue::Float8(v) => format_float(*v, v.to_string()),
            PgValue::Text(v) => v.clone(),
            PgValue::Bytea(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("\\x");
                for byte in v {
                    out.push_str(&format!("{:02x}", byte));
                }
                out
            }
            PgValue::Uuid(v) => v.hyphenated().to_string(),
            PgValue::Timestamp(micros) => {
                match DateTime::from_timestamp(
                    (micros + PG_EPOCH_OFFSET_MICROS).div_euclid(1_000_000),
                    ((micros + PG_EPOCH_OFFSET_MICROS).rem_euclid(1_000_000) * 1_000) as u32,
                ) {
                    Some(dt) => dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
                    None => return vec![],
                }
            }
            PgValue::TimestampTz(v) => v.format("%Y-%m-%d %H:%M:%S%.6f+00").to_string(),
            PgValue::Date(days) => {
                match pg_epoch_date().checked_add_signed(chrono::Duration::days(i64::from(*days))) {
                    Some(date) => date.format("%Y-%m-%d").to_string(),
                    None => return vec![],
                }
            }
            PgValue::Json(v) => v.to_string(),
        };
        text.into_bytes()
    }
}

/// The server spells non-finite floats differently from Rust.
fn format_float(v: f64, finite: String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() && v > 0.0 {
        "Infinity".to_string()
    } else if v.is_infinite() {
        "-Infinity".to_string()
    } else {
        finite
    }
}
