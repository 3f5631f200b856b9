//! Dynamic values and the type-oid codec registry.
//!
//! Parameters travel to the server in binary format; result columns arrive
//! in whichever format the statement requested per column (binary for the
//! types decoded here natively, text otherwise).

pub mod datetime;

pub use datetime::DatetimeMode;

use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::error::{Error, Result};
use crate::protocol::backend::DataRow;
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::statement::Column;

/// A single dynamically-typed column or parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// boolean
    Bool(bool),
    /// int2 / smallint
    Int2(i16),
    /// int4 / integer
    Int4(i32),
    /// int8 / bigint
    Int8(i64),
    /// float4 / real
    Float4(f32),
    /// float8 / double precision
    Float8(f64),
    /// text, varchar, char(n), name, json
    Text(String),
    /// bytea
    Bytea(Vec<u8>),
    /// date
    Date(Date),
    /// time
    Time(Time),
    /// timestamp
    Timestamp(PrimitiveDateTime),
    /// timestamptz
    TimestampTz(OffsetDateTime),
    /// Raw bytes of a type without a native codec
    Unknown(Vec<u8>),
}

impl Value {
    /// Integer view across the int widths.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(*v as i64),
            Value::Int4(v) => Some(*v as i64),
            Value::Int8(v) => Some(*v),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// True for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int2(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float4(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytea(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

fn encode_err(value: &Value, type_oid: Oid) -> Error {
    Error::Encode(format!("cannot encode {value:?} as oid {type_oid}"))
}

/// Encode one parameter in binary format for the given type oid.
///
/// `None` marks NULL on the wire. An oid of 0 means the statement left the
/// type to the server; the value's natural representation is used.
pub fn encode_param(
    value: &Value,
    type_oid: Oid,
    mode: DatetimeMode,
) -> Result<Option<Vec<u8>>> {
    let mut out = Vec::new();
    match (value, type_oid) {
        (Value::Null, _) => return Ok(None),
        (Value::Unknown(bytes), _) => out.extend_from_slice(bytes),

        (Value::Bool(v), oid::BOOL | 0) => out.push(*v as u8),

        (Value::Int2(v), oid::INT2 | 0) => out.extend_from_slice(&v.to_be_bytes()),
        (Value::Int2(v), oid::INT4) => out.extend_from_slice(&(*v as i32).to_be_bytes()),
        (Value::Int2(v), oid::INT8) => out.extend_from_slice(&(*v as i64).to_be_bytes()),
        (Value::Int4(v), oid::INT4 | oid::OID | 0) => out.extend_from_slice(&v.to_be_bytes()),
        (Value::Int4(v), oid::INT8) => out.extend_from_slice(&(*v as i64).to_be_bytes()),
        (Value::Int8(v), oid::INT8 | 0) => out.extend_from_slice(&v.to_be_bytes()),

        (Value::Float4(v), oid::FLOAT4 | 0) => out.extend_from_slice(&v.to_be_bytes()),
        (Value::Float4(v), oid::FLOAT8) => out.extend_from_slice(&(*v as f64).to_be_bytes()),
        (Value::Float8(v), oid::FLOAT8 | 0) => out.extend_from_slice(&v.to_be_bytes()),

        (Value::Text(s), _) => out.extend_from_slice(s.as_bytes()),
        (Value::Bytea(bytes), oid::BYTEA | 0) => out.extend_from_slice(bytes),

        (Value::Date(v), oid::DATE | 0) => datetime::encode_date(*v, &mut out),
        (Value::Time(v), oid::TIME | 0) => datetime::encode_time(mode, *v, &mut out),
        (Value::Timestamp(v), oid::TIMESTAMP | 0) => {
            datetime::encode_timestamp(mode, *v, &mut out)
        }
        (Value::TimestampTz(v), oid::TIMESTAMPTZ | 0) => {
            datetime::encode_timestamptz(mode, *v, &mut out)
        }

        _ => return Err(encode_err(value, type_oid)),
    }
    Ok(Some(out))
}

/// Decode one column value.
pub fn decode_value(
    raw: Option<&[u8]>,
    type_oid: Oid,
    format: FormatCode,
    mode: DatetimeMode,
) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    match format {
        FormatCode::Binary => decode_binary(raw, type_oid, mode),
        FormatCode::Text => decode_text(raw, type_oid),
    }
}

fn short(type_oid: Oid) -> Error {
    Error::Decode(format!("truncated binary value for oid {type_oid}"))
}

fn decode_binary(raw: &[u8], type_oid: Oid, mode: DatetimeMode) -> Result<Value> {
    Ok(match type_oid {
        oid::BOOL => Value::Bool(*raw.first().ok_or_else(|| short(type_oid))? != 0),
        oid::INT2 => {
            Value::Int2(i16::from_be_bytes(*raw.first_chunk().ok_or_else(|| short(type_oid))?))
        }
        oid::INT4 | oid::OID => {
            Value::Int4(i32::from_be_bytes(*raw.first_chunk().ok_or_else(|| short(type_oid))?))
        }
        oid::INT8 => {
            Value::Int8(i64::from_be_bytes(*raw.first_chunk().ok_or_else(|| short(type_oid))?))
        }
        oid::FLOAT4 => {
            Value::Float4(f32::from_be_bytes(*raw.first_chunk().ok_or_else(|| short(type_oid))?))
        }
        oid::FLOAT8 => {
            Value::Float8(f64::from_be_bytes(*raw.first_chunk().ok_or_else(|| short(type_oid))?))
        }
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR | oid::JSON => {
            Value::Text(utf8(raw)?.to_string())
        }
        oid::BYTEA => Value::Bytea(raw.to_vec()),
        oid::DATE => Value::Date(datetime::decode_date(raw)?),
        oid::TIME => Value::Time(datetime::decode_time(mode, raw)?),
        oid::TIMESTAMP => Value::Timestamp(datetime::decode_timestamp(mode, raw)?),
        oid::TIMESTAMPTZ => Value::TimestampTz(datetime::decode_timestamptz(mode, raw)?),
        _ => Value::Unknown(raw.to_vec()),
    })
}

fn decode_text(raw: &[u8], type_oid: Oid) -> Result<Value> {
    let text = utf8(raw)?;
    Ok(match type_oid {
        oid::BOOL => Value::Bool(text == "t"),
        oid::INT2 => Value::Int2(parse_number(text, type_oid)?),
        oid::INT4 | oid::OID => Value::Int4(parse_number(text, type_oid)?),
        oid::INT8 => Value::Int8(parse_number(text, type_oid)?),
        oid::FLOAT4 => Value::Float4(parse_number(text, type_oid)?),
        oid::FLOAT8 => Value::Float8(parse_number(text, type_oid)?),
        oid::BYTEA => Value::Bytea(parse_hex_bytea(text)?),
        oid::DATE => Value::Date(datetime::parse_date(text)?),
        oid::TIME => Value::Time(datetime::parse_time(text)?),
        oid::TIMESTAMP => Value::Timestamp(datetime::parse_timestamp(text)?),
        oid::TIMESTAMPTZ => Value::TimestampTz(datetime::parse_timestamptz(text)?),
        _ => Value::Text(text.to_string()),
    })
}

fn utf8(raw: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(raw).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

fn parse_number<T: std::str::FromStr>(text: &str, type_oid: Oid) -> Result<T> {
    text.parse()
        .map_err(|_| Error::Decode(format!("invalid number '{text}' for oid {type_oid}")))
}

/// Parse PostgreSQL hex bytea text format: `\x0a1b...`
fn parse_hex_bytea(text: &str) -> Result<Vec<u8>> {
    let bad = || Error::Decode(format!("invalid bytea '{text}'"));
    let hex = text.strip_prefix("\\x").ok_or_else(bad)?;
    if hex.len() % 2 != 0 {
        return Err(bad());
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).map_err(|_| bad())?;
            u8::from_str_radix(s, 16).map_err(|_| bad())
        })
        .collect()
}

/// Decode a DataRow payload against its column descriptors.
pub fn decode_row(payload: &[u8], columns: &[Column], mode: DatetimeMode) -> Result<Vec<Value>> {
    let data_row = DataRow::parse(payload)?;
    if data_row.len() != columns.len() {
        return Err(Error::Decode(format!(
            "row has {} columns, descriptor has {}",
            data_row.len(),
            columns.len()
        )));
    }
    let mut row = Vec::with_capacity(columns.len());
    for (raw, column) in data_row.iter().zip(columns) {
        row.push(decode_value(raw, column.type_oid, column.format, mode)?);
    }
    Ok(row)
}
