//! Text-protocol value codecs and the backend → MySQL column type mapping.
//!
//! Every backend type has exactly one codec; dispatch is a single `match`
//! so a type without a codec is an error instead of a silently dropped column.

use std::str::FromStr;

use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use thiserror::Error;

use super::lenenc::{put_lenenc_bytes, CodecError, NULL_MARKER};
use crate::backend::{BackendType, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// MySQL column type codes used in column definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnType {
    Tiny = 1,
    Long = 3,
    Double = 5,
    Date = 10,
    DateTime = 12,
    Json = 245,
    NewDecimal = 246,
    Blob = 252,
    VarString = 253,
}

/// Character set id for binary (non-text) columns
pub const BINARY_CHARSET: u16 = 63;
/// utf8mb4_0900_ai_ci
pub const UTF8MB4_CHARSET: u16 = 255;

pub const BINARY_FLAG: u16 = 0x0080;
const NOT_FIXED_DECIMALS: u8 = 0x1F;

impl ColumnType {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Display width advertised in the column definition
    pub fn max_length(self) -> u32 {
        match self {
            ColumnType::Tiny => 1,
            ColumnType::Long => 20,
            ColumnType::Double => 22,
            ColumnType::Date => 10,
            ColumnType::DateTime => 26,
            ColumnType::NewDecimal => 65,
            ColumnType::Json | ColumnType::Blob | ColumnType::VarString => 0xFF_FF_FF,
        }
    }

    pub fn charset(self) -> u16 {
        match self {
            ColumnType::Json | ColumnType::VarString => UTF8MB4_CHARSET,
            _ => BINARY_CHARSET,
        }
    }

    pub fn flags(self) -> u16 {
        match self {
            ColumnType::Blob => BINARY_FLAG,
            _ => 0,
        }
    }

    pub fn decimals(self) -> u8 {
        match self {
            ColumnType::Double => NOT_FIXED_DECIMALS,
            ColumnType::DateTime => 6,
            _ => 0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    #[error("no MySQL column type for backend type {0}")]
    UnsupportedType(BackendType),

    #[error("value {value} does not match column type {ty}")]
    Mismatch { ty: BackendType, value: String },

    #[error("cannot decode '{text}' as {ty}")]
    Malformed { ty: BackendType, text: String },

    #[error("row has {actual} values for {expected} columns")]
    RowWidth { expected: usize, actual: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Map a backend column type to the MySQL type code sent to the client
pub fn column_type(ty: &BackendType) -> Result<ColumnType, ValueError> {
    match ty {
        BackendType::Bool => Ok(ColumnType::Tiny),
        BackendType::Int64 => Ok(ColumnType::Long),
        BackendType::String => Ok(ColumnType::VarString),
        BackendType::Float64 => Ok(ColumnType::Double),
        BackendType::Bytes => Ok(ColumnType::Blob),
        BackendType::Date => Ok(ColumnType::Date),
        BackendType::Timestamp => Ok(ColumnType::DateTime),
        BackendType::Numeric => Ok(ColumnType::NewDecimal),
        BackendType::Json => Ok(ColumnType::Json),
        BackendType::Array(_) | BackendType::Struct => {
            Err(ValueError::UnsupportedType(ty.clone()))
        }
    }
}

/// Append one column of a text row: `0xFB` for NULL, else a length-encoded string
pub fn encode_value(buf: &mut BytesMut, ty: &BackendType, value: &Value) -> Result<(), ValueError> {
    match to_text(ty, value)? {
        None => buf.extend_from_slice(&[NULL_MARKER]),
        Some(text) => put_lenenc_bytes(buf, &text),
    }
    Ok(())
}

/// Render a value in its text-protocol form; `None` is SQL NULL
pub fn to_text(ty: &BackendType, value: &Value) -> Result<Option<Vec<u8>>, ValueError> {
    if value.is_null() {
        column_type(ty)?;
        return Ok(None);
    }
    let text = match (ty, value) {
        (BackendType::Bool, Value::Bool(v)) => (if *v { "1" } else { "0" }).to_string(),
        (BackendType::Int64, Value::Int64(v)) => v.to_string(),
        (BackendType::Float64, Value::Float64(v)) => v.to_string(),
        (BackendType::String, Value::String(v)) => v.clone(),
        (BackendType::Bytes, Value::Bytes(v)) => return Ok(Some(v.clone())),
        (BackendType::Date, Value::Date(v)) => v.format(DATE_FORMAT).to_string(),
        (BackendType::Timestamp, Value::Timestamp(v)) => v.format(TIMESTAMP_FORMAT).to_string(),
        (BackendType::Numeric, Value::Numeric(v)) => v.to_string(),
        (BackendType::Json, Value::Json(v)) => v.to_string(),
        (BackendType::Array(_) | BackendType::Struct, _) => {
            return Err(ValueError::UnsupportedType(ty.clone()))
        }
        (_, other) => {
            return Err(ValueError::Mismatch {
                ty: ty.clone(),
                value: format!("{:?}", other),
            })
        }
    };
    Ok(Some(text.into_bytes()))
}

/// Parse a text-protocol value of the given type
pub fn from_text(ty: &BackendType, raw: &[u8]) -> Result<Value, ValueError> {
    if let BackendType::Bytes = ty {
        return Ok(Value::Bytes(raw.to_vec()));
    }
    let malformed = || ValueError::Malformed {
        ty: ty.clone(),
        text: String::from_utf8_lossy(raw).into_owned(),
    };
    let text = std::str::from_utf8(raw).map_err(|_| malformed())?;
    match ty {
        BackendType::Bool => match text {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            _ => Err(malformed()),
        },
        BackendType::Int64 => text.parse().map(Value::Int64).map_err(|_| malformed()),
        BackendType::Float64 => text.parse().map(Value::Float64).map_err(|_| malformed()),
        BackendType::String => Ok(Value::String(text.to_string())),
        BackendType::Bytes => Ok(Value::Bytes(raw.to_vec())),
        BackendType::Date => NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|_| malformed()),
        BackendType::Timestamp => NaiveDateTime::parse_from_str(text, TIMESTAMP_PARSE_FORMAT)
            .map(|ts| Value::Timestamp(ts.and_utc()))
            .map_err(|_| malformed()),
        BackendType::Numeric => Decimal::from_str(text)
            .map(Value::Numeric)
            .map_err(|_| malformed()),
        BackendType::Json => serde_json::from_str(text)
            .map(Value::Json)
            .map_err(|_| malformed()),
        BackendType::Array(_) | BackendType::Struct => Err(ValueError::UnsupportedType(ty.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::lenenc::get_lenenc_bytes;
    use chrono::{TimeZone, Utc};

    /// Read one column of a text row
    fn decode_value(src: &mut &[u8], ty: &BackendType) -> Result<Value, ValueError> {
        if src.first() == Some(&NULL_MARKER) {
            *src = &src[1..];
            return Ok(Value::Null);
        }
        let raw = get_lenenc_bytes(src)?;
        from_text(ty, raw)
    }

    fn roundtrip(ty: BackendType, value: Value) {
        let mut buf = BytesMut::new();
        encode_value(&mut buf, &ty, &value).unwrap();
        let mut cursor = &buf[..];
        let decoded = decode_value(&mut cursor, &ty).unwrap();
        assert_eq!(decoded, value, "roundtrip of {:?} as {}", value, ty);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_int64_values() {
        roundtrip(BackendType::Int64, Value::Int64(0));
        roundtrip(BackendType::Int64, Value::Int64(-42));
        roundtrip(BackendType::Int64, Value::Int64(i64::MAX));
        roundtrip(BackendType::Int64, Value::Int64(i64::MIN));
    }

    #[test]
    fn test_string_values() {
        roundtrip(BackendType::String, Value::String(String::new()));
        roundtrip(BackendType::String, Value::String("héllo".into()));
        roundtrip(BackendType::String, Value::String("x".repeat(70_000)));
    }

    #[test]
    fn test_float_bytes_and_bool_values() {
        roundtrip(BackendType::Float64, Value::Float64(0.0));
        roundtrip(BackendType::Float64, Value::Float64(-1.5));
        roundtrip(BackendType::Float64, Value::Float64(f64::MAX));
        roundtrip(BackendType::Bytes, Value::Bytes(vec![0, 0xFB, 0xFF]));
        roundtrip(BackendType::Bytes, Value::Bytes(Vec::new()));
        roundtrip(BackendType::Bool, Value::Bool(true));
        roundtrip(BackendType::Bool, Value::Bool(false));
    }

    #[test]
    fn test_temporal_values() {
        roundtrip(
            BackendType::Date,
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
        );
        let ts = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 58).unwrap()
            + chrono::Duration::microseconds(123_456);
        roundtrip(BackendType::Timestamp, Value::Timestamp(ts));
    }

    #[test]
    fn test_numeric_and_json_values() {
        roundtrip(
            BackendType::Numeric,
            Value::Numeric(Decimal::from_str("-12345.6789").unwrap()),
        );
        roundtrip(BackendType::Numeric, Value::Numeric(Decimal::ZERO));
        roundtrip(
            BackendType::Json,
            Value::Json(serde_json::json!({"a": [1, 2, null], "b": "c"})),
        );
    }

    #[test]
    fn test_null_and_empty_are_distinct() {
        let mut buf = BytesMut::new();
        encode_value(&mut buf, &BackendType::String, &Value::Null).unwrap();
        encode_value(&mut buf, &BackendType::String, &Value::String(String::new())).unwrap();
        assert_eq!(&buf[..], &[NULL_MARKER, 0x00]);

        let mut cursor = &buf[..];
        assert_eq!(decode_value(&mut cursor, &BackendType::String).unwrap(), Value::Null);
        assert_eq!(
            decode_value(&mut cursor, &BackendType::String).unwrap(),
            Value::String(String::new())
        );
    }

    #[test]
    fn test_timestamp_text_form() {
        let ts = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let text = to_text(&BackendType::Timestamp, &Value::Timestamp(ts))
            .unwrap()
            .unwrap();
        assert_eq!(text, b"2020-01-02 03:04:05.000000");
        assert_eq!(
            from_text(&BackendType::Timestamp, b"2020-01-02 03:04:05").unwrap(),
            Value::Timestamp(ts)
        );
    }

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(column_type(&BackendType::Bool).unwrap().code(), 1);
        assert_eq!(column_type(&BackendType::Int64).unwrap().code(), 3);
        assert_eq!(column_type(&BackendType::String).unwrap().code(), 253);
        assert_eq!(
            column_type(&BackendType::Struct),
            Err(ValueError::UnsupportedType(BackendType::Struct))
        );
    }

    #[test]
    fn test_unsupported_and_mismatched_values_fail() {
        let mut buf = BytesMut::new();
        let array = BackendType::Array(Box::new(BackendType::Int64));
        assert!(matches!(
            encode_value(&mut buf, &array, &Value::Array(vec![Value::Int64(1)])),
            Err(ValueError::UnsupportedType(_))
        ));
        assert!(matches!(
            encode_value(&mut buf, &BackendType::Int64, &Value::String("1".into())),
            Err(ValueError::Mismatch { .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_malformed_text_is_rejected() {
        assert!(matches!(
            from_text(&BackendType::Int64, b"12a"),
            Err(ValueError::Malformed { .. })
        ));
        assert!(matches!(
            from_text(&BackendType::Date, b"2020-13-01"),
            Err(ValueError::Malformed { .. })
        ));
    }
}
