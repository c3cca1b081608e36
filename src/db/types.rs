//! Row to JSON conversion.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies a column's type name into a logical category
//! 2. Database-specific decoders extract the value for that category
//!
//! SQLite columns are typed per value, so its decoder classifies the runtime
//! storage class instead of the declared column type.
//!
//! Postgres returns text-format values for simple-protocol queries and
//! binary-format values for prepared ones. Its decoder handles both, and a
//! non-null value never becomes `null`: anything without a dedicated decoder
//! falls back to the server's text or is logged.

use crate::models::DatabaseType;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Interval,
    Network,
    Money,
    Array,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();
    let base = lower.split_whitespace().next().unwrap_or("");

    // Postgres names arrays "INT4[]"; unnamed array types keep the "_elem" form.
    if lower.ends_with("[]") || (db == DatabaseType::PostgreSQL && lower.starts_with('_')) {
        return TypeCategory::Array;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if base == "bool" || base == "boolean" {
        return TypeCategory::Boolean;
    }

    if base == "interval" {
        return TypeCategory::Interval;
    }

    if base == "money" {
        return TypeCategory::Money;
    }

    if base == "inet" || base == "cidr" || base.starts_with("macaddr") {
        return TypeCategory::Network;
    }

    if base == "date"
        || base == "datetime"
        || base.starts_with("timestamp")
        || base.starts_with("time")
    {
        return TypeCategory::Temporal;
    }

    // int2/int4/int8/integer, tinyint/smallint/bigint, serial types, oid
    if base != "point"
        && (base.starts_with("int")
            || base.ends_with("int")
            || base.contains("serial")
            || base == "oid")
    {
        return TypeCategory::Integer;
    }

    if base.contains("float") || base.contains("double") || base == "real" {
        return TypeCategory::Float;
    }

    if base == "json" || base == "jsonb" {
        return TypeCategory::Json;
    }

    if base == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || base == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || base == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Wrapper type for raw MySQL DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary columns are returned base64-encoded.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Trait for converting database rows to JSON maps keyed by column name.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                (
                    col.name().to_string(),
                    postgres::decode_column(self, idx, type_name, category),
                )
            })
            .collect()
    }
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::MySQL);
                (col.name().to_string(), mysql::decode_column(self, idx, type_name, category))
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let declared = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                (col.name().to_string(), sqlite::decode_column(self, idx, declared))
            })
            .collect()
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::Postgres;
    use sqlx::ValueRef;
    use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};
    use sqlx::postgres::{PgHasArrayType, PgValueFormat, PgValueRef};
    use sqlx::types::{Decimal, Uuid};
    use std::net::IpAddr;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        let raw = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(column = idx, "Failed to read {} column: {}", type_name, e);
                return JsonValue::Null;
            }
        };

        let decoded = match category {
            TypeCategory::Decimal => decode_decimal(row, idx, &raw),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(JsonValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(idx)
                .ok()
                .map(|v| encode_binary_value(&v)),
            TypeCategory::Json => row.try_get::<JsonValue, _>(idx).ok(),
            TypeCategory::Uuid => row
                .try_get::<Uuid, _>(idx)
                .ok()
                .map(|v| JsonValue::String(v.to_string())),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Interval => row
                .try_get::<PgInterval, _>(idx)
                .ok()
                .map(|v| JsonValue::String(format_interval(&v))),
            TypeCategory::Money => row
                .try_get::<PgMoney, _>(idx)
                .ok()
                .map(|v| JsonValue::String(format_money(v.0))),
            TypeCategory::Network => binary_bytes(&raw)
                .and_then(|bytes| format_network(type_name, bytes))
                .map(JsonValue::String),
            TypeCategory::Array => decode_array(row, idx),
            TypeCategory::Text | TypeCategory::Unknown => {
                row.try_get::<String, _>(idx).ok().map(JsonValue::String)
            }
        };

        decoded
            .or_else(|| fallback(row, idx, &raw, category))
            .unwrap_or_else(|| {
                tracing::warn!(
                    column = idx,
                    format = ?raw.format(),
                    "No decoder for {} value, returning null",
                    type_name
                );
                JsonValue::Null
            })
    }

    /// Text-format values are passed through as the server rendered them.
    /// Binary text-like values (enums, citext, domains) are read as UTF-8.
    fn fallback(
        row: &PgRow,
        idx: usize,
        raw: &PgValueRef<'_>,
        category: TypeCategory,
    ) -> Option<JsonValue> {
        if raw.format() == PgValueFormat::Text {
            return raw.as_str().ok().map(|s| JsonValue::String(s.to_string()));
        }
        match category {
            TypeCategory::Text | TypeCategory::Unknown => row
                .try_get_unchecked::<String, _>(idx)
                .ok()
                .map(JsonValue::String),
            _ => None,
        }
    }

    fn binary_bytes<'a>(raw: &'a PgValueRef<'_>) -> Option<&'a [u8]> {
        match raw.format() {
            PgValueFormat::Binary => raw.as_bytes().ok(),
            PgValueFormat::Text => None,
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize, raw: &PgValueRef<'_>) -> Option<JsonValue> {
        match row.try_get::<Decimal, _>(idx) {
            Ok(v) => Some(JsonValue::String(v.to_string())),
            Err(e) => {
                // NaN, infinities and values wider than 28 digits.
                tracing::debug!(column = idx, "NUMERIC outside Decimal range: {}", e);
                binary_bytes(raw)
                    .and_then(format_numeric)
                    .map(JsonValue::String)
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Some(JsonValue::Number(v.into()));
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Some(JsonValue::Number(v.into()));
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Some(JsonValue::Number(v.into()));
        }
        if let Ok(v) = row.try_get::<Oid, _>(idx) {
            return Some(JsonValue::Number(v.0.into()));
        }
        None
    }

    fn decode_float(row: &PgRow, idx: usize) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Some(float_value(v));
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return Some(float_value(v as f64));
        }
        None
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return Some(JsonValue::String(v.to_rfc3339()));
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return Some(JsonValue::String(v.to_string()));
        }
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return Some(JsonValue::String(v.to_string()));
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return Some(JsonValue::String(v.to_string()));
        }
        row.try_get::<PgTimeTz<NaiveTime, FixedOffset>, _>(idx)
            .ok()
            .map(|v| JsonValue::String(format!("{}{}", v.time, v.offset)))
    }

    /// One-dimensional arrays become JSON arrays; NULL elements stay `null`.
    fn decode_array(row: &PgRow, idx: usize) -> Option<JsonValue> {
        array_of::<i64>(row, idx, JsonValue::from)
            .or_else(|| array_of::<i32>(row, idx, JsonValue::from))
            .or_else(|| array_of::<i16>(row, idx, JsonValue::from))
            .or_else(|| array_of::<f64>(row, idx, float_value))
            .or_else(|| array_of::<f32>(row, idx, |v| float_value(v as f64)))
            .or_else(|| array_of::<bool>(row, idx, JsonValue::Bool))
            .or_else(|| array_of::<Decimal>(row, idx, |v| JsonValue::String(v.to_string())))
            .or_else(|| array_of::<Uuid>(row, idx, |v| JsonValue::String(v.to_string())))
            .or_else(|| array_of::<JsonValue>(row, idx, |v| v))
            .or_else(|| {
                array_of::<DateTime<Utc>>(row, idx, |v| JsonValue::String(v.to_rfc3339()))
            })
            .or_else(|| {
                array_of::<NaiveDateTime>(row, idx, |v| JsonValue::String(v.to_string()))
            })
            .or_else(|| array_of::<NaiveDate>(row, idx, |v| JsonValue::String(v.to_string())))
            .or_else(|| array_of::<String>(row, idx, JsonValue::String))
    }

    fn array_of<T>(row: &PgRow, idx: usize, to_json: impl Fn(T) -> JsonValue) -> Option<JsonValue>
    where
        T: for<'r> Decode<'r, Postgres> + Type<Postgres> + PgHasArrayType,
    {
        let values = row.try_get::<Vec<Option<T>>, _>(idx).ok()?;
        Some(JsonValue::Array(
            values
                .into_iter()
                .map(|v| v.map(&to_json).unwrap_or(JsonValue::Null))
                .collect(),
        ))
    }

    /// Render an interval the way Postgres' default `IntervalStyle` does,
    /// e.g. `1 year 2 mons 3 days 04:05:06.5`.
    pub(super) fn format_interval(interval: &PgInterval) -> String {
        fn unit(n: i64, one: &str, many: &str) -> String {
            format!("{} {}", n, if n == 1 { one } else { many })
        }

        let mut parts = Vec::new();
        let years = interval.months / 12;
        let months = interval.months % 12;
        if years != 0 {
            parts.push(unit(years.into(), "year", "years"));
        }
        if months != 0 {
            parts.push(unit(months.into(), "mon", "mons"));
        }
        if interval.days != 0 {
            parts.push(unit(interval.days.into(), "day", "days"));
        }
        if interval.microseconds != 0 || parts.is_empty() {
            let sign = if interval.microseconds < 0 { "-" } else { "" };
            let total = interval.microseconds.unsigned_abs();
            let secs = total / 1_000_000;
            let micros = total % 1_000_000;
            let mut time = format!(
                "{sign}{:02}:{:02}:{:02}",
                secs / 3600,
                (secs / 60) % 60,
                secs % 60
            );
            if micros != 0 {
                time.push('.');
                time.push_str(format!("{micros:06}").trim_end_matches('0'));
            }
            parts.push(time);
        }
        parts.join(" ")
    }

    /// Money is stored in minor units; two fractional digits assumed.
    pub(super) fn format_money(minor_units: i64) -> String {
        let sign = if minor_units < 0 { "-" } else { "" };
        let abs = minor_units.unsigned_abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }

    /// Binary `inet`/`cidr` (family, bits, is_cidr, length, address) and
    /// `macaddr`/`macaddr8` (raw octets).
    pub(super) fn format_network(type_name: &str, bytes: &[u8]) -> Option<String> {
        if type_name.to_lowercase().starts_with("macaddr") {
            let octets: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
            return Some(octets.join(":"));
        }

        let [family, bits, is_cidr, len, addr @ ..] = bytes else {
            return None;
        };
        let addr = match (*family, *len) {
            (2, 4) => IpAddr::from(<[u8; 4]>::try_from(addr).ok()?),
            (3, 16) => IpAddr::from(<[u8; 16]>::try_from(addr).ok()?),
            _ => return None,
        };
        let full = if addr.is_ipv4() { 32 } else { 128 };
        if *is_cidr == 0 && *bits == full {
            Some(addr.to_string())
        } else {
            Some(format!("{addr}/{bits}"))
        }
    }

    /// Binary NUMERIC: ndigits, weight, sign, dscale, then base-10000 digits.
    pub(super) fn format_numeric(bytes: &[u8]) -> Option<String> {
        let word = |i: usize| {
            bytes
                .get(i * 2..i * 2 + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
        };
        let ndigits = usize::from(word(0)?);
        let weight = i32::from(word(1)? as i16);
        let sign = word(2)?;
        let dscale = usize::from(word(3)?);

        match sign {
            0xC000 => return Some("NaN".to_string()),
            0xD000 => return Some("Infinity".to_string()),
            0xF000 => return Some("-Infinity".to_string()),
            _ => {}
        }

        let digits: Vec<u16> = (0..ndigits).map(|i| word(4 + i)).collect::<Option<_>>()?;
        // Digit whose place value is 10000^position.
        let digit_at = |position: i32| -> u16 {
            usize::try_from(weight - position)
                .ok()
                .and_then(|i| digits.get(i).copied())
                .unwrap_or(0)
        };

        let mut out = String::new();
        if sign == 0x4000 {
            out.push('-');
        }
        if weight < 0 {
            out.push('0');
        } else {
            out.push_str(&digit_at(weight).to_string());
            for position in (0..weight).rev() {
                out.push_str(&format!("{:04}", digit_at(position)));
            }
        }
        if dscale > 0 {
            let mut fraction = String::new();
            let mut position = -1;
            while fraction.len() < dscale {
                fraction.push_str(&format!("{:04}", digit_at(position)));
                position -= 1;
            }
            fraction.truncate(dscale);
            out.push('.');
            out.push_str(&fraction);
        }
        Some(out)
    }
}

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| encode_binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<JsonValue>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }

    fn decode_text(row: &MySqlRow, idx: usize, type_name: &str) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            if type_name.to_lowercase().contains("json") {
                if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                    return json;
                }
            }
            return JsonValue::String(v);
        }
        JsonValue::Null
    }
}

mod sqlite {
    use super::*;
    use sqlx::ValueRef;

    pub fn decode_column(row: &SqliteRow, idx: usize, declared: TypeCategory) -> JsonValue {
        let storage_class = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_uppercase(),
            Err(_) => return JsonValue::Null,
        };

        match storage_class.as_str() {
            "INTEGER" => decode_integer(row, idx, declared),
            "REAL" => row
                .try_get::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(idx)
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx, declared),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize, declared: TypeCategory) -> JsonValue {
        match row.try_get::<i64, _>(idx) {
            Ok(v) if declared == TypeCategory::Boolean => JsonValue::Bool(v != 0),
            Ok(v) => JsonValue::Number(v.into()),
            Err(_) => JsonValue::Null,
        }
    }

    fn decode_text(row: &SqliteRow, idx: usize, declared: TypeCategory) -> JsonValue {
        match row.try_get::<String, _>(idx) {
            Ok(v) if declared == TypeCategory::Json => {
                serde_json::from_str::<JsonValue>(&v).unwrap_or(JsonValue::String(v))
            }
            Ok(v) => JsonValue::String(v),
            Err(_) => JsonValue::Null,
        }
    }
}
