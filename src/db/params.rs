//! Positional parameter binding.
//!
//! MySQL and SQLite take each parameter with its natural type. Postgres
//! prepares the statement first and encodes every parameter for the type the
//! server inferred for its placeholder, so a JSON string can feed a `date`,
//! `timestamptz` or `uuid` column the way an untyped literal would.

use crate::models::QueryParam;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::query::Query;
use sqlx::types::{Decimal, Json, Uuid};
use sqlx::{Database, Encode, Postgres, Type, TypeInfo};
use std::str::FromStr;

/// Bind `params` in order onto `query`.
///
/// Arrays and objects are bound as JSON; SQLite stores them as text.
pub(crate) fn bind_params<'q, DB>(
    mut query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    params: &'q [QueryParam],
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    Json<&'q JsonValue>: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Json(v) => query.bind(Json(v)),
        };
    }
    query
}

/// Bind `params` onto a prepared Postgres query. `targets` are the parameter
/// types the server inferred when the statement was prepared.
pub(crate) fn bind_inferred<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [QueryParam],
    targets: &[PgTypeInfo],
) -> Query<'q, Postgres, PgArguments> {
    for (idx, param) in params.iter().enumerate() {
        let target = targets
            .get(idx)
            .cloned()
            .unwrap_or_else(<&str as Type<Postgres>>::type_info);
        query = query.bind(InferredParam { param, target });
    }
    query
}

/// A parameter encoded for the type of the placeholder it fills.
pub(crate) struct InferredParam<'q> {
    param: &'q QueryParam,
    target: PgTypeInfo,
}

impl Type<Postgres> for InferredParam<'_> {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }
}

impl Encode<'_, Postgres> for InferredParam<'_> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let target = self.target.name();
        match self.param {
            QueryParam::Null => Ok(IsNull::Yes),
            QueryParam::Bool(v) => encode_bool(*v, target, buf),
            QueryParam::Int(v) => encode_int(*v, target, buf),
            QueryParam::Float(v) => encode_float(*v, target, buf),
            QueryParam::String(v) => encode_string(v, target, buf),
            QueryParam::Json(v) => encode_json(v, target, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(self.target.clone())
    }
}

fn put<'q, T>(value: T, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError>
where
    T: Encode<'q, Postgres>,
{
    value.encode_by_ref(buf)
}

fn encode_bool(v: bool, target: &str, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
    match target {
        "BOOL" => put(v, buf),
        "JSON" | "JSONB" => put(Json(v), buf),
        _ => put(if v { "true" } else { "false" }, buf),
    }
}

fn encode_int(v: i64, target: &str, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
    match target {
        "INT2" => put(i16::try_from(v)?, buf),
        "INT4" => put(i32::try_from(v)?, buf),
        "INT8" => put(v, buf),
        "OID" => put(Oid(u32::try_from(v)?), buf),
        "FLOAT4" => put(v as f32, buf),
        "FLOAT8" => put(v as f64, buf),
        "NUMERIC" => put(Decimal::from(v), buf),
        "BOOL" => match v {
            0 => put(false, buf),
            1 => put(true, buf),
            _ => Err(format!("{v} is not a valid boolean").into()),
        },
        "JSON" | "JSONB" => put(Json(v), buf),
        _ => put(v.to_string().as_str(), buf),
    }
}

fn encode_float(v: f64, target: &str, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
    match target {
        "FLOAT4" => put(v as f32, buf),
        "FLOAT8" => put(v, buf),
        "NUMERIC" => put(Decimal::try_from(v)?, buf),
        "INT2" | "INT4" | "INT8" if v.fract() == 0.0 => encode_int(v as i64, target, buf),
        "JSON" | "JSONB" => put(Json(v), buf),
        _ => put(v.to_string().as_str(), buf),
    }
}

fn encode_string(v: &str, target: &str, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
    let trimmed = v.trim();
    match target {
        "BOOL" => put(parse_bool(trimmed)?, buf),
        "INT2" => put(trimmed.parse::<i16>()?, buf),
        "INT4" => put(trimmed.parse::<i32>()?, buf),
        "INT8" => put(trimmed.parse::<i64>()?, buf),
        "FLOAT4" => put(trimmed.parse::<f32>()?, buf),
        "FLOAT8" => put(trimmed.parse::<f64>()?, buf),
        "NUMERIC" => put(
            Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed))?,
            buf,
        ),
        "UUID" => put(Uuid::parse_str(trimmed)?, buf),
        "DATE" => put(NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")?, buf),
        "TIME" => put(NaiveTime::from_str(trimmed)?, buf),
        "TIMESTAMP" => put(parse_timestamp(trimmed)?, buf),
        "TIMESTAMPTZ" => put(parse_timestamptz(trimmed)?, buf),
        "JSON" | "JSONB" => put(Json(serde_json::from_str::<JsonValue>(v)?), buf),
        // Text-like types (text, varchar, bpchar, name, enums, citext)
        // take the raw UTF-8 bytes.
        _ => put(v, buf),
    }
}

fn encode_json(
    v: &JsonValue,
    target: &str,
    buf: &mut PgArgumentBuffer,
) -> Result<IsNull, BoxDynError> {
    match target {
        "JSON" | "JSONB" => put(Json(v), buf),
        "INT2[]" => put(
            json_array(v, |e| e.as_i64().and_then(|n| i16::try_from(n).ok()))?,
            buf,
        ),
        "INT4[]" => put(
            json_array(v, |e| e.as_i64().and_then(|n| i32::try_from(n).ok()))?,
            buf,
        ),
        "INT8[]" => put(json_array(v, JsonValue::as_i64)?, buf),
        "FLOAT4[]" => put(json_array(v, |e| e.as_f64().map(|n| n as f32))?, buf),
        "FLOAT8[]" => put(json_array(v, JsonValue::as_f64)?, buf),
        "BOOL[]" => put(json_array(v, JsonValue::as_bool)?, buf),
        "UUID[]" => put(
            json_array(v, |e| e.as_str().and_then(|s| Uuid::parse_str(s).ok()))?,
            buf,
        ),
        "TEXT[]" => put(
            json_array(v, |e| {
                Some(match e {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                })
            })?,
            buf,
        ),
        _ => put(v.to_string().as_str(), buf),
    }
}

/// Convert a JSON array element by element; `null` elements stay NULL.
fn json_array<T>(
    value: &JsonValue,
    element: impl Fn(&JsonValue) -> Option<T>,
) -> Result<Vec<Option<T>>, BoxDynError> {
    let items = value.as_array().ok_or("expected a JSON array")?;
    items
        .iter()
        .map(|item| {
            if item.is_null() {
                return Ok(None);
            }
            element(item)
                .map(Some)
                .ok_or_else(|| BoxDynError::from(format!("unsupported array element {item}")))
        })
        .collect()
}

/// Boolean spellings Postgres accepts on input.
fn parse_bool(s: &str) -> Result<bool, BoxDynError> {
    match s.to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("invalid input syntax for type boolean: \"{other}\"").into()),
    }
}

/// A `timestamp` drops any offset and keeps the wall-clock time.
fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxDynError> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(v) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(v);
        }
    }
    if let Ok(v) = DateTime::parse_from_rfc3339(s) {
        return Ok(v.naive_local());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")?
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| "invalid date".into())
}

/// A `timestamptz` without an offset is taken as UTC.
fn parse_timestamptz(s: &str) -> Result<DateTime<Utc>, BoxDynError> {
    if let Ok(v) = DateTime::parse_from_rfc3339(s) {
        return Ok(v.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(v) = DateTime::parse_from_str(s, format) {
            return Ok(v.with_timezone(&Utc));
        }
    }
    Ok(parse_timestamp(s)?.and_utc())
}
