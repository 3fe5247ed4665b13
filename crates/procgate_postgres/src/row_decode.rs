//! Decode arbitrary result rows into JSON values by the column's Postgres type.
//!
//! A column plan is built from the described result columns before the call
//! runs. Types with a direct mapping are read natively. NUMERIC and every type
//! without one are selected in their text form, so a non-null value never
//! decodes to null and no digits are lost.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::types::{PgInterval, PgMoney};
use sqlx::postgres::{PgColumn, PgRow, PgTypeInfo, PgTypeKind};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use uuid::Uuid;

use procgate_core::identifier::quote_ident;
use procgate_core::ports::RawRow;

/// Fractional digits of `money` under the common `lc_monetary` locales.
const MONEY_SCALE: u32 = 2;

/// Types read straight from the binary protocol.
const NATIVE_TYPES: &[&str] = &[
    "BOOL", "INT2", "INT4", "INT8", "FLOAT4", "FLOAT8", "MONEY", "UUID", "DATE", "TIME",
    "TIMESTAMP", "TIMESTAMPTZ", "INTERVAL", "JSON", "JSONB", "BYTEA", "TEXT", "VARCHAR", "BPCHAR",
    "NAME", "VOID", "BOOL[]", "INT2[]", "INT4[]", "INT8[]", "FLOAT4[]", "FLOAT8[]", "TEXT[]",
    "VARCHAR[]", "BPCHAR[]", "UUID[]",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Native,
    /// Enum label, read from the raw value.
    Enum,
    /// Selected as text and emitted as a number only when that is exact.
    Numeric,
    /// Selected as the type's text output.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumn {
    pub name: String,
    /// Postgres type name as sqlx reports it (`INT4`, `mood`, `INET`).
    pub type_name: String,
    pub decoder: Decoder,
}

pub fn plan_columns(columns: &[PgColumn]) -> Vec<ResultColumn> {
    columns
        .iter()
        .map(|c| ResultColumn {
            name: c.name().to_string(),
            type_name: c.type_info().name().to_string(),
            decoder: decoder_for(c.type_info()),
        })
        .collect()
}

fn decoder_for(info: &PgTypeInfo) -> Decoder {
    if matches!(info.kind(), PgTypeKind::Enum(_)) {
        return Decoder::Enum;
    }
    match info.name() {
        "NUMERIC" => Decoder::Numeric,
        name if NATIVE_TYPES.contains(&name) => Decoder::Native,
        _ => Decoder::Text,
    }
}

/// Declared (name, lowercase type name) of every planned column.
pub fn declared_columns(plan: &[ResultColumn]) -> Vec<(String, String)> {
    plan.iter()
        .map(|c| (c.name.clone(), c.type_name.to_ascii_lowercase()))
        .collect()
}

/// True when some column has to be selected as text.
pub fn needs_text_projection(plan: &[ResultColumn]) -> bool {
    plan.iter()
        .any(|c| matches!(c.decoder, Decoder::Numeric | Decoder::Text))
}

/// `SELECT ... FROM <target> AS r(c1, c2, ...)`, with every numeric or
/// text-decoded column rendered by its output function. Columns are aliased
/// positionally, so duplicate result names stay addressable.
pub fn text_projection(target: &str, plan: &[ResultColumn]) -> String {
    let aliases = (1..=plan.len())
        .map(|i| quote_ident(&format!("c{i}")))
        .collect::<Vec<_>>()
        .join(", ");
    let select = plan
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let cell = format!("r.{}", quote_ident(&format!("c{}", i + 1)));
            let expr = match col.decoder {
                Decoder::Native | Decoder::Enum => cell,
                Decoder::Numeric => format!("{cell}::text"),
                Decoder::Text => {
                    format!("CASE WHEN {cell} IS NULL THEN NULL ELSE format('%s', {cell}) END")
                }
            };
            format!("{expr} AS {}", quote_ident(&col.name))
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {select} FROM {target} AS r({aliases})")
}

pub fn decode_row(row: &PgRow, plan: &[ResultColumn]) -> RawRow {
    row.columns()
        .iter()
        .map(|c| {
            let idx = c.ordinal();
            let decoder = plan.get(idx).map_or(Decoder::Native, |p| p.decoder);
            let value = decode_cell(row, idx, c.type_info(), decoder);
            (c.name().to_string(), value)
        })
        .collect()
}

fn decode_cell(row: &PgRow, idx: usize, info: &PgTypeInfo, decoder: Decoder) -> Value {
    let selected_as_text = matches!(info.name(), "TEXT" | "VARCHAR");
    let decoded = match decoder {
        Decoder::Native => decode_native(row, idx, info.name()),
        Decoder::Enum => decode_label(row, idx),
        Decoder::Numeric if selected_as_text => row
            .try_get::<Option<String>, _>(idx)
            .map(|v| v.map_or(Value::Null, |s| numeric_text_to_json(&s))),
        // Not projected (CALL results): best effort through Decimal.
        Decoder::Numeric => row
            .try_get::<Option<Decimal>, _>(idx)
            .map(|v| v.map_or(Value::Null, |d| numeric_text_to_json(&d.to_string()))),
        Decoder::Text => row.try_get::<Option<String>, _>(idx).map(json),
    };

    decoded.unwrap_or_else(|e| {
        tracing::warn!(column = idx, type_name = info.name(), error = %e, "undecodable column value, returning null");
        Value::Null
    })
}

fn decode_native(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map(json),
        "INT2" => row.try_get::<Option<i16>, _>(idx).map(json),
        "INT4" => row.try_get::<Option<i32>, _>(idx).map(json),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map(json),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx).map(json),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map(json),
        "MONEY" => row.try_get::<Option<PgMoney>, _>(idx).map(|v| {
            v.map_or(Value::Null, |m| {
                numeric_text_to_json(&m.to_decimal(MONEY_SCALE).to_string())
            })
        }),
        "UUID" => row
            .try_get::<Option<Uuid>, _>(idx)
            .map(|v| json(v.map(|u| u.to_string()))),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map(|v| json(v.map(|d| d.to_string()))),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .map(|v| json(v.map(|t| t.to_string()))),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map(|v| json(v.map(|t| t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map(|v| json(v.map(|t| t.to_rfc3339()))),
        "INTERVAL" => row
            .try_get::<Option<PgInterval>, _>(idx)
            .map(|v| json(v.map(|i| iso_duration(&i)))),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(idx)
            .map(|v| v.unwrap_or(Value::Null)),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| json(v.map(|b| hex(&b)))),
        "VOID" => Ok(Value::Null),
        "BOOL[]" => array::<bool>(row, idx),
        "INT2[]" => array::<i16>(row, idx),
        "INT4[]" => array::<i32>(row, idx),
        "INT8[]" => array::<i64>(row, idx),
        "FLOAT4[]" => array::<f32>(row, idx),
        "FLOAT8[]" => array::<f64>(row, idx),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" => array::<String>(row, idx),
        "UUID[]" => row.try_get::<Option<Vec<Option<Uuid>>>, _>(idx).map(|v| {
            json(v.map(|items| {
                items
                    .into_iter()
                    .map(|u| json(u.map(|u| u.to_string())))
                    .collect::<Vec<_>>()
            }))
        }),
        _ => row.try_get::<Option<String>, _>(idx).map(json),
    }
}

fn array<T>(row: &PgRow, idx: usize) -> Result<Value, sqlx::Error>
where
    T: Into<Value> + for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    Option<T>: sqlx::postgres::PgHasArrayType,
{
    row.try_get::<Option<Vec<Option<T>>>, _>(idx)
        .map(|v| json(v.map(|items| items.into_iter().map(json).collect::<Vec<_>>())))
}

/// Enum values travel as their label in both wire formats.
fn decode_label(row: &PgRow, idx: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let label = raw.as_str().map_err(|e| sqlx::Error::ColumnDecode {
        index: idx.to_string(),
        source: e,
    })?;
    Ok(Value::String(label.to_string()))
}

fn json<T: Into<Value>>(v: Option<T>) -> Value {
    v.map_or(Value::Null, Into::into)
}

/// A JSON number when the f64 reading keeps every digit, else the exact text.
/// `NaN` and the infinities stay strings.
fn numeric_text_to_json(text: &str) -> Value {
    let exact = text
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .filter(|f| trim_fraction(&f.to_string()) == trim_fraction(text))
        .and_then(serde_json::Number::from_f64);
    match exact {
        Some(n) => Value::Number(n),
        None => Value::String(text.to_string()),
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`; zero is `PT0S`.
fn iso_duration(i: &PgInterval) -> String {
    let mut out = String::from("P");
    for (value, unit) in [(i.months / 12, 'Y'), (i.months % 12, 'M'), (i.days, 'D')] {
        if value != 0 {
            out.push_str(&format!("{value}{unit}"));
        }
    }
    const HOUR: i64 = 3_600_000_000;
    const MINUTE: i64 = 60_000_000;
    let (hours, rest) = (i.microseconds / HOUR, i.microseconds % HOUR);
    let (minutes, micros) = (rest / MINUTE, rest % MINUTE);
    if hours != 0 || minutes != 0 || micros != 0 {
        out.push('T');
        if hours != 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes != 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if micros != 0 {
            let sign = if micros < 0 { "-" } else { "" };
            let abs = micros.unsigned_abs();
            let seconds = format!("{}.{:06}", abs / 1_000_000, abs % 1_000_000);
            out.push_str(&format!("{sign}{}S", trim_fraction(&seconds)));
        }
    }
    if out == "P" {
        out.push_str("T0S");
    }
    out
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("\\x");
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
