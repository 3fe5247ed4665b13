//! Parameter coercion.
//!
//! Turns a loosely typed client value into the native value a parameter
//! declaration requires. Dispatch is a lookup over [`TYPE_FAMILIES`]; any type
//! name not listed there falls through to [`DEFAULT_FAMILY`] (text with an
//! optional length bound).

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ProcGateError, Result};
use crate::types::{CoercedParameter, ExecutionRequest, ParameterDescriptor, SqlValue};

// ── Type family table ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    BigInteger,
    Decimal,
    Float,
    Boolean,
    Temporal,
    Identifier,
    Text,
}

/// One row of the dispatch table: which type names belong to a family and
/// how a non-empty text value is parsed for it.
pub struct FamilyRule {
    pub family: TypeFamily,
    pub type_names: &'static [&'static str],
    /// Human wording used in "expects ..." messages.
    pub expects: &'static str,
    parse: fn(&ParameterDescriptor, &str) -> Option<SqlValue>,
}

pub static TYPE_FAMILIES: &[FamilyRule] = &[
    FamilyRule {
        family: TypeFamily::Integer,
        type_names: &["int", "integer", "int4", "smallint", "int2", "tinyint", "serial"],
        expects: "an integer",
        parse: |_, s| s.parse::<i32>().ok().map(SqlValue::Int),
    },
    FamilyRule {
        family: TypeFamily::BigInteger,
        type_names: &["bigint", "int8", "bigserial"],
        expects: "a bigint",
        parse: |_, s| s.parse::<i64>().ok().map(SqlValue::BigInt),
    },
    FamilyRule {
        family: TypeFamily::Decimal,
        type_names: &["decimal", "numeric", "money", "smallmoney"],
        expects: "a decimal",
        parse: |_, s| parse_decimal(s).map(SqlValue::Decimal),
    },
    FamilyRule {
        family: TypeFamily::Float,
        type_names: &["float", "real", "float4", "float8", "double precision"],
        expects: "a floating point number",
        parse: |_, s| s.parse::<f64>().ok().map(SqlValue::Float),
    },
    FamilyRule {
        family: TypeFamily::Boolean,
        type_names: &["bit", "bool", "boolean"],
        expects: "a boolean (true/false)",
        parse: |_, s| parse_bool(s).map(SqlValue::Bool),
    },
    FamilyRule {
        family: TypeFamily::Temporal,
        type_names: &[
            "date",
            "datetime",
            "datetime2",
            "smalldatetime",
            "datetimeoffset",
            "timestamp",
            "timestamptz",
            "timestamp without time zone",
            "timestamp with time zone",
        ],
        expects: "a date/time",
        parse: |_, s| parse_temporal(s),
    },
    FamilyRule {
        family: TypeFamily::Identifier,
        type_names: &["uniqueidentifier", "uuid"],
        expects: "a GUID",
        parse: |_, s| Uuid::parse_str(s).ok().map(SqlValue::Uuid),
    },
];

/// Fallback for every type name not in [`TYPE_FAMILIES`].
pub static DEFAULT_FAMILY: FamilyRule = FamilyRule {
    family: TypeFamily::Text,
    type_names: &[],
    expects: "text",
    parse: |d, s| {
        let too_long = d.max_length > 0 && s.chars().count() > d.max_length as usize;
        (!too_long).then(|| SqlValue::Text(s.to_string()))
    },
};

/// Resolve the rule for a type name (case-insensitive, surrounding space ignored).
pub fn rule_for(sql_type: &str) -> &'static FamilyRule {
    let wanted = sql_type.trim().to_ascii_lowercase();
    TYPE_FAMILIES
        .iter()
        .find(|rule| rule.type_names.contains(&wanted.as_str()))
        .unwrap_or(&DEFAULT_FAMILY)
}

pub fn family_of(sql_type: &str) -> TypeFamily {
    rule_for(sql_type).family
}

// ── Parsers ───────────────────────────────────────────────────

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "0" => Some(false),
        "1" => Some(true),
        _ if s.eq_ignore_ascii_case("true") => Some(true),
        _ if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d %b %Y", "%b %d %Y"];

/// Permissive date/time parse: offset-qualified forms keep their offset,
/// everything else is a naive local date-time (date-only means midnight).
fn parse_temporal(s: &str) -> Option<SqlValue> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(SqlValue::DateTimeOffset(dt));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f %z") {
        return Some(SqlValue::DateTimeOffset(dt));
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    {
        return Some(SqlValue::DateTime(dt));
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(SqlValue::DateTime)
}

// ── Validation ────────────────────────────────────────────────

/// Render a raw JSON value the way a client would have typed it.
pub fn raw_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Coerce one raw value against its descriptor.
///
/// Never panics: every parse failure is reported as [`ProcGateError::Validation`]
/// naming the parameter. The verbose `detail` additionally echoes the rejected value.
pub fn validate(descriptor: &ParameterDescriptor, raw: Option<&Value>) -> Result<CoercedParameter> {
    let text = raw.and_then(raw_text);
    let coerced = |value: SqlValue| CoercedParameter {
        name: descriptor.name.clone(),
        value,
        sql_type: descriptor.sql_type.clone(),
        is_output: descriptor.is_output,
        is_nullable: descriptor.is_nullable,
        raw_text: text.clone(),
    };

    let trimmed = text.as_deref().map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        if descriptor.is_nullable {
            return Ok(coerced(SqlValue::Null));
        }
        return Err(rejected(
            descriptor,
            format!("parameter {} cannot be null", descriptor.name),
            text.as_deref(),
        ));
    }

    let rule = rule_for(&descriptor.sql_type);
    // Text keeps surrounding whitespace; every other family parses trimmed input.
    let input = match rule.family {
        TypeFamily::Text => text.as_deref().unwrap_or_default(),
        _ => trimmed,
    };
    match (rule.parse)(descriptor, input) {
        Some(value) => Ok(coerced(value)),
        None if rule.family == TypeFamily::Text => Err(rejected(
            descriptor,
            format!(
                "parameter {} exceeds max length {}",
                descriptor.name, descriptor.max_length
            ),
            text.as_deref(),
        )),
        None => Err(rejected(
            descriptor,
            format!("parameter {} expects {}", descriptor.name, rule.expects),
            text.as_deref(),
        )),
    }
}

fn rejected(descriptor: &ParameterDescriptor, message: String, sent: Option<&str>) -> ProcGateError {
    let detail = format!(
        "validation failed for {}: {}. Sent value: {}",
        descriptor.name,
        message,
        sent.unwrap_or("<null>")
    );
    ProcGateError::Validation {
        parameter: descriptor.name.clone(),
        message,
        detail: Some(detail),
    }
}

/// Check that every required input parameter has a key in the request.
///
/// Fails on the first missing one; the verbose detail lists every
/// non-output parameter the procedure declares.
pub fn preflight(descriptors: &[ParameterDescriptor], request: &ExecutionRequest) -> Result<()> {
    let missing = descriptors
        .iter()
        .filter(|d| d.is_required())
        .find(|d| !request.parameters.keys().any(|k| d.matches_key(k)));

    match missing {
        None => Ok(()),
        Some(d) => {
            let message = format!("missing required parameter: {}", d.name);
            let expected: Vec<&str> = descriptors
                .iter()
                .filter(|d| !d.is_output)
                .map(|d| d.name.as_str())
                .collect();
            let detail = format!("{message}. Expected parameters: {}", expected.join(", "));
            Err(ProcGateError::Validation {
                parameter: d.name.clone(),
                message,
                detail: Some(detail),
            })
        }
    }
}

/// Coerce every input parameter of a procedure, in catalog order.
/// The first failure short-circuits.
pub fn coerce_all(
    descriptors: &[ParameterDescriptor],
    request: &ExecutionRequest,
) -> Result<Vec<CoercedParameter>> {
    descriptors
        .iter()
        .filter(|d| !d.is_output)
        .map(|d| validate(d, request.raw_value_for(d)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn int_param() -> ParameterDescriptor {
        ParameterDescriptor::new("customerId", "int")
    }

    fn ok(d: &ParameterDescriptor, v: Value) -> SqlValue {
        validate(d, Some(&v)).expect("should coerce").value
    }

    fn fails(d: &ParameterDescriptor, v: Value) -> String {
        match validate(d, Some(&v)) {
            Err(ProcGateError::Validation { message, .. }) => message,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    // ── null handling ────────────────────────────────────────────

    #[test]
    fn nullable_accepts_null_and_blank() {
        let d = int_param().nullable();
        assert_eq!(validate(&d, None).unwrap().value, SqlValue::Null);
        assert_eq!(ok(&d, Value::Null), SqlValue::Null);
        assert_eq!(ok(&d, json!("")), SqlValue::Null);
        assert_eq!(ok(&d, json!("   ")), SqlValue::Null);
    }

    #[test]
    fn non_nullable_rejects_null_and_blank() {
        let d = int_param();
        assert!(validate(&d, None).is_err());
        assert_eq!(fails(&d, Value::Null), "parameter customerId cannot be null");
        assert_eq!(fails(&d, json!("")), "parameter customerId cannot be null");
    }

    // ── integer family ───────────────────────────────────────────

    #[test]
    fn integer_parses_text_and_numbers() {
        let d = int_param();
        assert_eq!(ok(&d, json!("42")), SqlValue::Int(42));
        assert_eq!(ok(&d, json!(" -7 ")), SqlValue::Int(-7));
        assert_eq!(ok(&d, json!(42)), SqlValue::Int(42));
    }

    #[test]
    fn integer_rejects_non_numeric() {
        let d = int_param();
        assert_eq!(fails(&d, json!("abc")), "parameter customerId expects an integer");
        assert!(validate(&d, Some(&json!("4.5"))).is_err());
        assert!(validate(&d, Some(&json!("99999999999"))).is_err());
    }

    #[test]
    fn bigint_holds_wide_values() {
        let d = ParameterDescriptor::new("n", "BIGINT");
        assert_eq!(ok(&d, json!("99999999999")), SqlValue::BigInt(99_999_999_999));
    }

    // ── numeric families ─────────────────────────────────────────

    #[test]
    fn decimal_and_float() {
        let dec = ParameterDescriptor::new("amount", "numeric");
        assert_eq!(
            ok(&dec, json!("250.10")),
            SqlValue::Decimal(Decimal::from_str("250.10").unwrap())
        );
        assert_eq!(
            ok(&dec, json!("1e3")),
            SqlValue::Decimal(Decimal::from(1000))
        );
        assert!(validate(&dec, Some(&json!("ten"))).is_err());

        let f = ParameterDescriptor::new("ratio", "double precision");
        assert_eq!(ok(&f, json!(0.5)), SqlValue::Float(0.5));
        assert_eq!(fails(&f, json!("x")), "parameter ratio expects a floating point number");
    }

    // ── boolean family ───────────────────────────────────────────

    #[test]
    fn boolean_accepts_words_and_digits() {
        let d = ParameterDescriptor::new("active", "bit");
        assert_eq!(ok(&d, json!("1")), SqlValue::Bool(true));
        assert_eq!(ok(&d, json!("true")), SqlValue::Bool(true));
        assert_eq!(ok(&d, json!("True")), SqlValue::Bool(true));
        assert_eq!(ok(&d, json!(true)), SqlValue::Bool(true));
        assert_eq!(ok(&d, json!("0")), SqlValue::Bool(false));
        assert_eq!(ok(&d, json!("FALSE")), SqlValue::Bool(false));
    }

    #[test]
    fn boolean_rejects_other_words() {
        let d = ParameterDescriptor::new("active", "boolean");
        assert!(validate(&d, Some(&json!("maybe"))).is_err());
        assert!(validate(&d, Some(&json!("2"))).is_err());
        assert!(validate(&d, Some(&json!("yes"))).is_err());
    }

    // ── temporal family ──────────────────────────────────────────

    #[test]
    fn temporal_is_permissive() {
        let d = ParameterDescriptor::new("from", "datetime2");
        match ok(&d, json!("2024-03-01")) {
            SqlValue::DateTime(dt) => {
                assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 3, 1));
                assert_eq!(dt.hour(), 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(ok(&d, json!("2024-03-01 13:45:00")), SqlValue::DateTime(_)));
        assert!(matches!(ok(&d, json!("2024-03-01T13:45")), SqlValue::DateTime(_)));
        assert!(matches!(ok(&d, json!("03/01/2024")), SqlValue::DateTime(_)));
        assert!(matches!(
            ok(&d, json!("2024-03-01T13:45:00+02:00")),
            SqlValue::DateTimeOffset(_)
        ));
        assert_eq!(fails(&d, json!("yesterday")), "parameter from expects a date/time");
    }

    // ── identifier family ────────────────────────────────────────

    #[test]
    fn uuid_parses_or_fails() {
        let d = ParameterDescriptor::new("id", "uniqueidentifier");
        let id = Uuid::new_v4();
        assert_eq!(ok(&d, json!(id.to_string())), SqlValue::Uuid(id));
        assert_eq!(fails(&d, json!("not-a-guid")), "parameter id expects a GUID");
    }

    // ── default / string family ──────────────────────────────────

    #[test]
    fn string_respects_max_length() {
        let d = ParameterDescriptor::new("code", "nvarchar").with_max_length(5);
        assert_eq!(ok(&d, json!("abcde")), SqlValue::Text("abcde".into()));
        assert_eq!(fails(&d, json!("abcdef")), "parameter code exceeds max length 5");
    }

    #[test]
    fn string_without_bound_passes_through() {
        let d = ParameterDescriptor::new("note", "text").with_max_length(-1);
        let long = "x".repeat(10_000);
        assert_eq!(ok(&d, json!(long.clone())), SqlValue::Text(long));
        assert_eq!(ok(&d, json!(" padded ")), SqlValue::Text(" padded ".into()));
    }

    #[test]
    fn unknown_types_use_default_rule() {
        assert_eq!(family_of("xml"), TypeFamily::Text);
        assert_eq!(family_of("  INT "), TypeFamily::Integer);
        assert_eq!(family_of("Timestamp With Time Zone"), TypeFamily::Temporal);
    }

    #[test]
    fn every_table_entry_is_lowercase_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for rule in TYPE_FAMILIES {
            for name in rule.type_names {
                assert_eq!(*name, name.to_ascii_lowercase());
                assert!(seen.insert(*name), "{name} listed twice");
            }
        }
    }

    #[test]
    fn verbose_detail_echoes_sent_value() {
        match validate(&int_param(), Some(&json!("abc"))) {
            Err(ProcGateError::Validation { detail, parameter, .. }) => {
                assert_eq!(parameter, "customerId");
                let detail = detail.unwrap();
                assert!(detail.starts_with("validation failed for customerId"));
                assert!(detail.ends_with("Sent value: abc"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // ── preflight / coerce_all ───────────────────────────────────

    fn orders_params() -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor::new("@customerId", "int"),
            ParameterDescriptor::new("@since", "date").nullable(),
            ParameterDescriptor::new("@total", "money").output(),
        ]
    }

    #[test]
    fn preflight_names_first_missing() {
        let req = ExecutionRequest::new("sales", "get_orders");
        match preflight(&orders_params(), &req) {
            Err(ProcGateError::Validation {
                message, detail, ..
            }) => {
                assert_eq!(message, "missing required parameter: customerId");
                assert_eq!(
                    detail.unwrap(),
                    "missing required parameter: customerId. Expected parameters: customerId, since"
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn preflight_matches_sigil_and_case() {
        let req = ExecutionRequest::new("sales", "get_orders").with_parameter("@CUSTOMERID", "7");
        assert!(preflight(&orders_params(), &req).is_ok());
    }

    #[test]
    fn coerce_all_skips_outputs_and_nulls_optional() {
        let req = ExecutionRequest::new("sales", "get_orders").with_parameter("customerId", "7");
        let coerced = coerce_all(&orders_params(), &req).unwrap();
        assert_eq!(coerced.len(), 2);
        assert_eq!(coerced[0].value, SqlValue::Int(7));
        assert_eq!(coerced[0].raw_text.as_deref(), Some("7"));
        assert_eq!(coerced[1].value, SqlValue::Null);
        assert_eq!(coerced[1].raw_text, None);
    }

    #[test]
    fn coercion_is_deterministic() {
        let d = ParameterDescriptor::new("amount", "decimal");
        let a = validate(&d, Some(&json!("12.50"))).unwrap();
        let b = validate(&d, Some(&json!("12.50"))).unwrap();
        assert_eq!(a, b);
    }
}
