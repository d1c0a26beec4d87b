//! Value literalization.
//!
//! Values go through a generic coercion first: nulls, booleans, numbers,
//! dates and bytes have exact literal forms, optionally guided by the target
//! column's abstract type. Anything left over is written as a quoted string
//! literal with embedded quotes escaped.

use crate::db::{hex, AbstractType, ColumnSchema, Value};
use chrono::{NaiveDate, NaiveDateTime};

/// Literal SQL text for `value`, as stored in `column` when known.
pub fn literal(value: &Value, column: Option<&ColumnSchema>) -> String {
    coerce(value, column.map(|c| c.column_type))
        .unwrap_or_else(|| quote_string(&value.display()))
}

/// Generic coercion. `None` means the value has no typed literal form and must
/// be quoted as text.
pub fn coerce(value: &Value, column_type: Option<AbstractType>) -> Option<String> {
    if value.is_null() {
        return Some("NULL".to_string());
    }

    match column_type {
        Some(AbstractType::Boolean) => return boolean(value).map(|b| i64::from(b).to_string()),
        Some(AbstractType::Integer) => return value.as_i64().map(|i| i.to_string()),
        Some(AbstractType::Float) => {
            return value.as_f64().filter(|f| f.is_finite()).map(float)
        }
        Some(ty @ (AbstractType::DateTime
        | AbstractType::Timestamp
        | AbstractType::Time
        | AbstractType::Date)) => return date(value, ty),
        _ => {}
    }

    match value {
        Value::Bool(b) => Some(i64::from(*b).to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) if f.is_finite() => Some(float(*f)),
        Value::Bytes(b) => Some(format!("0x{}", hex(b))),
        Value::Date(_) => date(value, AbstractType::Date),
        Value::Time(_) => date(value, AbstractType::Time),
        Value::DateTime(_) => date(value, AbstractType::DateTime),
        _ => None,
    }
}

/// Digits a numeric constant may carry before the server rejects it.
const MAX_NUMERIC_PRECISION: usize = 38;

/// Float literal, in exponent form when the plain form has too many digits.
fn float(f: f64) -> String {
    let plain = f.to_string();
    let unsigned = plain.trim_start_matches('-');
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if whole.trim_start_matches('0').len() + fraction.len() > MAX_NUMERIC_PRECISION {
        format!("{:e}", f)
    } else {
        plain
    }
}

fn boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(i) => Some(*i != 0),
        Value::Float(f) => Some(*f != 0.0),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
            "0" | "false" | "f" | "no" | "n" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Quoted date/time literal in the format of `ty`. Text is reformatted when it
/// parses, otherwise left to the string fallback.
fn date(value: &Value, ty: AbstractType) -> Option<String> {
    let format = ty.value_format()?;
    let formatted = match value {
        Value::DateTime(dt) => dt.format(format).to_string(),
        Value::Date(d) => match ty {
            AbstractType::Time => return None,
            _ => d.and_hms_opt(0, 0, 0)?.format(format).to_string(),
        },
        Value::Time(t) => match ty {
            AbstractType::Time => t.format(format).to_string(),
            _ => return None,
        },
        Value::Text(s) => parse_datetime(s.trim())?.format(format).to_string(),
        _ => return None,
    };
    Some(quote_string(&formatted))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Single-quoted string literal. Embedded quotes are doubled; text outside
/// ASCII gets the `N` prefix so it survives non-Unicode collations.
pub fn quote_string(s: &str) -> String {
    let escaped = s.replace('\'', "''");
    if s.is_ascii() {
        format!("'{}'", escaped)
    } else {
        format!("N'{}'", escaped)
    }
}
