//! Type-directed parameter binding.
//!
//! Every literal is converted by the routine its [`SemanticType`] selects, then
//! passed through the dialect's driver quirks.

use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;

use crate::dialect::Dialect;
use crate::error::{CoreError, Result};
use crate::types::{SemanticType, SqlValue, TemporalFormat, TemporalFormats, TemporalKind, TypedColumnValue};

const TRUE_TOKENS: [&str; 5] = ["true", "t", "yes", "y", "on"];
const FALSE_TOKENS: [&str; 5] = ["false", "f", "no", "n", "off"];

#[derive(Debug, Clone)]
pub struct ParameterBinder {
    dialect: Dialect,
    formats: TemporalFormats,
}

impl ParameterBinder {
    pub fn new(dialect: Dialect, formats: TemporalFormats) -> Self {
        Self { dialect, formats }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Bind a raw literal; `None` is SQL NULL.
    pub fn bind_value(&self, semantic: SemanticType, literal: Option<&str>) -> Result<SqlValue> {
        let Some(literal) = literal else {
            return Ok(SqlValue::Null);
        };
        let value = match semantic {
            SemanticType::Integer | SemanticType::Decimal => SqlValue::Decimal(parse_decimal(literal)?),
            SemanticType::Double => SqlValue::Double(parse_double(literal)?),
            SemanticType::Boolean => SqlValue::Boolean(parse_boolean(literal)?),
            SemanticType::Date | SemanticType::Time | SemanticType::TimestampNtz
            | SemanticType::TimestampLtz | SemanticType::TimestampTz => {
                self.bind_temporal(semantic, literal)?
            }
            SemanticType::Binary => SqlValue::Binary(
                hex::decode(literal.trim())
                    .map_err(|_| CoreError::format(literal, "hexadecimal binary"))?,
            ),
            SemanticType::Varchar | SemanticType::Variant => SqlValue::Text(literal.to_string()),
        };
        Ok(self.dialect.bind_parameter(semantic, value))
    }

    /// Bind a named column value by its type tag.
    pub fn bind_column(&self, value: &TypedColumnValue) -> Result<SqlValue> {
        self.bind_value(value.semantic_type, value.literal.as_deref())
            .map_err(|err| match err {
                CoreError::Format { literal, expected } => CoreError::Format {
                    literal,
                    expected: format!("{expected} for column {}", value.name),
                },
                other => other,
            })
    }

    /// Bind a JSON document field.
    pub fn bind_json(&self, semantic: SemanticType, value: &JsonValue) -> Result<SqlValue> {
        match json_literal(value) {
            Some(literal) => self.bind_value(semantic, Some(&literal)),
            None => Ok(SqlValue::Null),
        }
    }

    fn bind_temporal(&self, semantic: SemanticType, literal: &str) -> Result<SqlValue> {
        let kind = semantic.temporal_kind().unwrap_or(TemporalKind::Timestamp);
        let pattern = match self.formats.for_kind(kind) {
            TemporalFormat::Auto => return Ok(SqlValue::Text(literal.to_string())),
            TemporalFormat::Pattern(pattern) => pattern.as_str(),
        };
        let trimmed = literal.trim();
        let parsed = match semantic {
            SemanticType::Date => NaiveDate::parse_from_str(trimmed, pattern).map(SqlValue::Date),
            SemanticType::Time => NaiveTime::parse_from_str(trimmed, pattern).map(SqlValue::Time),
            SemanticType::TimestampTz => DateTime::parse_from_str(trimmed, pattern)
                .map(SqlValue::TimestampTz)
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(trimmed, pattern)
                        .map(|ts| SqlValue::TimestampTz(ts.and_utc().fixed_offset()))
                }),
            _ => NaiveDateTime::parse_from_str(trimmed, pattern).map(SqlValue::Timestamp),
        };
        parsed.map_err(|_| CoreError::format(literal, format!("{semantic} matching {pattern}")))
    }
}

/// Text form of a JSON value as the binder expects it. Objects and arrays
/// keep their JSON text.
pub fn json_literal(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => Some(value.to_string()),
    }
}

/// Value for a parameter with no declared column type, taken from the JSON
/// type of the argument.
pub fn untyped_value(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Boolean(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(v) => SqlValue::BigInt(v),
            None => n
                .as_f64()
                .map(SqlValue::Double)
                .unwrap_or_else(|| SqlValue::Text(n.to_string())),
        },
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn parse_decimal(literal: &str) -> Result<BigDecimal> {
    BigDecimal::from_str(literal.trim()).map_err(|_| CoreError::format(literal, "number"))
}

fn parse_double(literal: &str) -> Result<f64> {
    let trimmed = literal.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" => Ok(f64::NAN),
        "inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => f64::from_str(trimmed).map_err(|_| CoreError::format(literal, "floating point number")),
    }
}

fn parse_boolean(literal: &str) -> Result<bool> {
    let token = literal.trim().to_ascii_lowercase();
    if TRUE_TOKENS.contains(&token.as_str()) {
        return Ok(true);
    }
    if FALSE_TOKENS.contains(&token.as_str()) {
        return Ok(false);
    }
    match BigDecimal::from_str(&token) {
        Ok(number) => Ok(!number.is_zero()),
        Err(_) => Err(CoreError::format(literal, "boolean")),
    }
}
