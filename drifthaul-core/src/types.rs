//! Value and type model shared by the binder, the row encoder and the drivers.
//!
//! A [`SemanticType`] is the logical kind of a column, independent of the exact
//! driver type code; it deterministically selects one binding routine and one
//! formatting routine.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// Logical column kind used to select binding and formatting routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Integer,
    Decimal,
    Double,
    Boolean,
    Date,
    Time,
    TimestampNtz,
    TimestampLtz,
    TimestampTz,
    Binary,
    Varchar,
    Variant,
}

impl SemanticType {
    /// Map a warehouse or DuckDB type name to its semantic type.
    ///
    /// Unknown names fall back to `Varchar`, which binds and renders as text.
    pub fn from_type_name(type_name: &str) -> Self {
        let upper = type_name.trim().to_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        match base {
            "BIGINT" | "INT8" | "LONG" | "INTEGER" | "INT" | "INT4" | "SIGNED" | "SMALLINT"
            | "INT2" | "SHORT" | "TINYINT" | "INT1" | "BYTEINT" | "UBIGINT" | "UINTEGER"
            | "USMALLINT" | "UTINYINT" | "HUGEINT" | "UHUGEINT" => SemanticType::Integer,
            "NUMBER" | "DECIMAL" | "NUMERIC" => match parse_precision_scale(&upper) {
                Some((_, 0)) => SemanticType::Integer,
                Some(_) => SemanticType::Decimal,
                // Snowflake NUMBER without arguments is NUMBER(38,0).
                None if base == "NUMBER" => SemanticType::Integer,
                None => SemanticType::Decimal,
            },
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" | "FLOAT" | "FLOAT4" | "REAL" => {
                SemanticType::Double
            }
            "BOOLEAN" | "BOOL" | "LOGICAL" => SemanticType::Boolean,
            "DATE" => SemanticType::Date,
            "TIME" => SemanticType::Time,
            "TIMESTAMP" | "DATETIME" | "TIMESTAMP_NTZ" | "TIMESTAMP WITHOUT TIME ZONE" => {
                SemanticType::TimestampNtz
            }
            "TIMESTAMP_LTZ" => SemanticType::TimestampLtz,
            "TIMESTAMP_TZ" | "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => {
                SemanticType::TimestampTz
            }
            "BINARY" | "VARBINARY" | "BLOB" | "BYTEA" => SemanticType::Binary,
            "VARIANT" | "OBJECT" | "ARRAY" | "JSON" | "STRUCT" | "MAP" | "LIST" => {
                SemanticType::Variant
            }
            _ => SemanticType::Varchar,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, SemanticType::Integer | SemanticType::Decimal)
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(
            self,
            SemanticType::TimestampNtz | SemanticType::TimestampLtz | SemanticType::TimestampTz
        )
    }

    pub fn temporal_kind(&self) -> Option<TemporalKind> {
        match self {
            SemanticType::Date => Some(TemporalKind::Date),
            SemanticType::Time => Some(TemporalKind::Time),
            t if t.is_timestamp() => Some(TemporalKind::Timestamp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "INTEGER",
            SemanticType::Decimal => "DECIMAL",
            SemanticType::Double => "DOUBLE",
            SemanticType::Boolean => "BOOLEAN",
            SemanticType::Date => "DATE",
            SemanticType::Time => "TIME",
            SemanticType::TimestampNtz => "TIMESTAMP_NTZ",
            SemanticType::TimestampLtz => "TIMESTAMP_LTZ",
            SemanticType::TimestampTz => "TIMESTAMP_TZ",
            SemanticType::Binary => "BINARY",
            SemanticType::Varchar => "VARCHAR",
            SemanticType::Variant => "VARIANT",
        }
    }
}

/// Parse `(precision, scale)` from a `DECIMAL(p, s)` style type name.
fn parse_precision_scale(spec: &str) -> Option<(u32, u32)> {
    let start = spec.find('(')?;
    let end = spec[start + 1..]
        .find(')')
        .map(|idx| start + 1 + idx)
        .unwrap_or(spec.len());
    let mut parts = spec[start + 1..end]
        .split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty());
    let precision = parts.next()?.parse::<u32>().ok()?;
    let scale = parts
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0);
    Some((precision, scale))
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value crossing the driver seam, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    BigInt(i64),
    Decimal(BigDecimal),
    Double(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Binary(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// One column value as supplied by a caller: semantic type plus raw literal.
///
/// `literal` is `None` for SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedColumnValue {
    pub name: String,
    pub semantic_type: SemanticType,
    pub literal: Option<String>,
}

impl TypedColumnValue {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType, literal: Option<String>) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            literal,
        }
    }
}

/// Column metadata reported by a driver for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    /// Declared default expression, unevaluated.
    pub default_expr: Option<String>,
    pub ordinal: usize,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, ordinal: usize) -> Self {
        let type_name = type_name.into();
        Self {
            name: name.into(),
            semantic_type: SemanticType::from_type_name(&type_name),
            type_name,
            nullable: true,
            default_expr: None,
            ordinal,
        }
    }

    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default_expr = Some(expr.into());
        self
    }
}

/// Column descriptor of an open cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorColumn {
    pub name: String,
    pub semantic_type: SemanticType,
}

impl CursorColumn {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalKind {
    Date,
    Time,
    Timestamp,
}

/// Either `AUTO` (leave parsing/formatting to the driver) or a chrono pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemporalFormat {
    Auto,
    Pattern(String),
}

impl TemporalFormat {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            TemporalFormat::Auto
        } else {
            TemporalFormat::Pattern(trimmed.to_string())
        }
    }
}

/// Per-kind temporal formats configured for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalFormats {
    pub date: TemporalFormat,
    pub time: TemporalFormat,
    pub timestamp: TemporalFormat,
}

impl Default for TemporalFormats {
    fn default() -> Self {
        Self {
            date: TemporalFormat::Auto,
            time: TemporalFormat::Auto,
            timestamp: TemporalFormat::Auto,
        }
    }
}

impl TemporalFormats {
    pub fn for_kind(&self, kind: TemporalKind) -> &TemporalFormat {
        match kind {
            TemporalKind::Date => &self.date,
            TemporalKind::Time => &self.time,
            TemporalKind::Timestamp => &self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_type_from_type_name() {
        assert_eq!(SemanticType::from_type_name("NUMBER(38,0)"), SemanticType::Integer);
        assert_eq!(SemanticType::from_type_name("NUMBER(10,2)"), SemanticType::Decimal);
        assert_eq!(SemanticType::from_type_name("DECIMAL"), SemanticType::Decimal);
        assert_eq!(SemanticType::from_type_name("bigint"), SemanticType::Integer);
        assert_eq!(SemanticType::from_type_name("FLOAT"), SemanticType::Double);
        assert_eq!(SemanticType::from_type_name("TIMESTAMP_TZ"), SemanticType::TimestampTz);
        assert_eq!(
            SemanticType::from_type_name("TIMESTAMP WITH TIME ZONE"),
            SemanticType::TimestampTz
        );
        assert_eq!(SemanticType::from_type_name("VARCHAR(16777216)"), SemanticType::Varchar);
        assert_eq!(SemanticType::from_type_name("GEOGRAPHY"), SemanticType::Varchar);
    }

    #[test]
    fn test_temporal_format_parse() {
        assert_eq!(TemporalFormat::parse("AUTO"), TemporalFormat::Auto);
        assert_eq!(TemporalFormat::parse(" auto "), TemporalFormat::Auto);
        assert_eq!(
            TemporalFormat::parse("%Y-%m-%d"),
            TemporalFormat::Pattern("%Y-%m-%d".into())
        );
    }
}
