//! Warehouse dialects.
//!
//! Dialect differences are a closed set chosen once when the connection is
//! created; every SQL builder and the parameter binder consult it instead of
//! branching on driver names.

use chrono::{Timelike, Utc};
use bigdecimal::ToPrimitive;

use crate::config::{CompressionKind, FileFormatConfig, FileFormatType};
use crate::stage::StageRef;
use crate::types::{SemanticType, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Snowflake,
    DuckDb,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Snowflake => "snowflake",
            Dialect::DuckDb => "duckdb",
        }
    }

    pub fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// `"db"."schema"."table"`, skipping absent qualifiers.
    pub fn qualified_name(&self, database: Option<&str>, schema: Option<&str>, name: &str) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(db) = database.filter(|s| !s.is_empty()) {
            parts.push(self.quote_identifier(db));
        }
        if let Some(schema) = schema.filter(|s| !s.is_empty()) {
            parts.push(self.quote_identifier(schema));
        }
        parts.push(self.quote_identifier(name));
        parts.join(".")
    }

    /// Neither supported warehouse hands back procedure results as ref cursors.
    pub fn supports_ref_cursor(&self) -> bool {
        false
    }

    /// Whether COPY INTO can remove consumed stage objects itself.
    pub fn supports_purge(&self) -> bool {
        matches!(self, Dialect::Snowflake)
    }

    /// Session parameter carrying the expected statement count of a script.
    pub fn multi_statement_parameter(&self) -> Option<&'static str> {
        match self {
            Dialect::Snowflake => Some("MULTI_STATEMENT_COUNT"),
            Dialect::DuckDb => None,
        }
    }

    pub fn build_procedure_query(&self, procedure: &str, args: &[String]) -> String {
        format!("CALL {}({})", procedure, args.join(", "))
    }

    /// Adjust a bound value to what the dialect's driver accepts for the type.
    pub fn bind_parameter(&self, semantic: SemanticType, value: SqlValue) -> SqlValue {
        match (self, semantic, value) {
            (Dialect::Snowflake, _, SqlValue::TimestampTz(ts)) => {
                SqlValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.9f %:z").to_string())
            }
            (Dialect::DuckDb, _, SqlValue::TimestampTz(ts)) => {
                SqlValue::Timestamp(ts.with_timezone(&Utc).naive_utc())
            }
            (Dialect::DuckDb, SemanticType::Integer, SqlValue::Decimal(d)) if d.is_integer() => {
                match d.to_i64() {
                    Some(v) => SqlValue::BigInt(v),
                    None => SqlValue::Decimal(d),
                }
            }
            (_, _, value) => value,
        }
    }

    /// Render a value as an inline SQL literal.
    pub fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            SqlValue::BigInt(v) => v.to_string(),
            SqlValue::Decimal(d) => d.to_plain_string(),
            SqlValue::Double(d) => self.render_double(*d),
            SqlValue::Text(s) => self.quote_string(s),
            SqlValue::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
            SqlValue::Time(t) => format!(
                "TIME '{}'",
                if t.nanosecond() == 0 {
                    t.format("%H:%M:%S").to_string()
                } else {
                    t.format("%H:%M:%S%.f").to_string()
                }
            ),
            SqlValue::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            SqlValue::TimestampTz(ts) => {
                let text = ts.format("%Y-%m-%d %H:%M:%S%.f %:z");
                match self {
                    Dialect::Snowflake => format!("'{text}'::TIMESTAMP_TZ"),
                    Dialect::DuckDb => format!("TIMESTAMPTZ '{text}'"),
                }
            }
            SqlValue::Binary(bytes) => match self {
                Dialect::Snowflake => format!("TO_BINARY('{}', 'HEX')", hex::encode(bytes)),
                Dialect::DuckDb => format!("unhex('{}')", hex::encode(bytes)),
            },
        }
    }

    fn render_double(&self, value: f64) -> String {
        let cast = match self {
            Dialect::Snowflake => "FLOAT",
            Dialect::DuckDb => "DOUBLE",
        };
        if value.is_nan() {
            format!("'NaN'::{cast}")
        } else if value.is_infinite() {
            let token = if value > 0.0 { "inf" } else { "-inf" };
            format!("'{token}'::{cast}")
        } else {
            format!("{value:?}")
        }
    }

    pub fn quote_string(&self, value: &str) -> String {
        let escaped = value.replace('\'', "''");
        match self {
            // Snowflake treats backslash as an escape inside string literals.
            Dialect::Snowflake => format!("'{}'", escaped.replace('\\', "\\\\")),
            Dialect::DuckDb => format!("'{escaped}'"),
        }
    }

    pub fn truncate_table(&self, table: &str) -> String {
        match self {
            Dialect::Snowflake => format!("TRUNCATE TABLE IF EXISTS {table}"),
            Dialect::DuckDb => format!("TRUNCATE TABLE {table}"),
        }
    }

    /// Bulk load statement reading every object under `source` into `table`.
    pub fn copy_into_table(
        &self,
        table: &str,
        source: &StageRef,
        format: &FileFormatConfig,
        copy_options: Option<&str>,
        purge: bool,
    ) -> String {
        match self {
            Dialect::Snowflake => {
                let mut sql = format!("COPY INTO {} FROM {}", table, source.sql_location());
                if let Some(credentials) = source.credentials() {
                    sql.push(' ');
                    sql.push_str(credentials);
                }
                sql.push(' ');
                sql.push_str(&self.file_format_clause(format));
                push_option(&mut sql, copy_options);
                if purge {
                    sql.push_str(" PURGE = TRUE");
                }
                sql
            }
            Dialect::DuckDb => {
                let glob = self.quote_string(&format!("{}*", source.location()));
                let reader = match format.format_type {
                    FileFormatType::Json => format!("read_json_auto({glob})"),
                    FileFormatType::Csv => format!("read_csv_auto({glob}, header = true)"),
                };
                format!("INSERT INTO {table} BY NAME SELECT * FROM {reader}")
            }
        }
    }

    /// Projection used by unload: one object per row for row-delimited formats.
    pub fn unload_projection(&self, format: FileFormatType, columns: Option<&[String]>) -> String {
        let column_list = || match columns {
            Some(cols) if !cols.is_empty() => cols
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        };
        match (self, format) {
            (Dialect::Snowflake, FileFormatType::Json) => match columns {
                Some(cols) if !cols.is_empty() => {
                    let pairs = cols
                        .iter()
                        .map(|c| format!("{}, {}", self.quote_string(c), self.quote_identifier(c)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("OBJECT_CONSTRUCT({pairs})")
                }
                _ => "OBJECT_CONSTRUCT(*)".to_string(),
            },
            _ => column_list(),
        }
    }

    /// Bulk unload statement writing the result of `select` under `target`.
    ///
    /// `object_name` names the single output object for dialects that cannot
    /// choose file names themselves.
    pub fn copy_into_stage(
        &self,
        target: &StageRef,
        select: &str,
        format: &FileFormatConfig,
        copy_options: Option<&str>,
        header: bool,
        object_name: &str,
    ) -> String {
        match self {
            Dialect::Snowflake => {
                let mut sql = format!("COPY INTO {} FROM ({})", target.sql_location(), select);
                if let Some(credentials) = target.credentials() {
                    sql.push(' ');
                    sql.push_str(credentials);
                }
                sql.push(' ');
                sql.push_str(&self.file_format_clause(format));
                push_option(&mut sql, copy_options);
                if header && format.format_type == FileFormatType::Csv {
                    sql.push_str(" HEADER = TRUE");
                }
                sql
            }
            Dialect::DuckDb => {
                let path = self.quote_string(&format!("{}{}", target.location(), object_name));
                let mut options = vec![format!("FORMAT {}", format.format_type.extension())];
                if format.format_type == FileFormatType::Csv {
                    options.push(format!("HEADER {}", header));
                }
                if format.compression == CompressionKind::Gzip {
                    options.push("COMPRESSION gzip".to_string());
                }
                format!("COPY ({select}) TO {path} ({})", options.join(", "))
            }
        }
    }

    /// Bind placeholder for a column of `semantic` type.
    pub fn placeholder(&self, semantic: SemanticType) -> &'static str {
        match (self, semantic) {
            (Dialect::Snowflake, SemanticType::Variant) => "PARSE_JSON(?)",
            (Dialect::DuckDb, SemanticType::Variant) => "CAST(? AS JSON)",
            _ => "?",
        }
    }

    /// `INSERT` of one row. Snowflake rejects function calls inside `VALUES`,
    /// so rows with a `PARSE_JSON` placeholder are inserted through `SELECT`.
    pub fn insert_row(&self, table: &str, columns: &[String], placeholders: &[&str]) -> String {
        let column_list = columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let values = placeholders.join(", ");
        let needs_select = *self == Dialect::Snowflake && placeholders.iter().any(|p| *p != "?");
        if needs_select {
            format!("INSERT INTO {table} ({column_list}) SELECT {values}")
        } else {
            format!("INSERT INTO {table} ({column_list}) VALUES ({values})")
        }
    }

    fn file_format_clause(&self, format: &FileFormatConfig) -> String {
        if let Some(name) = format.name.as_deref().filter(|n| !n.is_empty()) {
            return format!("FILE_FORMAT = (FORMAT_NAME = {})", self.quote_string(name));
        }
        let mut clause = format!(
            "FILE_FORMAT = (TYPE = {} COMPRESSION = {}",
            format.format_type.as_str(),
            format.compression.as_str()
        );
        if let Some(options) = format.options.as_deref().filter(|o| !o.trim().is_empty()) {
            clause.push(' ');
            clause.push_str(options.trim());
        }
        clause.push(')');
        clause
    }
}

fn push_option(sql: &mut String, option: Option<&str>) {
    if let Some(option) = option.map(str::trim).filter(|o| !o.is_empty()) {
        sql.push(' ');
        sql.push_str(option);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(Dialect::Snowflake.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(
            Dialect::DuckDb.qualified_name(Some("db"), None, "t"),
            "\"db\".\"t\""
        );
    }

    #[test]
    fn test_capabilities() {
        assert!(Dialect::Snowflake.supports_purge());
        assert!(!Dialect::DuckDb.supports_purge());
        assert!(!Dialect::Snowflake.supports_ref_cursor());
        assert_eq!(
            Dialect::Snowflake.multi_statement_parameter(),
            Some("MULTI_STATEMENT_COUNT")
        );
        assert_eq!(Dialect::DuckDb.multi_statement_parameter(), None);
    }

    #[test]
    fn test_render_literals() {
        let d = Dialect::Snowflake;
        assert_eq!(d.render_literal(&SqlValue::Null), "NULL");
        assert_eq!(d.render_literal(&SqlValue::Text("it's".into())), "'it''s'");
        assert_eq!(d.render_literal(&SqlValue::Text("a\\b".into())), "'a\\\\b'");
        assert_eq!(d.render_literal(&SqlValue::Double(f64::NAN)), "'NaN'::FLOAT");
        assert_eq!(d.render_literal(&SqlValue::Double(1.5)), "1.5");
        assert_eq!(
            d.render_literal(&SqlValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())),
            "DATE '2024-02-29'"
        );
        assert_eq!(
            Dialect::DuckDb.render_literal(&SqlValue::Binary(vec![0xab, 0x01])),
            "unhex('ab01')"
        );
    }

    #[test]
    fn test_bind_parameter_quirks() {
        let ts = chrono::FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .unwrap();
        match Dialect::DuckDb.bind_parameter(SemanticType::TimestampTz, SqlValue::TimestampTz(ts)) {
            SqlValue::Timestamp(naive) => assert_eq!(naive.to_string(), "2024-01-02 02:04:05"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            Dialect::Snowflake.bind_parameter(SemanticType::TimestampTz, SqlValue::TimestampTz(ts)),
            SqlValue::Text(_)
        ));
        let dec = SqlValue::Decimal(BigDecimal::from_str("42").unwrap());
        assert_eq!(
            Dialect::DuckDb.bind_parameter(SemanticType::Integer, dec.clone()),
            SqlValue::BigInt(42)
        );
        assert_eq!(Dialect::Snowflake.bind_parameter(SemanticType::Integer, dec.clone()), dec);
    }

    #[test]
    fn test_snowflake_copy_into_table() {
        let source = StageRef::external(
            "s3://bucket/in/",
            Some("CREDENTIALS = (AWS_KEY_ID = 'k' AWS_SECRET_KEY = 's')".to_string()),
        );
        let format = FileFormatConfig {
            compression: CompressionKind::Gzip,
            ..Default::default()
        };
        let sql = Dialect::Snowflake.copy_into_table(
            "\"T\"",
            &source,
            &format,
            Some("ON_ERROR = ABORT_STATEMENT"),
            true,
        );
        assert_eq!(
            sql,
            "COPY INTO \"T\" FROM 's3://bucket/in/' CREDENTIALS = (AWS_KEY_ID = 'k' AWS_SECRET_KEY = 's') \
             FILE_FORMAT = (TYPE = JSON COMPRESSION = GZIP) ON_ERROR = ABORT_STATEMENT PURGE = TRUE"
        );
    }

    #[test]
    fn test_snowflake_copy_into_stage_with_named_format() {
        let target = StageRef::internal("@~/out/");
        let format = FileFormatConfig {
            name: Some("MY_CSV".into()),
            format_type: FileFormatType::Csv,
            ..Default::default()
        };
        let select = "SELECT * FROM \"T\"";
        let sql = Dialect::Snowflake.copy_into_stage(&target, select, &format, None, true, "ignored");
        assert_eq!(
            sql,
            "COPY INTO @~/out/ FROM (SELECT * FROM \"T\") FILE_FORMAT = (FORMAT_NAME = 'MY_CSV') HEADER = TRUE"
        );
    }

    #[test]
    fn test_insert_row_uses_select_for_variant() {
        let cols = vec!["ID".to_string(), "DOC".to_string()];
        let d = Dialect::Snowflake;
        let placeholders = [d.placeholder(SemanticType::Integer), d.placeholder(SemanticType::Variant)];
        assert_eq!(
            d.insert_row("\"T\"", &cols, &placeholders),
            "INSERT INTO \"T\" (\"ID\", \"DOC\") SELECT ?, PARSE_JSON(?)"
        );
        assert_eq!(
            d.insert_row("\"T\"", &cols[..1], &["?"]),
            "INSERT INTO \"T\" (\"ID\") VALUES (?)"
        );
    }

    #[test]
    fn test_duckdb_copy_statements() {
        let stage = StageRef::local("/tmp/stage/run/");
        let format = FileFormatConfig::default();
        assert_eq!(
            Dialect::DuckDb.copy_into_table("\"t\"", &stage, &format, None, false),
            "INSERT INTO \"t\" BY NAME SELECT * FROM read_json_auto('/tmp/stage/run/*')"
        );
        assert_eq!(
            Dialect::DuckDb.copy_into_stage(&stage, "SELECT * FROM \"t\"", &format, None, false, "data_0_0_0.json"),
            "COPY (SELECT * FROM \"t\") TO '/tmp/stage/run/data_0_0_0.json' (FORMAT json)"
        );
    }

    #[test]
    fn test_unload_projection() {
        let cols = vec!["A".to_string(), "B".to_string()];
        assert_eq!(
            Dialect::Snowflake.unload_projection(FileFormatType::Json, None),
            "OBJECT_CONSTRUCT(*)"
        );
        assert_eq!(
            Dialect::Snowflake.unload_projection(FileFormatType::Json, Some(&cols)),
            "OBJECT_CONSTRUCT('A', \"A\", 'B', \"B\")"
        );
        assert_eq!(
            Dialect::DuckDb.unload_projection(FileFormatType::Json, Some(&cols)),
            "\"A\", \"B\""
        );
    }
}
