//! One cursor row as one flat JSON object.
//!
//! Each row is written into its own spooled buffer, held in memory up to the
//! spill threshold and moved to a temporary file past it. The buffer is owned
//! by the returned [`RowStream`] and released when that stream is dropped.

use std::fmt::Write as _;
use std::io::{self, Read, Seek, SeekFrom, Write};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tempfile::SpooledTempFile;

use crate::driver::Cursor;
use crate::error::{CoreError, Result};
use crate::types::{SemanticType, SqlValue, TemporalFormat, TemporalFormats, TemporalKind};

const DEFAULT_DATE: &str = "%Y-%m-%d";
const DEFAULT_TIME: &str = "%H:%M:%S%.f";
const DEFAULT_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.f";
const DEFAULT_TIMESTAMP_TZ: &str = "%Y-%m-%d %H:%M:%S%.f %:z";

/// Serializes cursor rows.
#[derive(Debug, Clone)]
pub struct RowStreamer {
    formats: TemporalFormats,
    spill_threshold: usize,
}

impl RowStreamer {
    pub fn new(formats: TemporalFormats, spill_threshold: usize) -> Self {
        Self {
            formats,
            spill_threshold,
        }
    }

    /// Encode the row the cursor is positioned on.
    pub fn encode_row<C: Cursor + ?Sized>(&self, cursor: &C) -> Result<RowStream> {
        let mut buffer = SpooledTempFile::new(self.spill_threshold);
        self.write_row(cursor, &mut buffer)
            .map_err(|err| CoreError::Resource(format!("failed to buffer row: {err}")))??;
        let len = buffer
            .seek(SeekFrom::End(0))
            .and_then(|len| buffer.seek(SeekFrom::Start(0)).map(|_| len))
            .map_err(|err| CoreError::Resource(format!("failed to rewind row buffer: {err}")))?;
        Ok(RowStream { buffer, len })
    }

    // The outer io::Result reports buffer failures, the inner one value errors.
    fn write_row<C: Cursor + ?Sized, W: Write>(&self, cursor: &C, out: &mut W) -> io::Result<Result<()>> {
        out.write_all(b"{")?;
        for (index, column) in cursor.columns().iter().enumerate() {
            if index > 0 {
                out.write_all(b",")?;
            }
            serde_json::to_writer(&mut *out, &column.name)?;
            out.write_all(b":")?;
            let value = match cursor.value(index) {
                Ok(value) => value,
                Err(err) => {
                    return Ok(Err(CoreError::Execution {
                        message: err.message,
                        sql: String::new(),
                        context: format!("reading column {}", column.name),
                    }))
                }
            };
            match self.render_value(column.semantic_type, &value) {
                Ok(text) => out.write_all(text.as_bytes())?,
                Err(err) => return Ok(Err(err)),
            }
        }
        out.write_all(b"}")?;
        Ok(Ok(()))
    }

    /// JSON text of one value.
    ///
    /// Non-finite doubles are written as the bare tokens `NaN`, `Infinity` and
    /// `-Infinity`, which lenient JSON readers accept.
    pub fn render_value(&self, semantic: SemanticType, value: &SqlValue) -> Result<String> {
        // Integral columns read through text drivers arrive as strings.
        if let SqlValue::Text(s) = value {
            if semantic.is_integral() && is_plain_number(s) {
                return Ok(s.trim().to_string());
            }
        }
        let text = match value {
            SqlValue::Null => "null".to_string(),
            SqlValue::Boolean(b) => b.to_string(),
            SqlValue::BigInt(v) => v.to_string(),
            SqlValue::Decimal(d) => d.to_plain_string(),
            SqlValue::Double(d) if d.is_nan() => "NaN".to_string(),
            SqlValue::Double(d) if d.is_infinite() => {
                (if *d > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
            }
            SqlValue::Double(d) => json_string(d)?,
            SqlValue::Text(s) => json_string(s)?,
            SqlValue::Date(d) => json_string(&self.format_date(d)?)?,
            SqlValue::Time(t) => json_string(&self.format_time(t)?)?,
            SqlValue::Timestamp(ts) => json_string(&self.format_timestamp(ts)?)?,
            SqlValue::TimestampTz(ts) => json_string(&self.format_timestamp_tz(ts)?)?,
            SqlValue::Binary(bytes) => json_string(&hex::encode(bytes))?,
        };
        Ok(text)
    }

    fn pattern(&self, kind: TemporalKind) -> Option<&str> {
        match self.formats.for_kind(kind) {
            TemporalFormat::Auto => None,
            TemporalFormat::Pattern(p) => Some(p.as_str()),
        }
    }

    fn format_date(&self, d: &NaiveDate) -> Result<String> {
        let pattern = self.pattern(TemporalKind::Date).unwrap_or(DEFAULT_DATE);
        render_with(pattern, d.to_string(), |out| write!(out, "{}", d.format(pattern)))
    }

    fn format_time(&self, t: &NaiveTime) -> Result<String> {
        let pattern = self.pattern(TemporalKind::Time).unwrap_or(DEFAULT_TIME);
        render_with(pattern, t.to_string(), |out| write!(out, "{}", t.format(pattern)))
    }

    fn format_timestamp(&self, ts: &NaiveDateTime) -> Result<String> {
        let pattern = self.pattern(TemporalKind::Timestamp).unwrap_or(DEFAULT_TIMESTAMP);
        render_with(pattern, ts.to_string(), |out| write!(out, "{}", ts.format(pattern)))
    }

    fn format_timestamp_tz(&self, ts: &DateTime<FixedOffset>) -> Result<String> {
        let pattern = self.pattern(TemporalKind::Timestamp).unwrap_or(DEFAULT_TIMESTAMP_TZ);
        render_with(pattern, ts.to_string(), |out| write!(out, "{}", ts.format(pattern)))
    }
}

fn render_with(
    pattern: &str,
    value: String,
    write: impl FnOnce(&mut String) -> std::fmt::Result,
) -> Result<String> {
    let mut out = String::new();
    write(&mut out).map_err(|_| CoreError::format(&value, format!("output pattern {pattern}")))?;
    Ok(out)
}

fn json_string<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|err| CoreError::Build(format!("failed to encode value: {err}")))
}

fn is_plain_number(s: &str) -> bool {
    let s = s.trim();
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && !digits.starts_with('.')
        && !digits.ends_with('.')
}

/// Serialized bytes of one row, readable once.
pub struct RowStream {
    buffer: SpooledTempFile,
    len: u64,
}

impl RowStream {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the row outgrew memory and lives in a temporary file.
    pub fn is_spilled(&self) -> bool {
        self.buffer.is_rolled()
    }
}

impl Read for RowStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.buffer.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockRows;
    use crate::types::CursorColumn;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn streamer() -> RowStreamer {
        RowStreamer::new(TemporalFormats::default(), 1024)
    }

    fn encode(rows: MockRows, streamer: &RowStreamer) -> String {
        let mut cursor = rows.cursor();
        assert!(cursor.advance().expect("advance"));
        let mut out = String::new();
        streamer
            .encode_row(&cursor)
            .expect("encode")
            .read_to_string(&mut out)
            .expect("read");
        out
    }

    #[test]
    fn test_row_preserves_column_order_and_types() {
        let rows = MockRows::new(
            vec![
                CursorColumn::new("Z_ID", SemanticType::Integer),
                CursorColumn::new("amount", SemanticType::Decimal),
                CursorColumn::new("ok", SemanticType::Boolean),
                CursorColumn::new("name", SemanticType::Varchar),
                CursorColumn::new("day", SemanticType::Date),
                CursorColumn::new("raw", SemanticType::Binary),
                CursorColumn::new("gone", SemanticType::Varchar),
            ],
            vec![vec![
                SqlValue::BigInt(7),
                SqlValue::Decimal(BigDecimal::from_str("12.50").unwrap()),
                SqlValue::Boolean(true),
                SqlValue::Text("a \"quoted\"\nline".into()),
                SqlValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
                SqlValue::Binary(vec![0xde, 0xad]),
                SqlValue::Null,
            ]],
        );
        let json = encode(rows, &streamer());
        assert_eq!(
            json,
            r#"{"Z_ID":7,"amount":12.50,"ok":true,"name":"a \"quoted\"\nline","day":"2024-01-31","raw":"dead","gone":null}"#
        );
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("strict JSON");
        assert_eq!(parsed["Z_ID"], 7);
    }

    #[test]
    fn test_non_finite_doubles_are_bare_tokens() {
        let rows = MockRows::new(
            vec![
                CursorColumn::new("a", SemanticType::Double),
                CursorColumn::new("b", SemanticType::Double),
                CursorColumn::new("c", SemanticType::Double),
                CursorColumn::new("d", SemanticType::Double),
            ],
            vec![vec![
                SqlValue::Double(f64::NAN),
                SqlValue::Double(f64::INFINITY),
                SqlValue::Double(f64::NEG_INFINITY),
                SqlValue::Double(0.25),
            ]],
        );
        assert_eq!(
            encode(rows, &streamer()),
            r#"{"a":NaN,"b":Infinity,"c":-Infinity,"d":0.25}"#
        );
    }

    #[test]
    fn test_configured_temporal_patterns() {
        let formats = TemporalFormats {
            date: TemporalFormat::Pattern("%d.%m.%Y".into()),
            time: TemporalFormat::Auto,
            timestamp: TemporalFormat::Pattern("%Y%m%dT%H%M".into()),
        };
        let rows = MockRows::new(
            vec![
                CursorColumn::new("d", SemanticType::Date),
                CursorColumn::new("t", SemanticType::Time),
                CursorColumn::new("ts", SemanticType::TimestampNtz),
            ],
            vec![vec![
                SqlValue::Date(NaiveDate::from_ymd_opt(2024, 2, 3).unwrap()),
                SqlValue::Time(NaiveTime::from_hms_milli_opt(4, 5, 6, 700).unwrap()),
                SqlValue::Timestamp(
                    NaiveDate::from_ymd_opt(2024, 2, 3)
                        .unwrap()
                        .and_hms_opt(4, 5, 6)
                        .unwrap(),
                ),
            ]],
        );
        assert_eq!(
            encode(rows, &RowStreamer::new(formats, 1024)),
            r#"{"d":"03.02.2024","t":"04:05:06.700","ts":"20240203T0405"}"#
        );
    }

    #[test]
    fn test_large_row_spills_to_disk() {
        let rows = MockRows::new(
            vec![CursorColumn::new("blob", SemanticType::Varchar)],
            vec![vec![SqlValue::Text("x".repeat(4096))]],
        );
        let mut cursor = rows.cursor();
        assert!(cursor.advance().expect("advance"));
        let streamer = RowStreamer::new(TemporalFormats::default(), 64);
        let mut stream = streamer.encode_row(&cursor).expect("encode");
        assert!(stream.is_spilled());
        assert_eq!(stream.len(), 4096 + 11);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).expect("read");
        assert_eq!(out.len(), 4096 + 11);
    }

    #[test]
    fn test_integral_text_renders_bare() {
        let s = streamer();
        assert_eq!(
            s.render_value(SemanticType::Integer, &SqlValue::Text("123456789012345678901234567890".into()))
                .expect("render"),
            "123456789012345678901234567890"
        );
        assert_eq!(
            s.render_value(SemanticType::Integer, &SqlValue::Text("n/a".into()))
                .expect("render"),
            "\"n/a\""
        );
    }
}
