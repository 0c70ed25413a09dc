//! Connector configuration.
//!
//! Values arrive from the host (operation properties, environment, a config file)
//! and are layered with the `config` crate: serialized defaults first, then an
//! optional file, then `DRIFTHAUL__*` environment variables.

use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{TemporalFormat, TemporalFormats};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Driver URL. For the embedded DuckDB driver this is a file path or `:memory:`.
    pub url: String,
    /// Default target database; documents may override it.
    pub database: Option<String>,
    /// Default target schema; documents may override it.
    pub schema: Option<String>,
    /// Rows (or documents) grouped into one execute-and-commit cycle.
    /// For reads, rows per emitted JSON array; 0 means unbounded.
    pub batch_size: usize,
    /// Bind only the fields present in a document (honoured when batch size is 1).
    pub bind_supplied_fields: bool,
    /// Group several input documents into one stage upload.
    pub document_batching: bool,
    /// Procedure calls accumulated into one multi-statement script.
    pub procedure_script_count: usize,
    /// Date pattern (chrono strftime) or `AUTO`.
    pub date_format: String,
    /// Time pattern (chrono strftime) or `AUTO`.
    pub time_format: String,
    /// Timestamp pattern (chrono strftime) or `AUTO`.
    pub timestamp_format: String,
    /// Optional allow-list of columns for reads and unloads.
    pub columns: Option<Vec<String>>,
    /// Maximum number of tables held in the metadata cache.
    pub metadata_cache_size: usize,
    /// Bytes a single serialized row may hold in memory before spilling to disk.
    pub spill_threshold_bytes: usize,
    /// Log format: "compact" or "json".
    pub log_format: String,
    pub stage: StageConfig,
    pub file_format: FileFormatConfig,
    /// Raw copy options appended to COPY INTO statements.
    pub copy_options: Option<String>,
    /// Truncate the destination once before the first load.
    pub truncate_before_load: bool,
    /// Emit a header row when unloading flat files.
    pub header: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            url: ":memory:".to_string(),
            database: None,
            schema: None,
            batch_size: 1,
            bind_supplied_fields: false,
            document_batching: false,
            procedure_script_count: 1,
            date_format: "AUTO".to_string(),
            time_format: "AUTO".to_string(),
            timestamp_format: "AUTO".to_string(),
            columns: None,
            metadata_cache_size: default_metadata_cache_size(),
            spill_threshold_bytes: default_spill_threshold(),
            log_format: "compact".to_string(),
            stage: StageConfig::default(),
            file_format: FileFormatConfig::default(),
            copy_options: None,
            truncate_before_load: false,
            header: false,
        }
    }
}

/// Where staged objects live and how they are uploaded.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StageConfig {
    pub location: StageLocation,
    /// Path template; supports $DATE, $TIME, $OPERATION and $UUID.
    pub path_template: String,
    pub upload_parallelism: usize,
    pub chunk_size_bytes: usize,
    /// Gzip payloads on upload when the file format does not fix a compression.
    pub auto_compress: bool,
    /// Remove staged objects once COPY has consumed them.
    pub purge: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            location: StageLocation::default(),
            path_template: DEFAULT_PATH_TEMPLATE.to_string(),
            upload_parallelism: 4,
            chunk_size_bytes: 16 * 1024 * 1024,
            auto_compress: true,
            purge: true,
        }
    }
}

pub const DEFAULT_PATH_TEMPLATE: &str = "$OPERATION/$DATE/$TIME/$UUID/";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageLocation {
    /// Named internal stage, e.g. `@~` or `@MY_STAGE`.
    Internal { name: String },
    /// External bucket addressed through COPY credentials.
    External {
        bucket: String,
        region: Option<String>,
        aws_key_id: Option<String>,
        aws_secret_key: Option<String>,
    },
    /// Directory on the local filesystem (embedded driver).
    Local { root: PathBuf },
}

impl Default for StageLocation {
    fn default() -> Self {
        StageLocation::Internal {
            name: "@~".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormatType {
    /// Newline-delimited JSON records.
    Json,
    /// Flat delimited text.
    Csv,
}

impl FileFormatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormatType::Json => "JSON",
            FileFormatType::Csv => "CSV",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormatType::Json => "json",
            FileFormatType::Csv => "csv",
        }
    }

    /// Row-delimited formats are re-bracketed into one JSON array on unload.
    pub fn is_row_delimited(&self) -> bool {
        matches!(self, FileFormatType::Json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Auto,
    None,
    Gzip,
    Deflate,
}

impl CompressionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::Auto => "AUTO",
            CompressionKind::None => "NONE",
            CompressionKind::Gzip => "GZIP",
            CompressionKind::Deflate => "DEFLATE",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileFormatConfig {
    /// Named file format; when set, type/compression/options are ignored.
    pub name: Option<String>,
    pub format_type: FileFormatType,
    pub compression: CompressionKind,
    /// Extra raw format options, e.g. `FIELD_DELIMITER = '|'`.
    pub options: Option<String>,
}

impl Default for FileFormatConfig {
    fn default() -> Self {
        Self {
            name: None,
            format_type: FileFormatType::Json,
            compression: CompressionKind::Auto,
            options: None,
        }
    }
}

impl ConnectorConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults_json = serde_json::to_string(&Self::default())
            .map_err(|err| CoreError::Config(format!("failed to serialize defaults: {err}")))?;
        let mut builder = config::Config::builder().add_source(
            config::File::from_str(&defaults_json, config::FileFormat::Json).required(false),
        );
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("DRIFTHAUL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let cfg: ConnectorConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.procedure_script_count == 0 {
            return Err(CoreError::Config(
                "procedure_script_count must be > 0".to_string(),
            ));
        }
        if self.stage.upload_parallelism == 0 {
            return Err(CoreError::Config(
                "stage.upload_parallelism must be > 0".to_string(),
            ));
        }
        if self.stage.chunk_size_bytes == 0 {
            return Err(CoreError::Config(
                "stage.chunk_size_bytes must be > 0".to_string(),
            ));
        }
        if self.metadata_cache_size == 0 {
            return Err(CoreError::Config(
                "metadata_cache_size must be > 0".to_string(),
            ));
        }
        if self.stage.path_template.trim().is_empty() {
            return Err(CoreError::Config("stage.path_template is empty".to_string()));
        }
        for (key, value) in [
            ("date_format", &self.date_format),
            ("time_format", &self.time_format),
            ("timestamp_format", &self.timestamp_format),
        ] {
            if let TemporalFormat::Pattern(pattern) = TemporalFormat::parse(value) {
                if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
                    return Err(CoreError::Config(format!(
                        "{key} is not a valid pattern: {pattern}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn temporal_formats(&self) -> TemporalFormats {
        TemporalFormats {
            date: TemporalFormat::parse(&self.date_format),
            time: TemporalFormat::parse(&self.time_format),
            timestamp: TemporalFormat::parse(&self.timestamp_format),
        }
    }

    /// Batching requires manual commit; single-row work runs in autocommit.
    pub fn requires_manual_commit(&self) -> bool {
        self.batch_size > 1
    }
}

fn default_metadata_cache_size() -> usize {
    100
}

fn default_spill_threshold() -> usize {
    1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ConnectorConfig::default();
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.stage.path_template, DEFAULT_PATH_TEMPLATE);
        assert!(matches!(cfg.stage.location, StageLocation::Internal { .. }));
        assert_eq!(cfg.temporal_formats(), TemporalFormats::default());
        assert!(cfg.validate().is_ok());
        assert!(!cfg.requires_manual_commit());
    }

    #[test]
    fn test_load_defaults_without_file() {
        let cfg = ConnectorConfig::load(None).expect("defaults should load");
        assert_eq!(cfg.metadata_cache_size, 100);
        assert_eq!(cfg.file_format.format_type, FileFormatType::Json);
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("connector.json");
        std::fs::write(
            &path,
            r#"{
                "batch_size": 50,
                "date_format": "%d/%m/%Y",
                "stage": { "location": { "type": "local", "root": "/tmp/stage" }, "purge": false },
                "file_format": { "format_type": "csv", "compression": "gzip" }
            }"#,
        )
        .expect("write config");
        let cfg = ConnectorConfig::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.batch_size, 50);
        assert!(cfg.requires_manual_commit());
        assert!(!cfg.stage.purge);
        assert_eq!(cfg.file_format.format_type, FileFormatType::Csv);
        assert_eq!(cfg.file_format.compression, CompressionKind::Gzip);
        assert_eq!(
            cfg.temporal_formats().date,
            TemporalFormat::Pattern("%d/%m/%Y".into())
        );
        assert!(matches!(cfg.stage.location, StageLocation::Local { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut cfg = ConnectorConfig::default();
        cfg.stage.upload_parallelism = 0;
        assert!(matches!(cfg.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let cfg = ConnectorConfig {
            timestamp_format: "%Y-%Q".to_string(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(CoreError::Config(_))));
    }
}
