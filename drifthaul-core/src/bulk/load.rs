//! Bulk load: upload a payload into a fresh stage directory, then COPY it into
//! the destination table.

use chrono::Local;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::TruncationLedger;
use crate::config::{ConnectorConfig, FileFormatType};
use crate::driver::WarehouseConnection;
use crate::error::{CoreError, Result};
use crate::redact::redact_sql;
use crate::stage::compress::upload_compression;
use crate::stage::{resolve_stage_path, Stage, UploadPool, UploadSettings};

/// Destination of a load, already resolved against per-document overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    /// Qualified, quoted table name.
    pub table: String,
    pub database: Option<String>,
    pub schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub stage_dir: String,
    pub objects: Vec<String>,
    pub rows_loaded: u64,
    pub truncated: bool,
}

pub struct BulkLoader<'a> {
    stage: &'a dyn Stage,
    config: &'a ConnectorConfig,
    uploads: &'a UploadPool,
}

impl<'a> BulkLoader<'a> {
    pub fn new(stage: &'a dyn Stage, config: &'a ConnectorConfig, uploads: &'a UploadPool) -> Self {
        Self { stage, config, uploads }
    }

    fn upload_settings(&self) -> UploadSettings {
        let format = &self.config.file_format;
        UploadSettings {
            chunk_size: self.config.stage.chunk_size_bytes,
            compression: upload_compression(format, self.config.stage.auto_compress),
            extension: format.format_type.extension(),
            repeat_header: format.format_type == FileFormatType::Csv && self.config.header,
        }
    }

    /// Load one payload into `target` through a new stage directory.
    pub fn start(
        &self,
        conn: &mut dyn WarehouseConnection,
        ledger: &mut TruncationLedger,
        target: &LoadTarget,
        payload: &[u8],
    ) -> Result<LoadSummary> {
        let dir = resolve_stage_path(
            &self.config.stage.path_template,
            "load",
            Local::now().naive_local(),
            Uuid::new_v4(),
        );
        self.start_in(conn, ledger, target, payload, &dir)
    }

    #[instrument(skip(self, conn, ledger, payload), fields(table = %target.table, bytes = payload.len()))]
    pub(crate) fn start_in(
        &self,
        conn: &mut dyn WarehouseConnection,
        ledger: &mut TruncationLedger,
        target: &LoadTarget,
        payload: &[u8],
        dir: &str,
    ) -> Result<LoadSummary> {
        let objects = self.uploads.upload(self.stage, dir, payload, &self.upload_settings())?;

        let truncated = match self.truncate_once(conn, ledger, target) {
            Ok(truncated) => truncated,
            Err(err) => {
                self.discard(&objects);
                return Err(err);
            }
        };

        let dialect = conn.dialect();
        let purge_in_copy = self.config.stage.purge && dialect.supports_purge();
        let sql = dialect.copy_into_table(
            &target.table,
            &self.stage.reference(dir),
            &self.config.file_format,
            self.config.copy_options.as_deref(),
            purge_in_copy,
        );
        debug!(sql = %redact_sql(&sql), "copying staged objects into table");
        let rows_loaded = match conn.execute(&sql, &[]) {
            Ok(rows) => rows,
            Err(err) => {
                self.discard(&objects);
                return Err(CoreError::transfer_sql(err, &sql, target.table.as_str()));
            }
        };

        if self.config.stage.purge && !purge_in_copy {
            self.discard(&objects);
        }

        info!(
            table = %target.table,
            objects = objects.len(),
            rows = rows_loaded,
            truncated,
            "bulk load finished"
        );
        Ok(LoadSummary {
            stage_dir: dir.to_string(),
            objects,
            rows_loaded,
            truncated,
        })
    }

    fn truncate_once(
        &self,
        conn: &mut dyn WarehouseConnection,
        ledger: &mut TruncationLedger,
        target: &LoadTarget,
    ) -> Result<bool> {
        let database = target.database.as_deref();
        let schema = target.schema.as_deref();
        if !self.config.truncate_before_load || ledger.contains(database, schema) {
            return Ok(false);
        }
        let sql = conn.dialect().truncate_table(&target.table);
        conn.execute(&sql, &[])
            .map_err(|err| CoreError::execution(err, &sql, target.table.as_str()))?;
        ledger.record(database, schema);
        info!(table = %target.table, "truncated destination before first load");
        Ok(true)
    }

    /// Best-effort removal of uploaded objects.
    fn discard(&self, objects: &[String]) {
        for key in objects {
            if let Err(err) = self.stage.remove(key) {
                warn!(key = %key, error = %err, "failed to remove staged object");
            }
        }
    }
}
