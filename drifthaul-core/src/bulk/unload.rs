//! Bulk unload: COPY a query result into a stage directory, then hand the
//! staged objects back one at a time as decompressed byte streams.

use std::io::Read;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ConnectorConfig, FileFormatConfig};
use crate::driver::WarehouseConnection;
use crate::error::{CoreError, Result};
use crate::redact::redact_sql;
use crate::stage::compress::{decompressing_reader, suffix};
use crate::stage::{resolve_stage_path, Stage};
use crate::stream::NdjsonArrayReader;

/// What to unload. `where_clause` is either empty or a leading ` WHERE ...`
/// with literals already inlined.
#[derive(Debug, Clone, Default)]
pub struct UnloadRequest {
    /// Qualified, quoted table name.
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub where_clause: String,
}

pub struct UnloadedFile {
    pub key: String,
    pub reader: Box<dyn Read + Send>,
}

impl std::fmt::Debug for UnloadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnloadedFile").field("key", &self.key).finish()
    }
}

pub struct BulkUnloader {
    stage: Arc<dyn Stage>,
    format: FileFormatConfig,
    purge: bool,
    dir: String,
    objects: Vec<String>,
    next: usize,
    closed: bool,
}

impl std::fmt::Debug for BulkUnloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkUnloader")
            .field("dir", &self.dir)
            .field("objects", &self.objects)
            .field("next", &self.next)
            .field("closed", &self.closed)
            .finish()
    }
}

impl BulkUnloader {
    /// Run the unload COPY and list what it produced.
    pub fn initialize(
        stage: Arc<dyn Stage>,
        config: &ConnectorConfig,
        conn: &mut dyn WarehouseConnection,
        request: &UnloadRequest,
    ) -> Result<Self> {
        let dir = resolve_stage_path(
            &config.stage.path_template,
            "unload",
            Local::now().naive_local(),
            Uuid::new_v4(),
        );
        Self::initialize_in(stage, config, conn, request, dir)
    }

    #[instrument(skip(stage, config, conn, request), fields(table = %request.table))]
    pub(crate) fn initialize_in(
        stage: Arc<dyn Stage>,
        config: &ConnectorConfig,
        conn: &mut dyn WarehouseConnection,
        request: &UnloadRequest,
        dir: String,
    ) -> Result<Self> {
        let dialect = conn.dialect();
        let format = config.file_format.clone();
        let projection = dialect.unload_projection(format.format_type, request.columns.as_deref());
        let select = format!(
            "SELECT {projection} FROM {}{}",
            request.table, request.where_clause
        );
        let object_name = format!(
            "data_0.{}{}",
            format.format_type.extension(),
            suffix(format.compression)
        );
        let sql = dialect.copy_into_stage(
            &stage.reference(&dir),
            &select,
            &format,
            config.copy_options.as_deref(),
            config.header,
            &object_name,
        );
        stage.prepare(&dir)?;
        debug!(sql = %redact_sql(&sql), "unloading into stage");
        conn.execute(&sql, &[])
            .map_err(|err| CoreError::transfer_sql(err, &sql, request.table.as_str()))?;

        let objects = stage.list(&dir)?;
        info!(dir = %dir, objects = objects.len(), "unload staged");
        Ok(Self {
            stage,
            format,
            purge: config.stage.purge,
            dir,
            objects,
            next: 0,
            closed: false,
        })
    }

    pub fn stage_dir(&self) -> &str {
        &self.dir
    }

    pub fn objects(&self) -> &[String] {
        &self.objects
    }

    /// Next staged object, decompressed; row-delimited JSON comes back as one
    /// JSON array. `None` once every object has been handed out.
    pub fn next_file(&mut self) -> Result<Option<UnloadedFile>> {
        if self.closed {
            return Err(CoreError::Resource("unload resources already closed".to_string()));
        }
        let Some(key) = self.objects.get(self.next).cloned() else {
            return Ok(None);
        };
        self.next += 1;

        let raw = self.stage.open(&key)?;
        let plain = decompressing_reader(self.format.compression, &key, raw)?;
        let reader: Box<dyn Read + Send> = if self.format.format_type.is_row_delimited() {
            Box::new(NdjsonArrayReader::new(plain))
        } else {
            plain
        };
        debug!(key = %key, "opened unloaded object");
        Ok(Some(UnloadedFile { key, reader }))
    }

    /// Remove every listed object. Each removal is attempted; all failures are
    /// reported together.
    pub fn close_resources(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.purge {
            return Ok(());
        }

        let mut failures = Vec::new();
        for key in &self.objects {
            if let Err(err) = self.stage.remove(key) {
                warn!(key = %key, error = %err, "failed to remove unloaded object");
                failures.push(format!("{key}: {err}"));
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        Err(CoreError::Resource(format!(
            "failed to remove {} of {} staged objects: {}",
            failures.len(),
            self.objects.len(),
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompressionKind, FileFormatType, StageLocation};
    use crate::dialect::Dialect;
    use crate::driver::mock::MockConnection;
    use crate::error::ErrorKind;
    use crate::stage::compress::compress;
    use crate::stage::memory::MemoryStage;

    fn stage_with(objects: &[(&str, Vec<u8>)]) -> MemoryStage {
        let stage = MemoryStage::new(StageLocation::Internal {
            name: "@~".to_string(),
        });
        for (key, data) in objects {
            stage.put(key, data).expect("put");
        }
        stage
    }

    fn request() -> UnloadRequest {
        UnloadRequest {
            table: "\"T\"".to_string(),
            columns: None,
            where_clause: " WHERE \"ID\" > 10".to_string(),
        }
    }

    fn read_all(file: UnloadedFile) -> String {
        let mut out = String::new();
        let mut reader = file.reader;
        reader.read_to_string(&mut out).expect("read");
        out
    }

    #[test]
    fn test_unload_statement_and_listing() {
        let stage = stage_with(&[("unload/a/data_0_0_0.json", b"{\"ID\":11}\n".to_vec())]);
        let mut conn = MockConnection::new(Dialect::Snowflake);
        let unloader = BulkUnloader::initialize_in(
            Arc::new(stage),
            &ConnectorConfig::default(),
            &mut conn,
            &request(),
            "unload/a/".to_string(),
        )
        .expect("initialize");

        let sql = conn.executed_sql().pop().expect("copy");
        assert_eq!(
            sql,
            "COPY INTO @~/unload/a/ FROM (SELECT OBJECT_CONSTRUCT(*) FROM \"T\" WHERE \"ID\" > 10) \
             FILE_FORMAT = (TYPE = JSON COMPRESSION = AUTO)"
        );
        assert_eq!(unloader.objects(), ["unload/a/data_0_0_0.json".to_string()]);
    }

    #[test]
    fn test_next_file_decompresses_and_brackets() {
        let gz = compress(CompressionKind::Gzip, b"{\"ID\":1}\n{\"ID\":2}\n").expect("gzip");
        let stage = stage_with(&[
            ("unload/b/data_0_0_0.json.gz", gz),
            ("unload/b/data_0_1_0.json", b"{\"ID\":3}\n".to_vec()),
        ]);
        let mut conn = MockConnection::new(Dialect::Snowflake);
        let mut unloader = BulkUnloader::initialize_in(
            Arc::new(stage),
            &ConnectorConfig::default(),
            &mut conn,
            &request(),
            "unload/b/".to_string(),
        )
        .expect("initialize");

        let first = unloader.next_file().expect("first").expect("some");
        assert_eq!(read_all(first), "[{\"ID\":1},{\"ID\":2}]");
        let second = unloader.next_file().expect("second").expect("some");
        assert_eq!(read_all(second), "[{\"ID\":3}]");
        assert!(unloader.next_file().expect("end").is_none());
    }

    #[test]
    fn test_flat_files_are_passed_through() {
        let stage = stage_with(&[("unload/c/data_0.csv", b"ID\n1\n".to_vec())]);
        let mut config = ConnectorConfig::default();
        config.file_format.format_type = FileFormatType::Csv;
        config.header = true;
        let mut conn = MockConnection::new(Dialect::DuckDb);
        let mut unloader = BulkUnloader::initialize_in(
            Arc::new(stage),
            &config,
            &mut conn,
            &request(),
            "unload/c/".to_string(),
        )
        .expect("initialize");

        let sql = conn.executed_sql().pop().expect("copy");
        assert!(sql.starts_with("COPY (SELECT * FROM \"T\" WHERE \"ID\" > 10) TO '@~/unload/c/data_0.csv'"));
        assert!(sql.ends_with("(FORMAT csv, HEADER true)"));
        let file = unloader.next_file().expect("file").expect("some");
        assert_eq!(read_all(file), "ID\n1\n");
    }

    #[test]
    fn test_close_attempts_every_removal_and_reports_all() {
        let stage = stage_with(&[
            ("unload/d/a.json", b"{}\n".to_vec()),
            ("unload/d/b.json", b"{}\n".to_vec()),
            ("unload/d/c.json", b"{}\n".to_vec()),
        ]);
        stage
            .fail_remove
            .lock()
            .expect("lock")
            .extend(["unload/d/a.json".to_string(), "unload/d/c.json".to_string()]);
        let mut conn = MockConnection::new(Dialect::Snowflake);
        let mut unloader = BulkUnloader::initialize_in(
            Arc::new(stage.clone()),
            &ConnectorConfig::default(),
            &mut conn,
            &request(),
            "unload/d/".to_string(),
        )
        .expect("initialize");

        let err = unloader.close_resources().expect_err("two removals fail");
        assert_eq!(err.kind(), ErrorKind::Resource);
        let message = err.to_string();
        assert!(message.contains("2 of 3"));
        assert!(message.contains("unload/d/a.json"));
        assert!(message.contains("unload/d/c.json"));
        assert_eq!(stage.keys(), vec!["unload/d/a.json".to_string(), "unload/d/c.json".to_string()]);

        assert!(unloader.close_resources().is_ok());
        assert_eq!(
            unloader.next_file().expect_err("closed").kind(),
            ErrorKind::Resource
        );
    }

    #[test]
    fn test_copy_failure_is_transfer_error() {
        let stage = stage_with(&[]);
        let mut conn = MockConnection::new(Dialect::Snowflake);
        conn.state()
            .failures
            .push(("COPY INTO".to_string(), "warehouse suspended".to_string()));
        let err = BulkUnloader::initialize_in(
            Arc::new(stage),
            &ConnectorConfig::default(),
            &mut conn,
            &request(),
            "unload/e/".to_string(),
        )
        .expect_err("copy fails");
        assert_eq!(err.kind(), ErrorKind::Transfer);
    }
}
