//! Connection-bound wrapper: one instance drives every operation of one unit
//! of work over a single connection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, instrument, warn};

use crate::bulk::{BulkLoader, BulkUnloader, LoadSummary, LoadTarget, TruncationLedger, UnloadRequest};
use crate::cache::{load_table_metadata, CacheKey, CacheStats, MetadataCache, TableMetadata};
use crate::config::{ConnectorConfig, FileFormatType};
use crate::driver::{Cursor, WarehouseConnection};
use crate::error::{CoreError, Result};
use crate::procedure::{ProcedureSignature, StoredProcedureCallBatcher};
use crate::redact::redact_sql;
use crate::script::MultiStatementExecutor;
use crate::sql_parser::split_statements;
use crate::stage::{Stage, UploadPool};
use crate::statement::bind::json_literal;
use crate::statement::{
    untyped_value, BindMode, BuiltStatement, ParameterBinder, Predicate, SortKey, StatementBuilder,
};
use crate::stream::{BatchArrayStreamer, RowStreamer, StartPosition};
use crate::supplier::{ConnectionScope, ConnectionSupplier, DynamicOverrides};
use crate::types::{CursorColumn, SqlValue, TypedColumnValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    Insert,
    Update,
    Delete,
    /// Delete by key, then insert.
    Upsert,
}

impl WriteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOperation::Insert => "insert",
            WriteOperation::Update => "update",
            WriteOperation::Delete => "delete",
            WriteOperation::Upsert => "upsert",
        }
    }
}

/// Outcome of one input document, by its position in the input.
#[derive(Debug)]
pub struct WriteResult {
    pub index: usize,
    pub outcome: Result<u64>,
}

/// One bulk-load input.
#[derive(Debug, Clone, Default)]
pub struct LoadDocument {
    pub payload: Vec<u8>,
    pub overrides: DynamicOverrides,
}

/// Statements of one document, bound and ready to batch.
struct PreparedWrite {
    index: usize,
    statements: Vec<(String, Vec<SqlValue>)>,
}

impl PreparedWrite {
    fn same_sql(&self, other: &PreparedWrite) -> bool {
        self.statements.len() == other.statements.len()
            && self
                .statements
                .iter()
                .zip(&other.statements)
                .all(|((a, _), (b, _))| a == b)
    }
}

struct WriteContext<'a> {
    binder: &'a ParameterBinder,
    op: WriteOperation,
    table: &'a str,
    keys: &'a [String],
    mode: BindMode,
}

pub struct WarehouseWrapper {
    scope: ConnectionScope,
    config: ConnectorConfig,
    cache: MetadataCache,
    ledger: TruncationLedger,
    stage: Option<Arc<dyn Stage>>,
    uploads: Option<Arc<UploadPool>>,
    rows: RowStreamer,
    open_cursor: Option<Box<dyn Cursor>>,
    write_batches: usize,
}

impl WarehouseWrapper {
    pub fn new(supplier: Box<dyn ConnectionSupplier>, config: ConnectorConfig) -> Self {
        let rows = RowStreamer::new(config.temporal_formats(), config.spill_threshold_bytes);
        Self {
            scope: ConnectionScope::new(supplier),
            cache: MetadataCache::new(config.metadata_cache_size),
            ledger: TruncationLedger::new(),
            stage: None,
            uploads: None,
            rows,
            open_cursor: None,
            write_batches: 0,
            config,
        }
    }

    /// Stage used by bulk load and unload.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Open the connection on first use; batching runs without autocommit.
    fn connect<'s>(
        scope: &'s mut ConnectionScope,
        config: &ConnectorConfig,
    ) -> Result<&'s mut dyn WarehouseConnection> {
        let fresh = !scope.is_open();
        let conn = scope.get()?;
        if fresh {
            let auto_commit = !config.requires_manual_commit();
            conn.set_auto_commit(auto_commit)
                .map_err(|err| CoreError::Resource(format!("failed to set autocommit: {err}")))?;
            debug!(auto_commit, "configured connection");
        }
        Ok(conn)
    }

    /// Supplier overrides, then the configured database and schema.
    fn fallback_overrides(&self) -> DynamicOverrides {
        self.scope.overrides().or(&DynamicOverrides::new(
            self.config.database.clone(),
            self.config.schema.clone(),
        ))
    }

    fn stage(&self) -> Result<Arc<dyn Stage>> {
        self.stage
            .clone()
            .ok_or_else(|| CoreError::Config("no stage configured for bulk transfer".to_string()))
    }

    /// Apply `op` to every document, batching consecutive documents that
    /// produce the same SQL. Errors are reported per document.
    #[instrument(skip(self, op, keys, documents), fields(op = op.as_str(), documents = documents.len()))]
    pub fn write(
        &mut self,
        op: WriteOperation,
        table: &str,
        keys: &[String],
        documents: Vec<Map<String, JsonValue>>,
    ) -> Result<Vec<WriteResult>> {
        let batch_size = self.config.batch_size.max(1);
        let mode = if self.config.bind_supplied_fields && self.config.batch_size <= 1 {
            BindMode::SuppliedOnly
        } else {
            BindMode::AllColumns
        };
        let fallback = self.fallback_overrides();
        let conn = Self::connect(&mut self.scope, &self.config)?;
        let binder = ParameterBinder::new(conn.dialect(), self.config.temporal_formats());
        let manual_commit = !conn.auto_commit();
        let ctx = WriteContext {
            binder: &binder,
            op,
            table,
            keys,
            mode,
        };

        let mut results = Vec::with_capacity(documents.len());
        let mut batch: Vec<PreparedWrite> = Vec::new();
        for (index, mut document) in documents.into_iter().enumerate() {
            let overrides = DynamicOverrides::take_from(&mut document).or(&fallback);
            let statements = match prepare_write(&mut self.cache, conn, &ctx, &overrides, &document) {
                Ok(statements) => statements,
                Err(err) => {
                    debug!(index, error = %err, "document rejected");
                    results.push(WriteResult {
                        index,
                        outcome: Err(err),
                    });
                    continue;
                }
            };
            let prepared = PreparedWrite { index, statements };
            if batch.first().is_some_and(|first| !first.same_sql(&prepared)) {
                self.write_batches += 1;
                results.extend(flush_writes(conn, &mut batch, manual_commit, table, self.write_batches));
            }
            batch.push(prepared);
            if batch.len() >= batch_size {
                self.write_batches += 1;
                results.extend(flush_writes(conn, &mut batch, manual_commit, table, self.write_batches));
            }
        }
        if !batch.is_empty() {
            self.write_batches += 1;
            results.extend(flush_writes(conn, &mut batch, manual_commit, table, self.write_batches));
        }

        results.sort_by_key(|r| r.index);
        let failed = results.iter().filter(|r| r.outcome.is_err()).count();
        info!(table, documents = results.len(), failed, "write finished");
        Ok(results)
    }

    /// Rows of `table` matching `predicate`, as batch-sized JSON arrays.
    /// Columns follow the configured allow-list.
    #[instrument(skip(self, predicate, order_by))]
    pub fn select(
        &mut self,
        table: &str,
        overrides: DynamicOverrides,
        predicate: &Predicate,
        order_by: &[SortKey],
    ) -> Result<QueryBatches<'_>> {
        self.close_cursor()?;
        let overrides = overrides.or(&self.fallback_overrides());
        let conn = Self::connect(&mut self.scope, &self.config)?;
        let metadata = table_metadata(&mut self.cache, conn, &overrides, table)?;
        let dialect = conn.dialect();
        let qualified =
            dialect.qualified_name(overrides.database.as_deref(), overrides.schema.as_deref(), table);
        let built = StatementBuilder::new(dialect, qualified, &metadata).build_select(
            self.config.columns.as_deref(),
            predicate,
            order_by,
        )?;
        let binder = ParameterBinder::new(dialect, self.config.temporal_formats());
        let params = filter_params(&built, predicate, &binder)?;
        debug!(sql = %built.sql, params = params.len(), "running select");
        let cursor = conn
            .query(&built.sql, &params)
            .map_err(|err| CoreError::execution(err, &built.sql, table))?;
        Ok(self.hold_cursor(cursor))
    }

    /// Raw SQL query. Parameters bind by their JSON type.
    #[instrument(skip(self, sql, params), fields(sql = %redact_sql(sql)))]
    pub fn query(&mut self, sql: &str, params: &[JsonValue]) -> Result<QueryBatches<'_>> {
        self.close_cursor()?;
        let conn = Self::connect(&mut self.scope, &self.config)?;
        let values = params.iter().map(untyped_value).collect::<Vec<_>>();
        let cursor = conn
            .query(sql, &values)
            .map_err(|err| CoreError::execution(err, sql, "query"))?;
        Ok(self.hold_cursor(cursor))
    }

    fn hold_cursor(&mut self, cursor: Box<dyn Cursor>) -> QueryBatches<'_> {
        let cursor = self.open_cursor.insert(cursor);
        QueryBatches {
            cursor,
            rows: self.rows.clone(),
            batch_size: self.config.batch_size,
            batches: 0,
            exhausted: false,
        }
    }

    fn close_cursor(&mut self) -> Result<()> {
        match self.open_cursor.take() {
            Some(mut cursor) => cursor
                .close()
                .map_err(|err| CoreError::Resource(format!("failed to close cursor: {err}"))),
            None => Ok(()),
        }
    }

    /// Run a multi-statement script. A `statement_count` of 0 counts the
    /// statements by parsing the script.
    #[instrument(skip(self, script), fields(script = %redact_sql(script)))]
    pub fn execute_script(&mut self, script: &str, statement_count: usize) -> Result<MultiStatementExecutor> {
        let conn = Self::connect(&mut self.scope, &self.config)?;
        let statement_count = match statement_count {
            0 => split_statements(script, conn.dialect())
                .map_err(|err| CoreError::Build(format!("cannot count script statements: {err}")))?
                .len(),
            n => n,
        };
        MultiStatementExecutor::execute(conn, script, statement_count, self.rows.clone())
    }

    /// Call `signature` once per argument map, batching the calls into
    /// scripts. Results come back in input order.
    #[instrument(skip(self, signature, calls), fields(procedure = %signature.name, calls = calls.len()))]
    pub fn call_procedures(
        &mut self,
        signature: ProcedureSignature,
        calls: &[Map<String, JsonValue>],
    ) -> Result<Vec<Result<String>>> {
        let conn = Self::connect(&mut self.scope, &self.config)?;
        let dialect = conn.dialect();
        debug!(ref_cursor = dialect.supports_ref_cursor(), "calling procedures through scripts");
        let binder = ParameterBinder::new(dialect, self.config.temporal_formats());
        let procedure = signature.name.clone();
        let mut batcher = StoredProcedureCallBatcher::new(
            signature,
            binder,
            self.rows.clone(),
            self.config.procedure_script_count,
        );

        let mut results: Vec<Option<Result<String>>> = calls.iter().map(|_| None).collect();
        for (index, args) in calls.iter().enumerate() {
            if let Err(err) = batcher.add_call(args, index) {
                results[index] = Some(Err(err));
                continue;
            }
            if batcher.should_flush() {
                for outcome in batcher.flush(conn) {
                    results[outcome.request] = Some(outcome.result);
                }
            }
        }
        if batcher.pending_calls() > 0 {
            for outcome in batcher.flush(conn) {
                results[outcome.request] = Some(outcome.result);
            }
        }

        Ok(results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.unwrap_or_else(|| {
                    Err(CoreError::Execution {
                        message: "call produced no result".to_string(),
                        sql: String::new(),
                        context: format!("{procedure} call {}", index + 1),
                    })
                })
            })
            .collect())
    }

    /// Bulk load each document into `table` through the stage. With document
    /// batching, consecutive documents for the same target share one upload
    /// and one COPY. Results are per input document.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub fn bulk_load(&mut self, table: &str, documents: Vec<LoadDocument>) -> Result<Vec<Result<LoadSummary>>> {
        let stage = self.stage()?;
        let fallback = self.fallback_overrides();
        let skip_header = self.config.file_format.format_type == FileFormatType::Csv && self.config.header;
        let mut groups: Vec<(Vec<usize>, DynamicOverrides, Vec<u8>)> = Vec::new();
        for (index, document) in documents.into_iter().enumerate() {
            let overrides = document.overrides.or(&fallback);
            let merge = self.config.document_batching
                && groups.last().is_some_and(|(_, target, _)| *target == overrides);
            match groups.last_mut() {
                Some((indices, _, payload)) if merge => {
                    indices.push(index);
                    append_payload(payload, &document.payload, skip_header);
                }
                _ => groups.push((vec![index], overrides, document.payload)),
            }
        }

        let uploads = self.upload_pool()?;
        let conn = Self::connect(&mut self.scope, &self.config)?;
        let dialect = conn.dialect();
        let loader = BulkLoader::new(stage.as_ref(), &self.config, &uploads);
        let total = groups.iter().map(|(indices, _, _)| indices.len()).sum::<usize>();
        let mut results: Vec<Option<Result<LoadSummary>>> = (0..total).map(|_| None).collect();
        for (indices, overrides, payload) in groups {
            let target = LoadTarget {
                table: dialect.qualified_name(overrides.database.as_deref(), overrides.schema.as_deref(), table),
                database: overrides.database,
                schema: overrides.schema,
            };
            let mut result = loader.start(conn, &mut self.ledger, &target, &payload);
            if result.is_ok() && !conn.auto_commit() {
                if let Err(err) = conn.commit() {
                    result = Err(CoreError::Resource(format!("commit after load into {} failed: {err}", target.table)));
                }
            }
            if let Err(err) = &result {
                warn!(table = %target.table, error = %err, "bulk load failed");
            }
            for index in indices {
                results[index] = Some(result.clone());
            }
        }
        Ok(results.into_iter().flatten().collect())
    }

    /// Upload threads, built on the first load and kept for the wrapper's life.
    fn upload_pool(&mut self) -> Result<Arc<UploadPool>> {
        if let Some(uploads) = &self.uploads {
            return Ok(uploads.clone());
        }
        let uploads = Arc::new(UploadPool::new(self.config.stage.upload_parallelism)?);
        self.uploads = Some(uploads.clone());
        Ok(uploads)
    }

    /// Unload rows of `table` matching `predicate` into the stage.
    #[instrument(skip(self, predicate))]
    pub fn bulk_unload(
        &mut self,
        table: &str,
        overrides: DynamicOverrides,
        predicate: &Predicate,
    ) -> Result<BulkUnloader> {
        let stage = self.stage()?;
        let overrides = overrides.or(&self.fallback_overrides());
        let conn = Self::connect(&mut self.scope, &self.config)?;
        let dialect = conn.dialect();
        let qualified =
            dialect.qualified_name(overrides.database.as_deref(), overrides.schema.as_deref(), table);
        let where_clause = match predicate {
            Predicate::All => String::new(),
            _ => {
                let metadata = table_metadata(&mut self.cache, conn, &overrides, table)?;
                let binder = ParameterBinder::new(dialect, self.config.temporal_formats());
                StatementBuilder::new(dialect, qualified.as_str(), &metadata).inline_where(predicate, &binder)?
            }
        };
        let request = UnloadRequest {
            table: qualified,
            columns: self.config.columns.clone(),
            where_clause,
        };
        let unloader = BulkUnloader::initialize(stage, &self.config, conn, &request)?;
        if !conn.auto_commit() {
            conn.commit()
                .map_err(|err| CoreError::Resource(format!("commit after unload failed: {err}")))?;
        }
        Ok(unloader)
    }

    #[instrument(skip(self))]
    pub fn truncate(&mut self, table: &str, overrides: DynamicOverrides) -> Result<u64> {
        let overrides = overrides.or(&self.fallback_overrides());
        let conn = Self::connect(&mut self.scope, &self.config)?;
        let dialect = conn.dialect();
        let qualified =
            dialect.qualified_name(overrides.database.as_deref(), overrides.schema.as_deref(), table);
        let sql = dialect.truncate_table(&qualified);
        let count = conn
            .execute(&sql, &[])
            .map_err(|err| CoreError::execution(err, &sql, qualified.as_str()))?;
        if !conn.auto_commit() {
            conn.commit()
                .map_err(|err| CoreError::Resource(format!("commit after truncate failed: {err}")))?;
        }
        Ok(count)
    }

    /// Close the open cursor, commit, and close the connection. Every step is
    /// attempted; the first failure is returned.
    pub fn close(&mut self) -> Result<()> {
        let mut first: Option<CoreError> = None;
        let mut record = |result: Result<()>| {
            if let Err(err) = result {
                warn!(error = %err, "close step failed");
                first.get_or_insert(err);
            }
        };

        record(self.close_cursor());
        if let Some(conn) = self.scope.current() {
            if !conn.auto_commit() {
                record(
                    conn.commit()
                        .map_err(|err| CoreError::Resource(format!("commit on close failed: {err}"))),
                );
            }
        }
        record(self.scope.release());

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Cached metadata of `table` under the resolved database and schema.
fn table_metadata(
    cache: &mut MetadataCache,
    conn: &mut dyn WarehouseConnection,
    overrides: &DynamicOverrides,
    table: &str,
) -> Result<Arc<TableMetadata>> {
    let catalog = overrides.database.clone().or_else(|| conn.current_database());
    let schema = overrides.schema.clone().or_else(|| conn.current_schema());
    let key = CacheKey::new(conn.url(), catalog.as_deref(), schema.as_deref(), table);
    cache.get_or_load(key, || {
        load_table_metadata(conn, catalog.as_deref(), schema.as_deref(), table)
    })
}

/// Case-insensitive field lookup, exact match first.
fn field<'d>(document: &'d Map<String, JsonValue>, column: &str) -> Option<&'d JsonValue> {
    document.get(column).or_else(|| {
        document
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    })
}

/// Values for every slot: the document field, else the cached default, else NULL.
fn bind_slots(
    built: &BuiltStatement,
    binder: &ParameterBinder,
    metadata: &TableMetadata,
    document: &Map<String, JsonValue>,
) -> Result<Vec<SqlValue>> {
    built
        .slots
        .iter()
        .map(|slot| match field(document, &slot.column) {
            Some(value) => binder.bind_column(&TypedColumnValue::new(
                slot.column.clone(),
                slot.semantic_type,
                json_literal(value),
            )),
            None => Ok(metadata
                .default_value(&slot.column)
                .cloned()
                .unwrap_or(SqlValue::Null)),
        })
        .collect()
}

fn filter_params(built: &BuiltStatement, predicate: &Predicate, binder: &ParameterBinder) -> Result<Vec<SqlValue>> {
    match predicate {
        Predicate::All => Ok(Vec::new()),
        Predicate::Filters(filters) => built
            .slots
            .iter()
            .zip(filters)
            .map(|(slot, filter)| binder.bind_json(slot.semantic_type, &filter.argument))
            .collect(),
        Predicate::Keys(_) => Err(CoreError::Build(
            "select by key needs filter arguments".to_string(),
        )),
    }
}

fn prepare_write(
    cache: &mut MetadataCache,
    conn: &mut dyn WarehouseConnection,
    ctx: &WriteContext<'_>,
    overrides: &DynamicOverrides,
    document: &Map<String, JsonValue>,
) -> Result<Vec<(String, Vec<SqlValue>)>> {
    let metadata = table_metadata(cache, conn, overrides, ctx.table)?;
    let dialect = conn.dialect();
    let qualified =
        dialect.qualified_name(overrides.database.as_deref(), overrides.schema.as_deref(), ctx.table);
    let builder = StatementBuilder::new(dialect, qualified, &metadata);
    let supplied = document.keys().cloned().collect::<Vec<_>>();

    if ctx.op != WriteOperation::Insert {
        if let Some(missing) = ctx.keys.iter().find(|key| field(document, key).is_none()) {
            return Err(CoreError::Validation(format!(
                "document is missing key column {missing}"
            )));
        }
    }

    let mut built = Vec::with_capacity(2);
    match ctx.op {
        WriteOperation::Insert => built.push(builder.build_insert(&supplied, ctx.mode)?),
        WriteOperation::Update => built.push(builder.build_update(&supplied, ctx.keys)?),
        WriteOperation::Delete => built.push(builder.build_delete(&Predicate::Keys(ctx.keys.to_vec()))?),
        WriteOperation::Upsert => {
            built.push(builder.build_delete(&Predicate::Keys(ctx.keys.to_vec()))?);
            built.push(builder.build_insert(&supplied, ctx.mode)?);
        }
    }
    built
        .into_iter()
        .map(|statement| {
            let values = bind_slots(&statement, ctx.binder, &metadata, document)?;
            Ok((statement.sql, values))
        })
        .collect()
}

/// Execute one batch, statement by statement, then commit. A driver failure
/// or a failed commit is attributed to every document of the batch.
fn flush_writes(
    conn: &mut dyn WarehouseConnection,
    batch: &mut Vec<PreparedWrite>,
    manual_commit: bool,
    table: &str,
    ordinal: usize,
) -> Vec<WriteResult> {
    let mut prepared = std::mem::take(batch);
    let statement_count = match prepared.first() {
        Some(first) => first.statements.len(),
        None => return Vec::new(),
    };
    let context = format!("{table} batch {ordinal}");
    let mut counts = vec![0u64; prepared.len()];
    let mut failure: Option<CoreError> = None;

    for position in 0..statement_count {
        let sql = prepared[0].statements[position].0.clone();
        let param_sets = prepared
            .iter_mut()
            .map(|write| std::mem::take(&mut write.statements[position].1))
            .collect::<Vec<_>>();
        match conn.execute_batch(&sql, &param_sets) {
            Ok(affected) => {
                for (count, n) in counts.iter_mut().zip(affected) {
                    *count = n;
                }
            }
            Err(err) => {
                warn!(context = %context, error = %err, "batch failed");
                failure = Some(CoreError::execution(err, &sql, context.as_str()));
                break;
            }
        }
    }

    if failure.is_none() && manual_commit {
        if let Err(err) = conn.commit() {
            failure = Some(CoreError::Resource(format!("commit after {context} failed: {err}")));
        }
    }
    debug!(context = %context, documents = prepared.len(), ok = failure.is_none(), "flushed write batch");

    prepared
        .into_iter()
        .zip(counts)
        .map(|(write, count)| WriteResult {
            index: write.index,
            outcome: match &failure {
                Some(err) => Err(err.clone()),
                None => Ok(count),
            },
        })
        .collect()
}

/// Append one CSV or JSON payload to a batched upload.
fn append_payload(payload: &mut Vec<u8>, next: &[u8], skip_header: bool) {
    let body = if skip_header {
        match next.iter().position(|b| *b == b'\n') {
            Some(pos) => &next[pos + 1..],
            None => &[][..],
        }
    } else {
        next
    };
    if !payload.is_empty() && !payload.ends_with(b"\n") {
        payload.push(b'\n');
    }
    payload.extend_from_slice(body);
}

/// Batch-sized JSON arrays over an open cursor.
///
/// Each array must be read to the end or dropped before the next is requested;
/// the borrow checker enforces it.
pub struct QueryBatches<'w> {
    cursor: &'w mut Box<dyn Cursor>,
    rows: RowStreamer,
    batch_size: usize,
    batches: usize,
    exhausted: bool,
}

impl<'w> QueryBatches<'w> {
    pub fn columns(&self) -> &[CursorColumn] {
        self.cursor.columns()
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// The next array, or `None` once the cursor has no more rows.
    pub fn next_batch(&mut self) -> Result<Option<BatchArrayStreamer<&mut Box<dyn Cursor>>>> {
        if self.exhausted {
            return Ok(None);
        }
        let has_row = self.cursor.advance().map_err(|err| CoreError::Execution {
            message: err.message,
            sql: String::new(),
            context: format!("fetching batch {}", self.batches + 1),
        })?;
        if !has_row {
            self.exhausted = true;
            return Ok(None);
        }
        self.batches += 1;
        Ok(Some(BatchArrayStreamer::new(
            &mut *self.cursor,
            self.rows.clone(),
            self.batch_size,
            StartPosition::OnRow,
        )))
    }
}
