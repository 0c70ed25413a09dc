//! Embedded DuckDB driver.
//!
//! Connections come from an r2d2 pool whose connections all share one
//! database, so a wrapper that returns its connection and checks out another
//! still sees the same tables.
//!
//! Each checked-out connection is owned by a worker thread. Queries run as
//! streaming statements on that thread and [`ArrowCursor`] pulls one Arrow
//! batch at a time, so a result set is never held in memory as a whole. Any
//! other request on the connection closes the open result set first.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use duckdb::arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float32Array,
    Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, LargeBinaryArray,
    LargeStringArray, StringArray, Time64MicrosecondArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use duckdb::arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::arrow::util::display::array_value_to_string;
use duckdb::types::{TimeUnit as DuckTimeUnit, Value};
use duckdb::{params_from_iter, Connection};
use r2d2::{CustomizeConnection, ManageConnection, Pool, PooledConnection};
use tracing::{debug, info, instrument, warn};

use crate::dialect::Dialect;
use crate::driver::{Cursor, MultiResult, WarehouseConnection};
use crate::error::{CoreError, DriverError, Result};
use crate::sql_parser::{split_statements, ParsedStatement};
use crate::supplier::{ConnectionSupplier, DynamicOverrides};
use crate::types::{ColumnMeta, CursorColumn, SemanticType, SqlValue};

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Pool of connections onto one embedded database.
#[derive(Clone)]
pub struct EnginePool {
    pool: Pool<DuckDbManager>,
    url: String,
}

/// r2d2 manager handing out clones of a single root connection.
pub struct DuckDbManager {
    root: Mutex<Connection>,
}

impl EnginePool {
    /// Open `url` (a file path, or `:memory:`) and build a pool over it.
    #[instrument]
    pub fn open(url: &str, max_size: u32) -> Result<Self> {
        let root = if url.is_empty() || url == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(url)
        }
        .map_err(|err| CoreError::Resource(format!("failed to open DuckDB at {url}: {err}")))?;

        let catalog: String = root
            .query_row("SELECT current_database()", [], |row| row.get(0))
            .map_err(|err| CoreError::Resource(format!("failed to read current database: {err}")))?;

        let manager = DuckDbManager {
            root: Mutex::new(root),
        };
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .min_idle(Some(1))
            .connection_customizer(Box::new(ResetOnAcquire { catalog }))
            .build(manager)
            .map_err(|err| CoreError::Resource(format!("failed to build DuckDB pool: {err}")))?;

        info!(url, "opened DuckDB engine pool");
        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    #[instrument(skip(self))]
    pub fn checkout(&self) -> Result<DuckDbConnection> {
        let pooled = self
            .pool
            .get_timeout(Duration::from_secs(5))
            .map_err(|err| CoreError::Resource(format!("failed to get pooled DuckDB connection: {err}")))?;
        let (worker, thread) = Worker::spawn(pooled)
            .map_err(|err| CoreError::Resource(format!("failed to start DuckDB connection worker: {err}")))?;
        debug!("checked out pooled DuckDB connection");
        Ok(DuckDbConnection {
            worker,
            thread: Some(thread),
            url: self.url.clone(),
            auto_commit: true,
            in_transaction: false,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ManageConnection for DuckDbManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> std::result::Result<Connection, duckdb::Error> {
        // A panic elsewhere cannot leave the root handle half-updated; cloning stays valid.
        let root = self.root.lock().unwrap_or_else(|poisoned| {
            warn!("root DuckDB connection lock was poisoned, recovering it");
            poisoned.into_inner()
        });
        root.try_clone()
    }

    fn is_valid(&self, conn: &mut Connection) -> std::result::Result<(), duckdb::Error> {
        conn.execute_batch("SELECT 1;")
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

#[derive(Debug)]
struct ResetOnAcquire {
    catalog: String,
}

impl CustomizeConnection<Connection, duckdb::Error> for ResetOnAcquire {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), duckdb::Error> {
        if let Err(err) = conn.execute_batch("ROLLBACK;") {
            let msg = err.to_string();
            if !msg.contains("no transaction is active") {
                return Err(err);
            }
        }
        let catalog = Dialect::DuckDb.quote_identifier(&self.catalog);
        conn.execute_batch(&format!("USE {catalog}; SET schema = 'main';"))
    }
}

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

type Opened = std::result::Result<(SchemaRef, u64), DriverError>;

type Fetched = std::result::Result<Option<RecordBatch>, DriverError>;

enum Request {
    Run(Job),
    Open {
        sql: String,
        params: Vec<Value>,
        reply: SyncSender<Opened>,
    },
    Fetch {
        stream: u64,
        reply: SyncSender<Fetched>,
    },
    CloseStream {
        stream: u64,
    },
    Shutdown,
}

fn worker_stopped() -> DriverError {
    DriverError::new("connection worker stopped")
}

fn reply<T>(tx: &SyncSender<T>, value: T) {
    if tx.send(value).is_err() {
        debug!("caller stopped waiting for a DuckDB reply");
    }
}

/// Handle onto the thread that owns one pooled connection.
#[derive(Clone)]
struct Worker {
    requests: Sender<Request>,
}

impl Worker {
    fn spawn(conn: PooledConnection<DuckDbManager>) -> std::io::Result<(Self, JoinHandle<()>)> {
        let (requests, inbox) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("drifthaul-duckdb".to_string())
            .spawn(move || serve(conn, inbox))?;
        Ok((Self { requests }, thread))
    }

    fn send(&self, request: Request) -> std::result::Result<(), DriverError> {
        self.requests.send(request).map_err(|_| worker_stopped())
    }

    /// Run `f` against the connection and wait for its result.
    fn run<T, F>(&self, f: F) -> std::result::Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> std::result::Result<T, duckdb::Error> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.send(Request::Run(Box::new(move |conn: &mut Connection| {
            reply(&tx, f(conn).map_err(DriverError::from));
        })))?;
        rx.recv().map_err(|_| worker_stopped())?
    }

    /// Start a streaming query and return a cursor over it.
    fn open(&self, sql: String, params: Vec<Value>) -> std::result::Result<ArrowCursor, DriverError> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.send(Request::Open { sql, params, reply: tx })?;
        let (schema, stream) = rx.recv().map_err(|_| worker_stopped())??;
        let columns = schema
            .fields()
            .iter()
            .map(|field| CursorColumn::new(field.name().clone(), semantic_type_of(field.data_type())))
            .collect();
        Ok(ArrowCursor::new(columns, self.clone(), stream))
    }

    fn fetch(&self, stream: u64) -> Fetched {
        let (tx, rx) = mpsc::sync_channel(1);
        self.send(Request::Fetch { stream, reply: tx })?;
        rx.recv().map_err(|_| worker_stopped())?
    }
}

fn serve(mut conn: PooledConnection<DuckDbManager>, inbox: Receiver<Request>) {
    let mut streams = 0u64;
    let mut pending: Option<Request> = None;
    loop {
        let request = match pending.take() {
            Some(request) => request,
            None => match inbox.recv() {
                Ok(request) => request,
                Err(_) => break,
            },
        };
        match request {
            Request::Run(job) => job(&mut *conn),
            Request::Open { sql, params, reply } => {
                streams += 1;
                pending = stream_results(&conn, streams, &sql, &params, &reply, &inbox);
            }
            Request::Fetch { reply: tx, .. } => reply(&tx, Err(DriverError::new("result set is closed"))),
            Request::CloseStream { .. } => {}
            Request::Shutdown => break,
        }
    }
    debug!(streams, "DuckDB connection worker stopped");
}

/// Serve fetches for one streaming statement. Returns the request that
/// ended the stream, if it still needs handling.
fn stream_results(
    conn: &Connection,
    id: u64,
    sql: &str,
    params: &[Value],
    opened: &SyncSender<Opened>,
    inbox: &Receiver<Request>,
) -> Option<Request> {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(err) => {
            reply(opened, Err(err.into()));
            return None;
        }
    };
    let schema = match stmt.stream_arrow(params_from_iter(params.iter())) {
        Ok(arrow) => arrow.get_schema(),
        Err(err) => {
            reply(opened, Err(err.into()));
            return None;
        }
    };
    reply(opened, Ok((schema, id)));

    loop {
        match inbox.recv() {
            Ok(Request::Fetch { stream, reply: tx }) if stream == id => {
                let batch = stmt
                    .step()
                    .map(|chunk| chunk.map(|array| RecordBatch::from(&array)))
                    .map_err(DriverError::from);
                reply(&tx, batch);
            }
            Ok(Request::Fetch { reply: tx, .. }) => {
                reply(&tx, Err(DriverError::new("result set is closed")))
            }
            Ok(Request::CloseStream { stream }) if stream == id => return None,
            Ok(Request::CloseStream { .. }) => {}
            Ok(other) => return Some(other),
            Err(_) => return Some(Request::Shutdown),
        }
    }
}

/// One checked-out DuckDB connection.
pub struct DuckDbConnection {
    worker: Worker,
    thread: Option<JoinHandle<()>>,
    url: String,
    auto_commit: bool,
    in_transaction: bool,
}

impl DuckDbConnection {
    fn with_conn<T, F>(&self, f: F) -> std::result::Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> std::result::Result<T, duckdb::Error> + Send + 'static,
    {
        self.ensure_open()?;
        self.worker.run(f)
    }

    fn ensure_open(&self) -> std::result::Result<(), DriverError> {
        match self.thread {
            Some(_) => Ok(()),
            None => Err(DriverError::new("connection is closed")),
        }
    }

    fn scalar_text(&self, sql: &'static str) -> Option<String> {
        self.with_conn(move |conn| conn.query_row(sql, [], |row| row.get::<_, String>(0)))
            .ok()
    }

    fn begin(&mut self) -> std::result::Result<(), DriverError> {
        if !self.in_transaction {
            self.with_conn(|conn| conn.execute_batch("BEGIN TRANSACTION"))?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn run_query(&self, sql: &str, params: &[SqlValue]) -> std::result::Result<ArrowCursor, DriverError> {
        self.ensure_open()?;
        let values = params.iter().map(to_duckdb_value).collect::<Vec<_>>();
        let cursor = self.worker.open(sql.to_string(), values)?;
        debug!(columns = cursor.columns.len(), "opened streaming query");
        Ok(cursor)
    }

    /// Stop the worker; the pooled connection goes back to the pool.
    fn shutdown(&mut self) -> std::result::Result<(), DriverError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        if self.worker.send(Request::Shutdown).is_err() {
            debug!("DuckDB connection worker already stopped");
        }
        thread
            .join()
            .map_err(|_| DriverError::new("connection worker panicked"))
    }
}

impl Drop for DuckDbConnection {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "failed to stop DuckDB connection worker");
        }
    }
}

impl WarehouseConnection for DuckDbConnection {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn current_database(&self) -> Option<String> {
        self.scalar_text("SELECT current_database()")
    }

    fn current_schema(&self) -> Option<String> {
        self.scalar_text("SELECT current_schema()")
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> std::result::Result<(), DriverError> {
        if auto_commit == self.auto_commit {
            return Ok(());
        }
        if auto_commit {
            if self.in_transaction {
                self.with_conn(|conn| conn.execute_batch("COMMIT"))?;
                self.in_transaction = false;
            }
        } else {
            self.begin()?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    #[instrument(skip(self, params), fields(param_count = params.len()))]
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, DriverError> {
        let sql = sql.to_string();
        let values = params.iter().map(to_duckdb_value).collect::<Vec<_>>();
        let affected = self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            stmt.execute(params_from_iter(values.iter()))
        })?;
        debug!(affected, "executed statement");
        Ok(affected as u64)
    }

    #[instrument(skip(self, param_sets), fields(sets = param_sets.len()))]
    fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<SqlValue>],
    ) -> std::result::Result<Vec<u64>, DriverError> {
        let sql = sql.to_string();
        let sets = param_sets
            .iter()
            .map(|params| params.iter().map(to_duckdb_value).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let counts = self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut counts = Vec::with_capacity(sets.len());
            for values in &sets {
                counts.push(stmt.execute(params_from_iter(values.iter()))? as u64);
            }
            Ok(counts)
        })?;
        debug!(statements = counts.len(), "executed batch");
        Ok(counts)
    }

    #[instrument(skip(self, params), fields(param_count = params.len()))]
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<Box<dyn Cursor>, DriverError> {
        Ok(Box::new(self.run_query(sql, params)?))
    }

    #[instrument(skip(self, script))]
    fn execute_script(
        &mut self,
        script: &str,
        statement_count: usize,
    ) -> std::result::Result<Box<dyn MultiResult>, DriverError> {
        self.ensure_open()?;
        let statements = split_statements(script, Dialect::DuckDb).map_err(DriverError::new)?;
        if statements.len() != statement_count {
            return Err(DriverError::new(format!(
                "actual statement count {} did not match the desired statement count {}",
                statements.len(),
                statement_count
            )));
        }
        Ok(Box::new(ScriptResults::start(self.worker.clone(), statements)?))
    }

    #[instrument(skip(self))]
    fn columns(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> std::result::Result<Vec<ColumnMeta>, DriverError> {
        let catalog = match catalog {
            Some(c) => c.to_string(),
            None => self.scalar_text("SELECT current_database()").unwrap_or_default(),
        };
        let schema = match schema {
            Some(s) => s.to_string(),
            None => self.scalar_text("SELECT current_schema()").unwrap_or_default(),
        };
        let key = [catalog.clone(), schema.clone(), table.to_string()];
        let rows = self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_catalog = ? AND table_schema = ? AND table_name = ? \
                 ORDER BY ordinal_position",
            )?;
            let mapped = stmt.query_map(params_from_iter(key.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?;
            mapped.collect::<std::result::Result<Vec<_>, _>>()
        })?;
        if rows.is_empty() {
            return Err(DriverError::new(format!(
                "table {catalog}.{schema}.{table} does not exist"
            )));
        }
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(ordinal, (name, type_name, nullable, default_expr))| {
                let mut meta = ColumnMeta::new(name, type_name, ordinal + 1);
                meta.nullable = nullable == "YES";
                meta.default_expr = default_expr;
                meta
            })
            .collect())
    }

    fn commit(&mut self) -> std::result::Result<(), DriverError> {
        if self.in_transaction {
            self.with_conn(|conn| conn.execute_batch("COMMIT"))?;
            self.in_transaction = false;
        }
        if !self.auto_commit {
            self.begin()?;
        }
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), DriverError> {
        // Open work is rolled back by the pool customizer on the next checkout.
        self.in_transaction = false;
        self.shutdown()
    }
}

/// Script results, executing the next statement only when asked for it.
struct ScriptResults {
    worker: Worker,
    statements: VecDeque<ParsedStatement>,
    current: Option<ScriptStep>,
}

enum ScriptStep {
    Rows(ArrowCursor),
    Count(u64),
}

impl ScriptResults {
    /// Runs the first statement; its failure fails the submission.
    fn start(worker: Worker, statements: Vec<ParsedStatement>) -> std::result::Result<Self, DriverError> {
        let mut results = Self {
            worker,
            statements: statements.into(),
            current: None,
        };
        results.more_results()?;
        Ok(results)
    }
}

impl MultiResult for ScriptResults {
    fn take_result_set(&mut self) -> Option<Box<dyn Cursor>> {
        match self.current.take() {
            Some(ScriptStep::Rows(cursor)) => Some(Box::new(cursor)),
            other => {
                self.current = other;
                None
            }
        }
    }

    fn update_count(&self) -> i64 {
        match &self.current {
            Some(ScriptStep::Count(n)) => *n as i64,
            _ => -1,
        }
    }

    fn more_results(&mut self) -> std::result::Result<bool, DriverError> {
        self.current = None;
        let Some(statement) = self.statements.pop_front() else {
            return Ok(false);
        };
        let step = if statement.is_query() {
            self.worker
                .open(statement.sql().to_string(), Vec::new())
                .map(ScriptStep::Rows)
        } else {
            let sql = statement.sql().to_string();
            self.worker
                .run(move |conn| conn.execute(&sql, []))
                .map(|count| ScriptStep::Count(count as u64))
        };
        match step {
            Ok(step) => {
                let is_rows = matches!(step, ScriptStep::Rows(_));
                self.current = Some(step);
                Ok(is_rows)
            }
            Err(err) => {
                self.statements.clear();
                Err(err)
            }
        }
    }
}

/// Supplies pooled DuckDB connections; they return to the pool when closed.
pub struct DuckDbSupplier {
    pool: EnginePool,
    overrides: DynamicOverrides,
}

impl DuckDbSupplier {
    pub fn new(pool: EnginePool) -> Self {
        Self {
            pool,
            overrides: DynamicOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: DynamicOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

impl ConnectionSupplier for DuckDbSupplier {
    fn connect(&mut self) -> Result<Box<dyn WarehouseConnection>> {
        Ok(Box::new(self.pool.checkout()?))
    }

    fn overrides(&self) -> &DynamicOverrides {
        &self.overrides
    }
}

/// Row-at-a-time cursor over a streaming query, fetching one Arrow batch
/// at a time from the connection worker.
pub struct ArrowCursor {
    columns: Vec<CursorColumn>,
    worker: Worker,
    stream: u64,
    current: Option<RecordBatch>,
    row: usize,
    exhausted: bool,
    batches_fetched: usize,
}

impl ArrowCursor {
    fn new(columns: Vec<CursorColumn>, worker: Worker, stream: u64) -> Self {
        Self {
            columns,
            worker,
            stream,
            current: None,
            row: 0,
            exhausted: false,
            batches_fetched: 0,
        }
    }
}

impl Cursor for ArrowCursor {
    fn columns(&self) -> &[CursorColumn] {
        &self.columns
    }

    fn advance(&mut self) -> std::result::Result<bool, DriverError> {
        if let Some(batch) = &self.current {
            if self.row + 1 < batch.num_rows() {
                self.row += 1;
                return Ok(true);
            }
        }
        self.current = None;
        while !self.exhausted {
            match self.worker.fetch(self.stream)? {
                Some(batch) => {
                    self.batches_fetched += 1;
                    if batch.num_rows() > 0 {
                        self.current = Some(batch);
                        self.row = 0;
                        return Ok(true);
                    }
                }
                None => {
                    self.exhausted = true;
                    debug!(batches = self.batches_fetched, "result set drained");
                }
            }
        }
        Ok(false)
    }

    fn value(&self, index: usize) -> std::result::Result<SqlValue, DriverError> {
        let batch = self
            .current
            .as_ref()
            .ok_or_else(|| DriverError::new("cursor is not positioned on a row"))?;
        if index >= batch.num_columns() {
            return Err(DriverError::new(format!("column index {index} out of range")));
        }
        value_from_array(batch.column(index), self.row)
    }

    fn close(&mut self) -> std::result::Result<(), DriverError> {
        self.current = None;
        if !self.exhausted {
            self.exhausted = true;
            if self.worker.send(Request::CloseStream { stream: self.stream }).is_err() {
                debug!("connection closed before its result set");
            }
        }
        Ok(())
    }
}

fn semantic_type_of(data_type: &DataType) -> SemanticType {
    match data_type {
        DataType::Boolean => SemanticType::Boolean,
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => SemanticType::Integer,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => SemanticType::Double,
        DataType::Decimal128(_, 0) | DataType::Decimal256(_, 0) => SemanticType::Integer,
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => SemanticType::Decimal,
        DataType::Date32 | DataType::Date64 => SemanticType::Date,
        DataType::Time32(_) | DataType::Time64(_) => SemanticType::Time,
        DataType::Timestamp(_, None) => SemanticType::TimestampNtz,
        DataType::Timestamp(_, Some(_)) => SemanticType::TimestampTz,
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
            SemanticType::Binary
        }
        DataType::List(_) | DataType::LargeList(_) | DataType::Struct(_) | DataType::Map(_, _) => {
            SemanticType::Variant
        }
        _ => SemanticType::Varchar,
    }
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef) -> std::result::Result<&'a T, DriverError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        DriverError::new(format!(
            "failed to downcast {} to {}",
            array.data_type(),
            std::any::type_name::<T>()
        ))
    })
}

fn timestamp_from(unit: &TimeUnit, value: i64) -> Option<NaiveDateTime> {
    let dt = match unit {
        TimeUnit::Second => DateTime::from_timestamp(value, 0),
        TimeUnit::Millisecond => DateTime::from_timestamp_millis(value),
        TimeUnit::Microsecond => DateTime::from_timestamp_micros(value),
        TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(value)),
    }?;
    Some(dt.naive_utc())
}

fn value_from_array(array: &ArrayRef, row: usize) -> std::result::Result<SqlValue, DriverError> {
    if array.is_null(row) {
        return Ok(SqlValue::Null);
    }

    let value = match array.data_type() {
        DataType::Null => SqlValue::Null,
        DataType::Boolean => SqlValue::Boolean(downcast::<BooleanArray>(array)?.value(row)),
        DataType::Int8 => SqlValue::BigInt(downcast::<Int8Array>(array)?.value(row).into()),
        DataType::Int16 => SqlValue::BigInt(downcast::<Int16Array>(array)?.value(row).into()),
        DataType::Int32 => SqlValue::BigInt(downcast::<Int32Array>(array)?.value(row).into()),
        DataType::Int64 => SqlValue::BigInt(downcast::<Int64Array>(array)?.value(row)),
        DataType::UInt8 => SqlValue::BigInt(downcast::<UInt8Array>(array)?.value(row).into()),
        DataType::UInt16 => SqlValue::BigInt(downcast::<UInt16Array>(array)?.value(row).into()),
        DataType::UInt32 => SqlValue::BigInt(downcast::<UInt32Array>(array)?.value(row).into()),
        DataType::UInt64 => {
            let v = downcast::<UInt64Array>(array)?.value(row);
            match i64::try_from(v) {
                Ok(v) => SqlValue::BigInt(v),
                Err(_) => SqlValue::Decimal(BigDecimal::from(v)),
            }
        }
        DataType::Float32 => SqlValue::Double(downcast::<Float32Array>(array)?.value(row).into()),
        DataType::Float64 => SqlValue::Double(downcast::<Float64Array>(array)?.value(row)),
        DataType::Decimal128(_, scale) => {
            let raw = downcast::<Decimal128Array>(array)?.value(row);
            SqlValue::Decimal(BigDecimal::new(raw.into(), i64::from(*scale)))
        }
        DataType::Utf8 => SqlValue::Text(downcast::<StringArray>(array)?.value(row).to_string()),
        DataType::LargeUtf8 => {
            SqlValue::Text(downcast::<LargeStringArray>(array)?.value(row).to_string())
        }
        DataType::Binary => SqlValue::Binary(downcast::<BinaryArray>(array)?.value(row).to_vec()),
        DataType::LargeBinary => {
            SqlValue::Binary(downcast::<LargeBinaryArray>(array)?.value(row).to_vec())
        }
        DataType::Date32 => {
            let days = downcast::<Date32Array>(array)?.value(row);
            NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                .map(SqlValue::Date)
                .ok_or_else(|| DriverError::new(format!("date out of range: {days}")))?
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            let micros = downcast::<Time64MicrosecondArray>(array)?.value(row);
            NaiveTime::from_num_seconds_from_midnight_opt(
                (micros / 1_000_000) as u32,
                ((micros % 1_000_000) * 1_000) as u32,
            )
            .map(SqlValue::Time)
            .ok_or_else(|| DriverError::new(format!("time out of range: {micros}")))?
        }
        DataType::Timestamp(unit, tz) => {
            let raw = match unit {
                TimeUnit::Second => downcast::<TimestampSecondArray>(array)?.value(row),
                TimeUnit::Millisecond => downcast::<TimestampMillisecondArray>(array)?.value(row),
                TimeUnit::Microsecond => downcast::<TimestampMicrosecondArray>(array)?.value(row),
                TimeUnit::Nanosecond => downcast::<TimestampNanosecondArray>(array)?.value(row),
            };
            let naive = timestamp_from(unit, raw)
                .ok_or_else(|| DriverError::new(format!("timestamp out of range: {raw}")))?;
            match tz {
                Some(_) => SqlValue::TimestampTz(naive.and_utc().fixed_offset()),
                None => SqlValue::Timestamp(naive),
            }
        }
        _ => SqlValue::Text(display_value(array, row)?),
    };
    Ok(value)
}

fn display_value(array: &ArrayRef, row: usize) -> std::result::Result<String, DriverError> {
    array_value_to_string(array, row).map_err(|err| DriverError::new(err.to_string()))
}

fn to_duckdb_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Boolean(b) => Value::Boolean(*b),
        SqlValue::BigInt(v) => Value::BigInt(*v),
        // Bound as text; DuckDB casts to the target column type.
        SqlValue::Decimal(d) => Value::Text(d.to_plain_string()),
        SqlValue::Double(d) => Value::Double(*d),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Date(d) => Value::Text(d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => Value::Text(t.format("%H:%M:%S%.f").to_string()),
        SqlValue::Timestamp(ts) => {
            Value::Timestamp(DuckTimeUnit::Microsecond, ts.and_utc().timestamp_micros())
        }
        SqlValue::TimestampTz(ts) => Value::Timestamp(DuckTimeUnit::Microsecond, ts.timestamp_micros()),
        SqlValue::Binary(bytes) => Value::Blob(bytes.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn pool() -> EnginePool {
        EnginePool::open(":memory:", 2).expect("pool should open")
    }

    #[test]
    fn test_connections_share_database() {
        let pool = pool();
        let mut first = pool.checkout().expect("checkout");
        first
            .execute("CREATE TABLE shared (id INTEGER)", &[])
            .expect("create");
        first.close().expect("close");
        let mut second = pool.checkout().expect("checkout");
        let cols = second.columns(None, None, "shared").expect("columns");
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].semantic_type, SemanticType::Integer);
    }

    #[test]
    fn test_query_cursor_reads_typed_values() {
        let pool = pool();
        let mut conn = pool.checkout().expect("checkout");
        let mut cursor = conn
            .query(
                "SELECT 1::BIGINT AS a, 'x' AS b, DATE '2024-03-01' AS c, 2.5::DOUBLE AS d, NULL AS e",
                &[],
            )
            .expect("query");
        let names: Vec<_> = cursor.columns().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert!(cursor.advance().expect("advance"));
        assert_eq!(cursor.value(0).expect("a"), SqlValue::BigInt(1));
        assert_eq!(cursor.value(1).expect("b"), SqlValue::Text("x".into()));
        assert_eq!(
            cursor.value(2).expect("c"),
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(cursor.value(3).expect("d"), SqlValue::Double(2.5));
        assert_eq!(cursor.value(4).expect("e"), SqlValue::Null);
        assert!(!cursor.advance().expect("advance"));
    }

    #[test]
    fn test_execute_script_checks_statement_count() {
        let pool = pool();
        let mut conn = pool.checkout().expect("checkout");
        let err = conn
            .execute_script("SELECT 1; SELECT 'a;b'", 3)
            .err()
            .expect("count mismatch should fail");
        assert!(err.message.contains("did not match"));

        let mut results = conn
            .execute_script("CREATE TABLE s (v VARCHAR); INSERT INTO s VALUES ('a;b'); SELECT v FROM s", 3)
            .expect("script");
        assert!(results.take_result_set().is_none());
        assert_eq!(results.update_count(), 0);
        assert!(!results.more_results().expect("next"));
        assert_eq!(results.update_count(), 1);
        assert!(results.more_results().expect("next"));
        let mut rows = results.take_result_set().expect("rows");
        assert!(rows.advance().expect("advance"));
        assert_eq!(rows.value(0).expect("v"), SqlValue::Text("a;b".into()));
        assert!(!results.more_results().expect("end"));
        assert_eq!(results.update_count(), -1);
    }

    #[test]
    fn test_decimals_keep_full_precision() {
        let pool = pool();
        let mut conn = pool.checkout().expect("checkout");
        let big = BigDecimal::from_str("12345678901234567890123456789012345678").unwrap();
        let mut cursor = conn
            .query(
                "SELECT ?::DECIMAL(38,0) AS big, '-1.25'::DECIMAL(10,2) AS small",
                &[SqlValue::Decimal(big.clone())],
            )
            .expect("query");
        assert!(cursor.advance().expect("advance"));
        assert_eq!(cursor.value(0).expect("big"), SqlValue::Decimal(big));
        assert_eq!(
            cursor.value(1).expect("small"),
            SqlValue::Decimal(BigDecimal::from_str("-1.25").unwrap())
        );
    }

    #[test]
    fn test_cursor_fetches_batches_on_demand() {
        let pool = pool();
        let conn = pool.checkout().expect("checkout");
        let mut cursor = conn
            .run_query("SELECT range AS n FROM range(0, 1000000)", &[])
            .expect("query");
        assert!(cursor.advance().expect("first row"));
        assert!(cursor.batches_fetched <= 2, "fetched {} batches", cursor.batches_fetched);

        let mut rows = 1u64;
        while rows < 5_000 {
            assert!(cursor.advance().expect("advance"));
            rows += 1;
        }
        assert!(cursor.batches_fetched <= 5, "fetched {} batches", cursor.batches_fetched);

        while cursor.advance().expect("advance") {
            rows += 1;
        }
        assert_eq!(rows, 1_000_000);
        assert!(cursor.batches_fetched > 100, "fetched {} batches", cursor.batches_fetched);
    }

    #[test]
    fn test_next_statement_closes_open_result_set() {
        let pool = pool();
        let mut conn = pool.checkout().expect("checkout");
        let mut cursor = conn.query("SELECT * FROM range(0, 100000)", &[]).expect("query");
        assert!(cursor.advance().expect("advance"));
        conn.execute("CREATE TABLE after_stream (id INTEGER)", &[])
            .expect("create while a result set is open");
        let err = (0..100_000)
            .find_map(|_| cursor.advance().err())
            .expect("closed result set reports an error");
        assert!(err.message.contains("closed"), "{}", err.message);
        cursor.close().expect("close is idempotent");
    }

    #[test]
    fn test_closed_connection_rejects_calls() {
        let pool = pool();
        let mut conn = pool.checkout().expect("checkout");
        let mut cursor = conn.query("SELECT 1", &[]).expect("query");
        conn.close().expect("close");
        conn.close().expect("second close is a no-op");
        let err = conn.execute("SELECT 1", &[]).expect_err("closed");
        assert!(err.message.contains("connection is closed"));
        let err = cursor.advance().expect_err("worker gone");
        assert!(err.message.contains("worker stopped"));
        // The pooled connection went back to the pool.
        let mut again = pool.checkout().expect("checkout");
        assert_eq!(again.execute("CREATE TABLE reused (id INTEGER)", &[]).expect("create"), 0);
    }

    #[test]
    fn test_poisoned_root_lock_still_clones() {
        let manager = DuckDbManager {
            root: Mutex::new(Connection::open_in_memory().expect("open")),
        };
        thread::scope(|scope| {
            let poisoner = scope.spawn(|| {
                let _guard = manager.root.lock().expect("lock");
                panic!("poison the root lock");
            });
            assert!(poisoner.join().is_err());
        });
        assert!(manager.root.is_poisoned());
        let conn = manager.connect().expect("clone from poisoned lock");
        let one: i64 = conn
            .query_row("SELECT 1", [], |row| row.get(0))
            .expect("query");
        assert_eq!(one, 1);
    }

    #[test]
    fn test_script_runs_statements_on_demand() {
        let pool = pool();
        let mut conn = pool.checkout().expect("checkout");
        let mut results = conn
            .execute_script(
                "CREATE TABLE lazy (v INTEGER); INSERT INTO lazy VALUES (1); SELECT * FROM no_such_table",
                3,
            )
            .expect("script");
        assert_eq!(results.update_count(), 0);

        let count = |conn: &mut DuckDbConnection| {
            let mut cursor = conn.query("SELECT count(*) FROM lazy", &[]).expect("count");
            assert!(cursor.advance().expect("advance"));
            cursor.value(0).expect("count")
        };
        assert_eq!(count(&mut conn), SqlValue::BigInt(0));
        assert!(!results.more_results().expect("insert"));
        assert_eq!(results.update_count(), 1);
        assert_eq!(count(&mut conn), SqlValue::BigInt(1));

        let err = results.more_results().expect_err("missing table");
        assert!(err.message.contains("no_such_table"));
        assert!(!results.more_results().expect("script ended"));
        assert_eq!(results.update_count(), -1);
    }

    #[test]
    fn test_manual_commit_cycle() {
        let pool = pool();
        let mut conn = pool.checkout().expect("checkout");
        conn.execute("CREATE TABLE m (id INTEGER)", &[]).expect("create");
        conn.set_auto_commit(false).expect("manual");
        conn.execute_batch(
            "INSERT INTO m VALUES (?)",
            &[vec![SqlValue::BigInt(1)], vec![SqlValue::BigInt(2)]],
        )
        .expect("batch");
        conn.commit().expect("commit");
        conn.set_auto_commit(true).expect("auto");
        let mut cursor = conn.query("SELECT count(*) FROM m", &[]).expect("count");
        assert!(cursor.advance().expect("advance"));
        assert_eq!(cursor.value(0).expect("count"), SqlValue::BigInt(2));
    }
}
