//! Multi-statement scripts submitted as one driver call.

use std::io::{self, Read};

use tracing::{debug, instrument, warn};

use crate::driver::{Cursor, MultiResult, WarehouseConnection};
use crate::error::{CoreError, Result};
use crate::redact::redact_sql;
use crate::stream::{BatchArrayStreamer, RowStreamer, StartPosition};

/// Result of one statement of a script.
pub enum StatementResult {
    /// Rows of a query, as one JSON array.
    Rows(BatchArrayStreamer<Box<dyn Cursor>>),
    /// Rows affected by DML, surfaced as `{"UpdateCount":N}`.
    UpdateCount(u64),
}

impl StatementResult {
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        match self {
            StatementResult::Rows(rows) => Box::new(rows),
            StatementResult::UpdateCount(count) => Box::new(io::Cursor::new(
                format!("{{\"UpdateCount\":{count}}}").into_bytes(),
            )),
        }
    }

    /// Read the whole result into a string.
    pub fn into_json(self) -> Result<String> {
        let mut out = String::new();
        self.into_reader().read_to_string(&mut out)?;
        Ok(out)
    }
}

/// One result with its 1-based statement ordinal.
pub struct ScriptOutcome {
    pub ordinal: usize,
    pub result: StatementResult,
}

/// Iterates per-statement results in textual order.
///
/// A driver error ends iteration; results already handed out stay valid.
pub struct MultiStatementExecutor {
    results: Box<dyn MultiResult>,
    rows: RowStreamer,
    ordinal: usize,
    started: bool,
    done: bool,
}

impl MultiStatementExecutor {
    #[instrument(skip(conn, script, rows), fields(script = %redact_sql(script)))]
    pub fn execute(
        conn: &mut dyn WarehouseConnection,
        script: &str,
        statement_count: usize,
        rows: RowStreamer,
    ) -> Result<Self> {
        let count_parameter = conn.dialect().multi_statement_parameter();
        let results = conn
            .execute_script(script, statement_count)
            .map_err(|err| CoreError::execution(err, script, "script statement 1"))?;
        debug!(statement_count, count_parameter, "submitted script");
        Ok(Self {
            results,
            rows,
            ordinal: 0,
            started: false,
            done: false,
        })
    }

    fn fail(&mut self, message: String) -> CoreError {
        self.done = true;
        CoreError::Execution {
            message,
            sql: String::new(),
            context: format!("script statement {}", self.ordinal + 1),
        }
    }
}

impl Iterator for MultiStatementExecutor {
    type Item = Result<ScriptOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.started {
            if let Err(err) = self.results.more_results() {
                warn!(ordinal = self.ordinal + 1, error = %err, "script aborted");
                return Some(Err(self.fail(err.message)));
            }
        }
        self.started = true;

        let result = match self.results.take_result_set() {
            Some(cursor) => StatementResult::Rows(BatchArrayStreamer::new(
                cursor,
                self.rows.clone(),
                0,
                StartPosition::BeforeRow,
            )),
            None => {
                let count = self.results.update_count();
                if count < 0 {
                    self.done = true;
                    return None;
                }
                StatementResult::UpdateCount(count as u64)
            }
        };
        self.ordinal += 1;
        Some(Ok(ScriptOutcome {
            ordinal: self.ordinal,
            result,
        }))
    }
}
