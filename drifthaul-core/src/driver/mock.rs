//! Scripted in-memory driver for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::dialect::Dialect;
use crate::driver::{Cursor, MultiResult, WarehouseConnection};
use crate::error::DriverError;
use crate::types::{ColumnMeta, CursorColumn, SqlValue};

#[derive(Debug, Clone, Default)]
pub(crate) struct MockRows {
    pub columns: Vec<CursorColumn>,
    pub rows: Vec<Vec<SqlValue>>,
    pub close_error: Option<String>,
}

impl MockRows {
    pub fn new(columns: Vec<CursorColumn>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            columns,
            rows,
            close_error: None,
        }
    }

    /// Cursors over these rows fail to close with `message`.
    pub fn with_close_error(mut self, message: &str) -> Self {
        self.close_error = Some(message.to_string());
        self
    }

    pub fn cursor(&self) -> MockCursor {
        MockCursor {
            columns: self.columns.clone(),
            rows: self.rows.clone().into(),
            current: None,
            closed: false,
            close_error: self.close_error.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum MockOutcome {
    Rows(MockRows),
    Count(u64),
    Error(String),
}

/// Replays scripted outcomes; an error outcome ends the script.
pub(crate) struct MockMultiResult {
    outcomes: VecDeque<MockOutcome>,
    current: Option<MockOutcome>,
}

impl MockMultiResult {
    fn new(outcomes: Vec<MockOutcome>) -> Result<Self, DriverError> {
        let mut result = Self {
            outcomes: outcomes.into(),
            current: None,
        };
        result.more_results()?;
        Ok(result)
    }
}

impl MultiResult for MockMultiResult {
    fn take_result_set(&mut self) -> Option<Box<dyn Cursor>> {
        match self.current.take() {
            Some(MockOutcome::Rows(rows)) => Some(Box::new(rows.cursor())),
            other => {
                self.current = other;
                None
            }
        }
    }

    fn update_count(&self) -> i64 {
        match &self.current {
            Some(MockOutcome::Count(n)) => *n as i64,
            _ => -1,
        }
    }

    fn more_results(&mut self) -> Result<bool, DriverError> {
        match self.outcomes.pop_front() {
            Some(MockOutcome::Error(message)) => {
                self.outcomes.clear();
                self.current = None;
                Err(DriverError::new(message))
            }
            next => {
                let is_rows = matches!(next, Some(MockOutcome::Rows(_)));
                self.current = next;
                Ok(is_rows)
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Every statement executed, with its parameters, in order.
    pub executed: Vec<(String, Vec<SqlValue>)>,
    pub scripts: Vec<(String, usize)>,
    pub commits: usize,
    pub closed: bool,
    pub auto_commit: bool,
    pub column_lookups: usize,
    pub tables: HashMap<String, Vec<ColumnMeta>>,
    pub query_results: VecDeque<MockRows>,
    pub results_by_sql: HashMap<String, MockRows>,
    pub script_results: VecDeque<Vec<MockOutcome>>,
    /// (substring, message): statements containing the substring fail.
    pub failures: Vec<(String, String)>,
    pub fail_commit: Option<String>,
    pub fail_close: Option<String>,
}

#[derive(Clone)]
pub(crate) struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
    dialect: Dialect,
}

impl MockConnection {
    pub fn new(dialect: Dialect) -> Self {
        let state = MockState {
            auto_commit: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            dialect,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    pub fn with_table(self, table: &str, columns: Vec<ColumnMeta>) -> Self {
        self.state().tables.insert(table.to_string(), columns);
        self
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state().executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    fn check_failure(&self, sql: &str) -> Result<(), DriverError> {
        let state = self.state();
        for (needle, message) in &state.failures {
            if sql.contains(needle.as_str()) {
                return Err(DriverError::new(message.clone()));
            }
        }
        Ok(())
    }
}

impl WarehouseConnection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn url(&self) -> &str {
        "mock://warehouse"
    }

    fn current_database(&self) -> Option<String> {
        Some("DB".to_string())
    }

    fn current_schema(&self) -> Option<String> {
        Some("PUBLIC".to_string())
    }

    fn auto_commit(&self) -> bool {
        self.state().auto_commit
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), DriverError> {
        self.state().auto_commit = auto_commit;
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DriverError> {
        self.state().executed.push((sql.to_string(), params.to_vec()));
        self.check_failure(sql)?;
        Ok(1)
    }

    fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<SqlValue>],
    ) -> Result<Vec<u64>, DriverError> {
        {
            let mut state = self.state();
            for params in param_sets {
                state.executed.push((sql.to_string(), params.clone()));
            }
        }
        self.check_failure(sql)?;
        Ok(vec![1; param_sets.len()])
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Box<dyn Cursor>, DriverError> {
        self.state().executed.push((sql.to_string(), params.to_vec()));
        self.check_failure(sql)?;
        let mut state = self.state();
        let rows = match state.results_by_sql.get(sql) {
            Some(rows) => rows.clone(),
            None => state.query_results.pop_front().unwrap_or_default(),
        };
        Ok(Box::new(rows.cursor()))
    }

    fn execute_script(
        &mut self,
        script: &str,
        statement_count: usize,
    ) -> Result<Box<dyn MultiResult>, DriverError> {
        self.state()
            .scripts
            .push((script.to_string(), statement_count));
        self.check_failure(script)?;
        let outcomes = self
            .state()
            .script_results
            .pop_front()
            .unwrap_or_else(|| vec![MockOutcome::Count(0); statement_count]);
        Ok(Box::new(MockMultiResult::new(outcomes)?))
    }

    fn columns(
        &mut self,
        _catalog: Option<&str>,
        _schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ColumnMeta>, DriverError> {
        let mut state = self.state();
        state.column_lookups += 1;
        state
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("table {table} does not exist")))
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        let mut state = self.state();
        if let Some(message) = state.fail_commit.clone() {
            return Err(DriverError::new(message));
        }
        state.commits += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let mut state = self.state();
        state.closed = true;
        match state.fail_close.clone() {
            Some(message) => Err(DriverError::new(message)),
            None => Ok(()),
        }
    }
}

pub(crate) struct MockCursor {
    columns: Vec<CursorColumn>,
    rows: VecDeque<Vec<SqlValue>>,
    current: Option<Vec<SqlValue>>,
    pub closed: bool,
    close_error: Option<String>,
}

impl Cursor for MockCursor {
    fn columns(&self) -> &[CursorColumn] {
        &self.columns
    }

    fn advance(&mut self) -> Result<bool, DriverError> {
        if self.closed {
            return Err(DriverError::new("cursor is closed"));
        }
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    fn value(&self, index: usize) -> Result<SqlValue, DriverError> {
        self.current
            .as_ref()
            .and_then(|row| row.get(index).cloned())
            .ok_or_else(|| DriverError::new(format!("no value at column {index}")))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        match &self.close_error {
            Some(message) => Err(DriverError::new(message.clone())),
            None => Ok(()),
        }
    }
}
