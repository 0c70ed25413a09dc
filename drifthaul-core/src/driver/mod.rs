//! Driver seam.
//!
//! The engine talks to a warehouse only through these traits. A connection is
//! owned by exactly one wrapper and is never shared; every call blocks the
//! calling thread.

pub mod duckdb;
#[cfg(test)]
pub(crate) mod mock;

use crate::dialect::Dialect;
use crate::error::DriverError;
use crate::types::{ColumnMeta, CursorColumn, SqlValue};

pub use self::duckdb::{DuckDbConnection, DuckDbSupplier, EnginePool};

/// Forward-only cursor over a result set.
pub trait Cursor: Send {
    fn columns(&self) -> &[CursorColumn];

    /// Move to the next row. Returns `false` once the cursor is exhausted.
    fn advance(&mut self) -> Result<bool, DriverError>;

    /// Value of column `index` in the current row.
    fn value(&self, index: usize) -> Result<SqlValue, DriverError>;

    fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

impl<C: Cursor + ?Sized> Cursor for Box<C> {
    fn columns(&self) -> &[CursorColumn] {
        (**self).columns()
    }

    fn advance(&mut self) -> Result<bool, DriverError> {
        (**self).advance()
    }

    fn value(&self, index: usize) -> Result<SqlValue, DriverError> {
        (**self).value(index)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        (**self).close()
    }
}

impl<C: Cursor + ?Sized> Cursor for &mut C {
    fn columns(&self) -> &[CursorColumn] {
        (**self).columns()
    }

    fn advance(&mut self) -> Result<bool, DriverError> {
        (**self).advance()
    }

    fn value(&self, index: usize) -> Result<SqlValue, DriverError> {
        (**self).value(index)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        (**self).close()
    }
}

/// Results of a multi-statement script, one statement at a time.
///
/// Positioned on the first statement's result after execution.
pub trait MultiResult: Send {
    /// Result set of the current statement, if it produced one. Taking it
    /// leaves the current position without a result set.
    fn take_result_set(&mut self) -> Option<Box<dyn Cursor>>;

    /// Update count of the current statement; -1 when the current result is a
    /// result set or there are no more results.
    fn update_count(&self) -> i64;

    /// Move to the next statement's result. Returns `true` if it is a result set.
    fn more_results(&mut self) -> Result<bool, DriverError>;
}

pub trait WarehouseConnection: Send {
    fn dialect(&self) -> Dialect;

    fn url(&self) -> &str;

    fn current_database(&self) -> Option<String>;

    fn current_schema(&self) -> Option<String>;

    fn auto_commit(&self) -> bool;

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), DriverError>;

    /// Execute one statement and return its update count.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DriverError>;

    /// Execute one statement once per parameter set.
    fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<SqlValue>],
    ) -> Result<Vec<u64>, DriverError>;

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Box<dyn Cursor>, DriverError>;

    /// Submit `script` as one call. `statement_count` disambiguates statement
    /// separators from similar characters inside literals.
    fn execute_script(
        &mut self,
        script: &str,
        statement_count: usize,
    ) -> Result<Box<dyn MultiResult>, DriverError>;

    /// Column metadata of a table, in ordinal order.
    fn columns(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ColumnMeta>, DriverError>;

    fn commit(&mut self) -> Result<(), DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;
}
