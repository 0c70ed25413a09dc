//! Many cursor rows as one lazily produced JSON array.

use std::io::{self, Read};

use tracing::trace;

use super::row::{RowStream, RowStreamer};
use crate::driver::Cursor;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    BeforeFirst,
    EmittingRow,
    RowBoundary,
    Closed,
}

/// Structural JSON array writer: the punctuation for array start, element
/// boundaries and array end, tracked by state so elements stay well separated.
#[derive(Debug)]
pub struct JsonArrayWriter {
    state: ArrayState,
    elements: usize,
}

impl Default for JsonArrayWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonArrayWriter {
    pub fn new() -> Self {
        Self {
            state: ArrayState::BeforeFirst,
            elements: 0,
        }
    }

    /// Bytes to emit before an element.
    pub fn begin_element(&mut self) -> &'static [u8] {
        let prefix: &'static [u8] = match self.state {
            ArrayState::BeforeFirst => b"[",
            ArrayState::RowBoundary => b",",
            ArrayState::EmittingRow | ArrayState::Closed => b"",
        };
        self.state = ArrayState::EmittingRow;
        prefix
    }

    pub fn end_element(&mut self) {
        if self.state == ArrayState::EmittingRow {
            self.state = ArrayState::RowBoundary;
            self.elements += 1;
        }
    }

    /// Bytes that close the array; empty once closed.
    pub fn finish(&mut self) -> &'static [u8] {
        let suffix: &'static [u8] = match self.state {
            ArrayState::BeforeFirst => b"[]",
            ArrayState::RowBoundary | ArrayState::EmittingRow => b"]",
            ArrayState::Closed => b"",
        };
        self.state = ArrayState::Closed;
        suffix
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn is_closed(&self) -> bool {
        self.state == ArrayState::Closed
    }
}

/// Where the cursor stands when a batch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// The first row still has to be fetched.
    BeforeRow,
    /// The cursor is already on the first row of the batch.
    OnRow,
}

/// Single-pass reader over at most `batch_size` rows as a JSON array.
///
/// A batch size of 0 reads until the cursor is exhausted. The cursor is left
/// open; closing it is up to its owner.
pub struct BatchArrayStreamer<C: Cursor> {
    cursor: C,
    rows: RowStreamer,
    writer: JsonArrayWriter,
    batch_size: usize,
    start: StartPosition,
    current: Option<RowStream>,
    pending: &'static [u8],
    exhausted: bool,
}

impl<C: Cursor> BatchArrayStreamer<C> {
    pub fn new(cursor: C, rows: RowStreamer, batch_size: usize, start: StartPosition) -> Self {
        Self {
            cursor,
            rows,
            writer: JsonArrayWriter::new(),
            batch_size,
            start,
            current: None,
            pending: b"",
            exhausted: false,
        }
    }

    /// Whether the cursor ran out of rows while producing this batch.
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn rows_emitted(&self) -> usize {
        self.writer.elements()
    }

    fn advance(&mut self) -> io::Result<bool> {
        let has_row = self
            .cursor
            .advance()
            .map_err(|err| {
                io::Error::from(CoreError::Execution {
                    message: err.message,
                    sql: String::new(),
                    context: format!("fetching row {}", self.writer.elements() + 1),
                })
            })?;
        if !has_row {
            self.exhausted = true;
        }
        Ok(has_row)
    }

    fn start_row(&mut self) -> io::Result<()> {
        self.pending = self.writer.begin_element();
        self.current = Some(self.rows.encode_row(&self.cursor)?);
        Ok(())
    }

    /// Decide what follows the array start or a finished row.
    fn step(&mut self) -> io::Result<()> {
        let has_next = match self.writer.state {
            ArrayState::BeforeFirst => match self.start {
                StartPosition::OnRow => true,
                StartPosition::BeforeRow => self.advance()?,
            },
            ArrayState::RowBoundary => {
                if self.batch_size > 0 && self.writer.elements() >= self.batch_size {
                    false
                } else {
                    self.advance()?
                }
            }
            ArrayState::EmittingRow | ArrayState::Closed => false,
        };
        if has_next {
            self.start_row()
        } else {
            self.pending = self.writer.finish();
            trace!(rows = self.writer.elements(), "closed JSON array");
            Ok(())
        }
    }
}

impl<C: Cursor> Read for BatchArrayStreamer<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending = &self.pending[n..];
                return Ok(n);
            }
            if let Some(row) = self.current.as_mut() {
                let n = row.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                self.current = None;
                self.writer.end_element();
            }
            if self.writer.is_closed() {
                return Ok(0);
            }
            if let Err(err) = self.step() {
                self.writer.finish();
                self.pending = b"";
                return Err(err);
            }
        }
    }
}
