//! Statement results.
//!
//! A [`ResultSet`] wraps either a row set or a write acknowledgment. Row sets
//! are buffered (all rows materialized, rewindable) or unbuffered (forward only).
//! While an unbuffered row set is alive and not fully consumed it holds a
//! stream guard on its connection, and the connection refuses other queries.

use crate::db::native::NativeOutcome;
use crate::error::{DbError, DbResult};
use crate::models::Row;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Marks a connection as busy streaming an unbuffered result.
///
/// Guards are counted, so the connection stays busy until every unbuffered
/// result on it is released.
#[derive(Debug)]
pub(crate) struct StreamGuard(Arc<AtomicUsize>);

impl StreamGuard {
    fn acquire(streams: &Arc<AtomicUsize>) -> Self {
        streams.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(streams))
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fail if an unbuffered result still owns the connection.
pub(crate) fn ensure_not_streaming(streams: &AtomicUsize) -> DbResult<()> {
    if streams.load(Ordering::Acquire) > 0 {
        return Err(DbError::query(
            "Commands out of sync; you can't run this command now",
            None,
            "Consume or buffer the previous unbuffered result first",
        ));
    }
    Ok(())
}

/// Template for results; carries the buffering default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultPrototype {
    buffer_results: bool,
}

impl ResultPrototype {
    pub fn new(buffer_results: bool) -> Self {
        Self { buffer_results }
    }

    pub fn buffer_results(&self) -> bool {
        self.buffer_results
    }

    /// Build a result from a native outcome. `buffered` overrides the default.
    pub(crate) fn instantiate(
        &self,
        outcome: NativeOutcome,
        buffered: Option<bool>,
        streaming: &Arc<AtomicUsize>,
    ) -> ResultSet {
        ResultSet::new(outcome, buffered.unwrap_or(self.buffer_results), streaming)
    }
}

/// Result of executing a statement.
#[derive(Debug)]
pub struct ResultSet {
    is_query: bool,
    columns: Vec<String>,
    rows: VecDeque<Row>,
    position: usize,
    buffered: bool,
    rows_affected: u64,
    generated_value: Option<String>,
    stream: Option<StreamGuard>,
}

impl ResultSet {
    fn new(outcome: NativeOutcome, buffered: bool, streaming: &Arc<AtomicUsize>) -> Self {
        match outcome {
            NativeOutcome::Rows { columns, rows } => {
                let stream = (!buffered && !rows.is_empty()).then(|| StreamGuard::acquire(streaming));
                Self {
                    is_query: true,
                    columns,
                    rows: rows.into(),
                    position: 0,
                    buffered,
                    rows_affected: 0,
                    generated_value: None,
                    stream,
                }
            }
            NativeOutcome::Affected {
                rows_affected,
                last_insert_id,
            } => Self {
                is_query: false,
                columns: Vec::new(),
                rows: VecDeque::new(),
                position: 0,
                buffered,
                rows_affected,
                generated_value: last_insert_id,
                stream: None,
            },
        }
    }

    /// Whether this result carries rows rather than a write acknowledgment.
    pub fn is_query_result(&self) -> bool {
        self.is_query
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Materialize the remaining rows and release the connection.
    pub fn buffer(&mut self) -> DbResult<()> {
        if self.buffered {
            return Ok(());
        }
        if self.position > 0 {
            return Err(DbError::invalid_input(
                "You cannot buffer a result set that has started iteration",
            ));
        }
        self.buffered = true;
        self.stream = None;
        Ok(())
    }

    /// Rows changed by a write statement. Query results report 0.
    pub fn affected_rows(&self) -> u64 {
        self.rows_affected
    }

    /// Id generated by the statement, if any.
    pub fn generated_value(&self) -> Option<&str> {
        self.generated_value.as_deref()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows; unknown for unbuffered row sets.
    pub fn count(&self) -> Option<usize> {
        match (self.is_query, self.buffered) {
            (true, true) => Some(self.rows.len()),
            (true, false) => None,
            (false, _) => Some(0),
        }
    }

    /// Zero-based index of the next row.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Return to the first row.
    pub fn rewind(&mut self) -> DbResult<()> {
        if !self.buffered && self.position > 0 {
            return Err(DbError::invalid_input(
                "This result is a forward only result set, calling rewind() after moving forward is not supported",
            ));
        }
        self.position = 0;
        Ok(())
    }

    /// All rows not yet consumed.
    pub fn fetch_all(&mut self) -> Vec<Row> {
        if self.buffered {
            let rest: Vec<Row> = self.rows.iter().skip(self.position).cloned().collect();
            self.position = self.rows.len();
            return rest;
        }
        let rest: Vec<Row> = self.rows.drain(..).collect();
        self.position += rest.len();
        self.stream = None;
        rest
    }
}

impl Iterator for ResultSet {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        if self.buffered {
            let row = self.rows.get(self.position).cloned();
            if row.is_some() {
                self.position += 1;
            }
            return row;
        }

        let row = self.rows.pop_front();
        if row.is_some() {
            self.position += 1;
        }
        if self.rows.is_empty() {
            self.stream = None;
        }
        row
    }
}
