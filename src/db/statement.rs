//! Prepared statements.
//!
//! A [`Statement`] owns its SQL text and positional parameters, and refers to
//! the connection's native handle through a `Weak` pointer. Statements never
//! keep a connection alive: once the connection is dropped or disconnected,
//! executing fails with a connection error.

use crate::db::native::NativeHandle;
use crate::db::result::{ResultPrototype, ResultSet, ensure_not_streaming};
use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::debug;

/// A statement already prepared on a native handle.
pub struct NativeStatement<H> {
    sql: String,
    parameter_count: usize,
    handle: Weak<Mutex<H>>,
    streaming: Arc<AtomicUsize>,
}

impl<H> NativeStatement<H> {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }
}

impl<H> Clone for NativeStatement<H> {
    fn clone(&self) -> Self {
        Self {
            sql: self.sql.clone(),
            parameter_count: self.parameter_count,
            handle: Weak::clone(&self.handle),
            streaming: Arc::clone(&self.streaming),
        }
    }
}

impl<H> std::fmt::Debug for NativeStatement<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeStatement")
            .field("sql", &self.sql)
            .field("parameter_count", &self.parameter_count)
            .finish()
    }
}

/// What a new statement is built from.
pub enum StatementInput<H> {
    /// SQL text; the statement is bound to the connection's handle.
    Sql(String),
    /// An already prepared native statement; no connection is needed.
    Native(NativeStatement<H>),
    /// No SQL yet; set it later with [`Statement::set_sql`].
    Empty,
}

impl<H> From<&str> for StatementInput<H> {
    fn from(sql: &str) -> Self {
        Self::Sql(sql.to_string())
    }
}

impl<H> From<String> for StatementInput<H> {
    fn from(sql: String) -> Self {
        Self::Sql(sql)
    }
}

impl<H> From<NativeStatement<H>> for StatementInput<H> {
    fn from(native: NativeStatement<H>) -> Self {
        Self::Native(native)
    }
}

/// Template for statements; carries the buffering default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementPrototype {
    buffer_results: bool,
}

impl StatementPrototype {
    pub fn new(buffer_results: bool) -> Self {
        Self { buffer_results }
    }

    pub fn buffer_results(&self) -> bool {
        self.buffer_results
    }

    pub(crate) fn instantiate<H>(
        &self,
        sql: String,
        handle: Weak<Mutex<H>>,
        streaming: Arc<AtomicUsize>,
        results: ResultPrototype,
    ) -> Statement<H> {
        Statement {
            sql,
            parameters: Vec::new(),
            parameter_count: None,
            buffer_results: self.buffer_results,
            handle,
            streaming,
            results,
        }
    }

    pub(crate) fn from_native<H>(
        &self,
        native: NativeStatement<H>,
        results: ResultPrototype,
    ) -> Statement<H> {
        let mut statement = self.instantiate(native.sql, native.handle, native.streaming, results);
        statement.parameter_count = Some(native.parameter_count);
        statement
    }
}

/// A SQL statement with positional parameters.
pub struct Statement<H> {
    sql: String,
    parameters: Vec<QueryParam>,
    /// Set once prepared
    parameter_count: Option<usize>,
    buffer_results: bool,
    handle: Weak<Mutex<H>>,
    streaming: Arc<AtomicUsize>,
    results: ResultPrototype,
}

impl<H> std::fmt::Debug for Statement<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("parameters", &self.parameters)
            .field("prepared", &self.parameter_count.is_some())
            .field("buffer_results", &self.buffer_results)
            .finish()
    }
}

impl<H: NativeHandle> Statement<H> {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Replace the SQL text. A prepared statement must be prepared again.
    pub fn set_sql(&mut self, sql: impl Into<String>) -> &mut Self {
        self.sql = sql.into();
        self.parameter_count = None;
        self
    }

    pub fn parameters(&self) -> &[QueryParam] {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: Vec<QueryParam>) -> &mut Self {
        self.parameters = parameters;
        self
    }

    /// Append the next positional parameter.
    pub fn bind(&mut self, value: impl Into<QueryParam>) -> &mut Self {
        self.parameters.push(value.into());
        self
    }

    pub fn is_prepared(&self) -> bool {
        self.parameter_count.is_some()
    }

    pub fn buffer_results(&self) -> bool {
        self.buffer_results
    }

    pub fn set_buffer_results(&mut self, buffer_results: bool) -> &mut Self {
        self.buffer_results = buffer_results;
        self
    }

    /// Non-owning reference to the native handle.
    pub fn resource(&self) -> Weak<Mutex<H>> {
        Weak::clone(&self.handle)
    }

    /// The prepared native statement, for building sibling statements.
    pub fn native(&self) -> Option<NativeStatement<H>> {
        self.parameter_count.map(|parameter_count| NativeStatement {
            sql: self.sql.clone(),
            parameter_count,
            handle: Weak::clone(&self.handle),
            streaming: Arc::clone(&self.streaming),
        })
    }

    fn live_handle(&self) -> DbResult<Arc<Mutex<H>>> {
        self.handle.upgrade().ok_or_else(|| {
            DbError::connection(
                "The connection backing this statement is closed",
                "Reconnect and create the statement again",
            )
        })
    }

    /// Prepare the SQL on the server.
    pub async fn prepare(&mut self) -> DbResult<()> {
        if self.is_prepared() {
            return Err(DbError::invalid_input("This statement has already been prepared"));
        }
        if self.sql.trim().is_empty() {
            return Err(DbError::invalid_input("No SQL has been set for this statement"));
        }
        ensure_not_streaming(&self.streaming)?;

        let handle = self.live_handle()?;
        let count = handle.lock().await.prepare(&self.sql).await?;
        debug!(sql = %self.sql, parameters = count, "Statement prepared");
        self.parameter_count = Some(count);
        Ok(())
    }

    /// Execute with the current parameters, preparing first if needed.
    pub async fn execute(&mut self) -> DbResult<ResultSet> {
        if !self.is_prepared() {
            self.prepare().await?;
        }
        if let Some(expected) = self.parameter_count {
            if expected != self.parameters.len() {
                return Err(DbError::invalid_input(format!(
                    "Statement expects {} parameters, {} given",
                    expected,
                    self.parameters.len()
                )));
            }
        }
        ensure_not_streaming(&self.streaming)?;

        let handle = self.live_handle()?;
        let outcome = handle.lock().await.query(&self.sql, &self.parameters).await?;
        Ok(self
            .results
            .instantiate(outcome, Some(self.buffer_results), &self.streaming))
    }

    /// Replace the parameters and execute.
    pub async fn execute_with(&mut self, parameters: Vec<QueryParam>) -> DbResult<ResultSet> {
        self.parameters = parameters;
        self.execute().await
    }
}
