//! Drivers bind a connection to statement and result factories.
//!
//! A [`Driver`] holds one [`Connection`] plus a statement prototype and a result
//! prototype. The prototypes are plain templates: every statement or result the
//! driver hands out is a fresh instance built from them, and the prototypes
//! themselves never execute anything.

use crate::config::{ConnectionParameters, DriverOptions};
use crate::db::Platform;
use crate::db::backend::SqlxConnector;
use crate::db::connection::{Connection, GeneratedValue};
use crate::db::native::{Connector, NativeOutcome};
use crate::db::platform::NameFormat;
use crate::db::result::{ResultPrototype, ResultSet, ensure_not_streaming};
use crate::db::statement::{Statement, StatementInput, StatementPrototype};
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Native driver family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// PDO-style: any supported platform, selected by the dsn.
    Pdo,
    /// mysqli-style: MySQL only.
    Mysqli,
}

/// How statement parameters are addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareType {
    Positional,
    Named,
}

/// Registered templates for new statements and results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Prototypes {
    pub(crate) statement: StatementPrototype,
    pub(crate) result: ResultPrototype,
}

/// A connection wired to statement and result factories.
pub struct Driver<C: Connector> {
    kind: DriverKind,
    options: DriverOptions,
    connection: Connection<C>,
    prototypes: Prototypes,
}

impl<C: Connector> std::fmt::Debug for Driver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .field("connection", &self.connection)
            .finish()
    }
}

impl Driver<SqlxConnector> {
    /// PDO-style driver over sqlx.
    pub fn pdo(parameters: ConnectionParameters, options: DriverOptions) -> DbResult<Self> {
        Self::new(
            DriverKind::Pdo,
            Connection::new(SqlxConnector, parameters),
            options,
        )
    }

    /// mysqli-style driver over sqlx.
    pub fn mysqli(parameters: ConnectionParameters, options: DriverOptions) -> DbResult<Self> {
        Self::new(
            DriverKind::Mysqli,
            Connection::new(SqlxConnector, parameters),
            options,
        )
    }
}

impl<C: Connector> Driver<C> {
    /// Wire `connection` to fresh prototypes built from `options`.
    pub fn new(kind: DriverKind, connection: Connection<C>, options: DriverOptions) -> DbResult<Self> {
        let prototypes = Prototypes {
            statement: StatementPrototype::new(options.buffer_results),
            result: ResultPrototype::new(options.buffer_results),
        };
        Self::with_prototypes(kind, connection, options, prototypes.statement, prototypes.result)
    }

    /// Wire `connection` to the given prototypes.
    pub fn with_prototypes(
        kind: DriverKind,
        mut connection: Connection<C>,
        options: DriverOptions,
        statement: StatementPrototype,
        result: ResultPrototype,
    ) -> DbResult<Self> {
        let prototypes = Prototypes { statement, result };
        connection.register_prototypes(prototypes);
        let driver = Self {
            kind,
            options,
            connection,
            prototypes,
        };
        driver.check_environment()?;
        debug!(kind = ?kind, driver = ?driver.connection.driver_name(), "Driver registered");
        Ok(driver)
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    pub fn options(&self) -> DriverOptions {
        self.options
    }

    pub fn connection(&self) -> &Connection<C> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection<C> {
        &mut self.connection
    }

    pub fn into_connection(self) -> Connection<C> {
        self.connection
    }

    pub fn statement_prototype(&self) -> StatementPrototype {
        self.prototypes.statement
    }

    pub fn result_prototype(&self) -> ResultPrototype {
        self.prototypes.result
    }

    /// Verify the connection's platform can be served by this driver.
    pub fn check_environment(&self) -> DbResult<()> {
        match (self.kind, self.connection.platform()) {
            (DriverKind::Mysqli, Some(Platform::MySql)) | (DriverKind::Pdo, Some(_)) => Ok(()),
            (DriverKind::Mysqli, Some(platform)) => Err(DbError::configuration(format!(
                "The mysqli driver only supports MySQL-compatible servers, got {}",
                platform
            ))),
            (_, None) => match self.connection.driver_name() {
                Some(name) => Err(DbError::configuration(format!(
                    "Unsupported driver '{}'",
                    name
                ))),
                None => Ok(()),
            },
        }
    }

    /// A new, independent statement.
    ///
    /// A native prepared statement is adopted as is. Otherwise the statement is
    /// bound to the connection's handle, connecting first if needed.
    pub async fn create_statement(
        &mut self,
        input: impl Into<StatementInput<C::Handle>>,
    ) -> DbResult<Statement<C::Handle>> {
        let sql = match input.into() {
            StatementInput::Native(native) => {
                return Ok(self.prototypes.statement.from_native(native, self.prototypes.result));
            }
            StatementInput::Sql(sql) => sql,
            StatementInput::Empty => String::new(),
        };

        let handle = self.connection.connected_handle().await?;
        Ok(self.prototypes.statement.instantiate(
            sql,
            Arc::downgrade(&handle),
            Arc::clone(self.connection.streaming_flag()),
            self.prototypes.result,
        ))
    }

    /// A new result for a native outcome; `buffered` overrides the driver default.
    ///
    /// Fails while an unbuffered result of this connection is still being
    /// consumed. The generated value is the one carried by `outcome`.
    pub fn create_result(&self, outcome: NativeOutcome, buffered: Option<bool>) -> DbResult<ResultSet> {
        let streaming = self.connection.streaming_flag();
        ensure_not_streaming(streaming)?;
        Ok(self.prototypes.result.instantiate(outcome, buffered, streaming))
    }

    /// Canonical name of the backend.
    pub fn get_database_platform_name(&self, format: NameFormat) -> DbResult<&'static str> {
        self.connection
            .platform()
            .map(|p| p.display_name(format))
            .ok_or_else(|| DbError::configuration("The database platform is not known yet"))
    }

    pub fn prepare_type(&self) -> PrepareType {
        PrepareType::Positional
    }

    /// Placeholder for the parameter at `position` (1-based).
    pub fn format_parameter_name(&self, position: usize) -> String {
        self.connection
            .platform()
            .map(|p| p.placeholder(position))
            .unwrap_or_else(|| "?".to_string())
    }

    pub async fn last_generated_value(&mut self, name: Option<&str>) -> DbResult<GeneratedValue> {
        self.connection.get_last_generated_value(name).await
    }
}
