//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Platform identification and dialect SQL
//! - The native driver seam and its sqlx implementation
//! - Connection lifecycle, drivers, statements and results
//! - Type mappings and parameter binding

pub mod backend;
pub mod connection;
pub mod driver;
pub mod native;
pub mod params;
pub mod platform;
pub mod result;
pub mod statement;
pub mod types;

pub use backend::{SqlxConnector, SqlxHandle};
pub use connection::{Connection, GeneratedValue};
pub use driver::{Driver, DriverKind, PrepareType};
pub use native::{
    ConnectRequest, Connector, NativeError, NativeErrorKind, NativeHandle, NativeOutcome,
};
pub use platform::{NameFormat, Platform};
pub use result::{ResultPrototype, ResultSet};
pub use statement::{NativeStatement, Statement, StatementInput, StatementPrototype};
