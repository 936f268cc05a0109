//! DB Adapter Library
//!
//! A backend-agnostic database access layer for SQLite, PostgreSQL and MySQL.
//! It provides lazily connecting [`Connection`]s, PDO-style and mysqli-style
//! [`Driver`]s that hand out independent statements and results, and a
//! [`Metadata`] component that caches table column descriptions.

pub mod config;
pub mod db;
pub mod error;
pub mod metadata;
pub mod models;

pub use config::{ConnectionParameters, DriverOptions, Dsn};
pub use db::{Connection, Driver, DriverKind, GeneratedValue, ResultSet, Statement};
pub use error::{DbError, DbResult};
pub use metadata::{CacheStorage, MemoryStorage, Metadata, MetadataSource};
pub use models::{ColumnDescriptor, QueryParam, Row, TableColumns};
