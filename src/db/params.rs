//! Binding of [`QueryParam`] values onto sqlx queries.
//!
//! Every backend binds values the same way except for NULL. MySQL and SQLite
//! accept a NULL of any declared type, while PostgreSQL checks the declared
//! type against the placeholder. NULL is therefore sent to PostgreSQL with an
//! unspecified type so the server infers it from context.

use crate::models::QueryParam;
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite, Type};

/// A PostgreSQL NULL whose type is left for the server to infer.
///
/// Binding `None::<String>` declares the placeholder as `text`, which the
/// server rejects for integer, bytea or timestamp columns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Binds the non-null variants identically on every backend; `$null` is the
/// value bound for [`QueryParam::Null`].
macro_rules! bind_value {
    ($query:expr, $param:expr, $null:expr) => {
        match $param {
            QueryParam::Null => $query.bind($null),
            QueryParam::Bool(v) => $query.bind(*v),
            QueryParam::Int(v) => $query.bind(*v),
            QueryParam::Float(v) => $query.bind(*v),
            QueryParam::String(v) => $query.bind(v.as_str()),
            QueryParam::Bytes(v) => $query.bind(v.as_slice()),
        }
    };
}

pub(crate) fn bind_mysql_param<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> Query<'q, MySql, MySqlArguments> {
    bind_value!(query, param, None::<String>)
}

pub(crate) fn bind_postgres_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> Query<'q, Postgres, PgArguments> {
    bind_value!(query, param, UntypedNull)
}

pub(crate) fn bind_sqlite_param<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    bind_value!(query, param, None::<String>)
}
