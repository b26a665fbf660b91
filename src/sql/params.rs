//! Bind parameters for document queries.

use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use uuid::Uuid;

/// A value bound to a positional placeholder.
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    Uuid(Uuid),
    UuidList(Vec<Uuid>),
    BigInt(i64),
    Json(Value),
    TextList(Vec<String>),
}

/// Bind every param in order.
pub fn bind_params<'q>(mut query: Query<'q, Postgres, PgArguments>, params: &'q [Param]) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = match p {
            Param::Uuid(u) => query.bind(*u),
            Param::UuidList(ids) => query.bind(ids.as_slice()),
            Param::BigInt(n) => query.bind(*n),
            Param::Json(v) => query.bind(v),
            Param::TextList(items) => query.bind(items.as_slice()),
        };
    }
    query
}
