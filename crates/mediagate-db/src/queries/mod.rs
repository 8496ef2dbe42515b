//! Database query operations.
//!
//! Functions take a borrowed `rusqlite::Connection` so callers decide how
//! long a pooled connection is held.

pub mod conversion_plans;
pub mod media_items;

use chrono::{DateTime, SecondsFormat, Utc};
use mediagate_common::{Error, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Begin a transaction that takes the write lock immediately.
///
/// Concurrent status changes for one item queue on the lock instead of
/// reading stale state and failing at commit.
pub(crate) fn begin_immediate(conn: &Connection) -> Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| Error::database(e.to_string()))
}

/// Format a timestamp for storage.
///
/// Fixed precision with a `Z` suffix keeps stored values lexically ordered,
/// so range comparisons can be done in SQL.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a text column through `FromStr`.
pub(crate) fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
    })
}
