//! Errors shared by the mediagate crates.
//!
//! Storage code reports failures through [`Error`]; the service layers wrap
//! it in their own enums and decide what reaches a caller.

use std::fmt::Display;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record that was expected to exist is missing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// SQLite, the pool, or the migration runner failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A value could not be encoded for storage.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
