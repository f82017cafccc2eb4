//! State store errors.
//!
//! redb reports failures through several error types; they are flattened
//! to strings here so callers only match on where the failure happened.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// The database file could not be created or opened.
    #[error("cannot open state database: {0}")]
    Open(String),

    /// Beginning or committing a transaction failed.
    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open state table: {0}")]
    Table(String),

    /// A get, insert, remove, or scan inside a table failed.
    #[error("state storage failure: {0}")]
    Storage(String),

    #[error("cannot encode record: {0}")]
    Encode(String),

    /// A stored value no longer matches its record type.
    #[error("corrupt record: {0}")]
    Decode(String),
}
