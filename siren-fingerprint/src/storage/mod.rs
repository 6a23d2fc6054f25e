//! Storage collaborators
//!
//! Back-ends are reached only through [`Connection`] / [`Command`]: a command is
//! built from a [`QueryCollection`] and exposes the result rows through a
//! cursor with typed column accessors.

pub mod command;
pub mod connection;
pub mod elastic;
pub mod pool;
pub mod postgres;
pub mod query;

pub use command::{ColumnValue, Command, RowBuffer};
pub use connection::{Connection, Connector};
pub use pool::ConnectionPool;
pub use query::{Query, QueryCollection};

use thiserror::Error;

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Batch members must share the same field names
    #[error("Heterogeneous batch: expected fields {expected:?}, got {found:?}")]
    HeterogeneousBatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Query lacks required field '{0}'")]
    MissingField(&'static str),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Back-end reported error(s): {0}")]
    Backend(String),

    /// A connection came back to its pool unusable
    #[error("Broken connection returned to pool")]
    BrokenConnection,

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
