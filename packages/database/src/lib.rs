#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` incident storage for `WijkAgent`.
//!
//! All incidents live in a single `DuckDB` file (by default
//! `data/wijkagent.duckdb`) holding one `incidents` table. The
//! [`IncidentRepository`] wraps the connection and exposes CRUD, the dedupe
//! lookups used by the feed poller, and read-only aggregate statistics.

mod convert;
pub mod paths;
pub mod repository;
pub mod stats;

pub use repository::IncidentRepository;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` query or connection error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error (creating the data directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be converted to its model type.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// A previous holder of the connection lock panicked.
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}
