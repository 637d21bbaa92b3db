//! SQLite persistence.
//!
//! [`Database`] owns the connection and schema; the `tables` modules extend it
//! with per-table operations.

mod sqlite;
mod tables;

pub use sqlite::{APP_SECRET_LEN, Database};
pub use tables::feeds::NewFeedRow;
