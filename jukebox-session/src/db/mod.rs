//! Database access layer
//!
//! Runtime settings live in a single key/value `settings` table.

pub mod init;
pub mod settings;

pub use init::{connect, init_database};
