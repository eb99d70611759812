//! Persistence layer: libSQL-backed storage for ingested emails.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, InsertOutcome, MessagePage, MessageQuery, MessageRecord, NewMessage, StatusCounts,
};
