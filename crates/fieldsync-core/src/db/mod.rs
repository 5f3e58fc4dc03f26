//! Database layer for fieldsync

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{FailureRecord, QueueRepository, SqliteQueueRepository};
