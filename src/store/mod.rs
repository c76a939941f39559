//! Persistence layer — libSQL-backed order tracking with an append-only
//! audit log.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use model::{
    DailyCount, DuplicateCheck, NewOrder, OrderRecord, OrderStats, OrderStatus,
    ProcessingLogEntry, RecordOutcome,
};
pub use traits::OrderStore;
