//! `OrderStore` trait — the idempotent order-tracking contract.
//!
//! Correctness discipline: the `UNIQUE` constraint on `order_key` is the
//! actual guarantee for check-then-insert races; callers treat a
//! `RecordOutcome::Duplicate` as a final answer, never a retryable error.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::model::{
    DuplicateCheck, NewOrder, OrderRecord, OrderStats, OrderStatus, ProcessingLogEntry,
    RecordOutcome,
};

/// Durable, concurrency-safe record of every order considered for
/// forwarding. Every mutation writes exactly one audit log entry.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Has this order already been sent? Safe under concurrent calls; the
    /// answer is advisory — `record_sent`/`record_pending` are the
    /// authoritative gate. Logs a `duplicate_check` entry either way.
    async fn check_duplicate(&self, order_key: &str) -> Result<DuplicateCheck, DatabaseError>;

    /// Claim an order key before outbound dispatch. Inserts a pending row;
    /// an existing sent or fresh in-flight pending row comes back as
    /// `Duplicate`. A failed or resolved row is taken over (retry path), as
    /// is a pending row stale enough that its claimant must have crashed.
    async fn record_pending(&self, order: &NewOrder) -> Result<RecordOutcome, DatabaseError>;

    /// Record an order as sent. Insert-or-fail keyed by order key: a
    /// collision with an existing sent record returns `Duplicate` carrying
    /// that record and never overwrites it. A pending or failed row for the
    /// same key is promoted instead (pending→sent, failed→sent on retry).
    async fn record_sent(&self, order: &NewOrder) -> Result<RecordOutcome, DatabaseError>;

    /// Record a processing failure for later retry. Rejected (`Duplicate`)
    /// if a sent record already exists for the key.
    async fn record_failed(
        &self,
        order: &NewOrder,
        error_detail: &str,
    ) -> Result<RecordOutcome, DatabaseError>;

    /// Failed orders needing attention, most recent first.
    async fn list_failed(&self, limit: usize) -> Result<Vec<OrderRecord>, DatabaseError>;

    /// Note a manual retry request in the audit log.
    async fn mark_retrying(&self, order_key: &str) -> Result<(), DatabaseError>;

    /// Manually close out a failed order (failed → resolved).
    async fn mark_resolved(&self, order_key: &str, note: &str) -> Result<(), DatabaseError>;

    /// Full audit history for an order, reverse-chronological.
    async fn history(&self, order_key: &str) -> Result<Vec<ProcessingLogEntry>, DatabaseError>;

    /// Paginated order listing, optionally filtered by status.
    async fn list_orders(
        &self,
        limit: usize,
        offset: usize,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderRecord>, DatabaseError>;

    /// Fetch one order by key.
    async fn get_order(&self, order_key: &str) -> Result<Option<OrderRecord>, DatabaseError>;

    /// Sent counts and duplicates blocked over the trailing window.
    async fn statistics(&self, window_days: u32) -> Result<OrderStats, DatabaseError>;

    /// Remove order rows older than `keep_days`, plus log entries that old
    /// whose order is no longer on file. Orders still present keep their
    /// full history. Returns the number of rows removed.
    async fn prune(&self, keep_days: u32) -> Result<usize, DatabaseError>;

    /// Administrative override: delete one order record outright. The audit
    /// log keeps its entries.
    async fn delete_order(&self, order_key: &str) -> Result<(), DatabaseError>;
}
