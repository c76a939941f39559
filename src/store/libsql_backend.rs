//! libSQL order store — async `OrderStore` implementation.
//!
//! One row per order key (`PRIMARY KEY` on `order_key` is the idempotency
//! guarantee); the append-only `processing_log` table records every
//! transition. WAL journaling keeps long reads (listings, statistics) from
//! blocking the duplicate-check/record-sent path.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use libsql::{params, Connection, Database as LibSqlDatabase};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    DailyCount, DuplicateCheck, NewOrder, OrderRecord, OrderStats, OrderStatus,
    ProcessingLogEntry, RecordOutcome,
};
use crate::store::traits::OrderStore;

/// libSQL database backend.
///
/// `libsql::Connection` is `Send + Sync`; all writers share this single
/// connection, which serializes the check-then-insert fast path in-process.
/// Cross-process safety still comes from the `UNIQUE` key constraint.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open libSQL database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        // WAL so listings and statistics never block the sent path.
        conn.query("PRAGMA journal_mode=WAL", ())
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to enable WAL: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run(&store.conn).await?;
        info!(path = %path.display(), "Order tracking database opened");
        Ok(store)
    }

    /// Create an in-memory store (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to create in-memory db: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run(&store.conn).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Append one audit log entry. Callers pair every mutation with
    /// exactly one of these.
    async fn log_action(
        &self,
        order_key: &str,
        action: &str,
        detail: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO processing_log (order_key, action, detail, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![order_key, action, detail, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("log_action: {e}")))?;
        Ok(())
    }

    async fn fetch_order(&self, order_key: &str) -> Result<Option<OrderRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_key = ?1"),
                params![order_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("fetch_order: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_order(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("fetch_order: {e}"))),
        }
    }

    async fn fetch_existing(&self, order_key: &str) -> Result<OrderRecord, DatabaseError> {
        self.fetch_order(order_key).await?.ok_or_else(|| {
            DatabaseError::Query(format!(
                "constraint hit for {order_key} but row not found"
            ))
        })
    }

    /// Insert a fresh row for `order` with the given status.
    async fn insert_order(
        &self,
        order: &NewOrder,
        status: OrderStatus,
        error_detail: Option<&str>,
        sent_at: Option<&str>,
    ) -> Result<(), libsql::Error> {
        let now = Utc::now().to_rfc3339();
        let line_items = serialize_items(&order.line_items);
        self.conn()
            .execute(
                "INSERT INTO orders (order_key, status, recipient, customer_name,
                     total_amount, line_items, raw_source, error_detail,
                     created_at, sent_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    order.order_key.as_str(),
                    status.as_str(),
                    order.recipient.as_str(),
                    order.customer_name.as_str(),
                    opt_text(order.total_amount.map(|d| d.to_string())),
                    line_items,
                    opt_text(order.raw_source.clone()),
                    opt_text(error_detail.map(String::from)),
                    now.as_str(),
                    opt_text(sent_at.map(String::from)),
                    now.as_str(),
                ],
            )
            .await
            .map(|_| ())
    }

    /// Guarded promotion of a non-sent row. Returns true when a row was
    /// actually transitioned (the guard lost to a racing sent otherwise).
    async fn promote(
        &self,
        order: &NewOrder,
        status: OrderStatus,
        error_detail: Option<&str>,
        sent_at: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let line_items = serialize_items(&order.line_items);
        let affected = self
            .conn()
            .execute(
                "UPDATE orders
                 SET status = ?1, recipient = ?2, customer_name = ?3,
                     total_amount = ?4, line_items = ?5,
                     raw_source = COALESCE(?6, raw_source),
                     error_detail = ?7, sent_at = COALESCE(?8, sent_at),
                     updated_at = ?9
                 WHERE order_key = ?10 AND status != 'sent'",
                params![
                    status.as_str(),
                    order.recipient.as_str(),
                    order.customer_name.as_str(),
                    opt_text(order.total_amount.map(|d| d.to_string())),
                    line_items,
                    opt_text(order.raw_source.clone()),
                    opt_text(error_detail.map(String::from)),
                    opt_text(sent_at.map(String::from)),
                    now.as_str(),
                    order.order_key.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("promote: {e}")))?;
        Ok(affected == 1)
    }
}

// ── Helper functions ────────────────────────────────────────────────

const ORDER_COLUMNS: &str = "order_key, status, recipient, customer_name, total_amount, \
     line_items, raw_source, error_detail, created_at, sent_at, updated_at";

/// Detail strings for `duplicate_check` log entries. `statistics` counts
/// the blocked variant; keep these stable.
const DETAIL_ALREADY_SENT: &str = "order already sent";
const DETAIL_NOT_SENT: &str = "order not sent";

/// A pending claim untouched for this long belongs to a worker that died
/// mid-dispatch; the next claim on the key takes it over.
const STALE_CLAIM_MINUTES: i64 = 15;

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Parse an RFC 3339 or SQLite datetime string, falling back to epoch.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn serialize_items(items: &[crate::orders::ResolvedLineItem]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Map a libsql row (ORDER_COLUMNS order) to an OrderRecord.
fn row_to_order(row: &libsql::Row) -> Result<OrderRecord, DatabaseError> {
    let map_err = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let status_str: String = row.get(1).map_err(map_err)?;
    let total_str: Option<String> = row.get(4).ok();
    let items_str: String = row.get(5).map_err(map_err)?;
    let created_str: String = row.get(8).map_err(map_err)?;
    let sent_str: Option<String> = row.get(9).ok();
    let updated_str: String = row.get(10).map_err(map_err)?;

    let total_amount = match total_str {
        Some(s) => Some(
            s.parse::<Decimal>()
                .map_err(|e| DatabaseError::Serialization(format!("total_amount: {e}")))?,
        ),
        None => None,
    };

    let line_items = serde_json::from_str(&items_str).unwrap_or_else(|e| {
        warn!("Corrupt line_items snapshot, treating as empty: {e}");
        Vec::new()
    });

    Ok(OrderRecord {
        order_key: row.get(0).map_err(map_err)?,
        status: OrderStatus::parse(&status_str),
        recipient: row.get(2).map_err(map_err)?,
        customer_name: row.get(3).map_err(map_err)?,
        total_amount,
        line_items,
        raw_source: row.get(6).ok(),
        error_detail: row.get(7).ok(),
        created_at: parse_datetime(&created_str),
        sent_at: sent_str.as_deref().map(parse_datetime),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_log(row: &libsql::Row) -> Result<ProcessingLogEntry, DatabaseError> {
    let map_err = |e: libsql::Error| DatabaseError::Query(format!("log row parse: {e}"));
    let ts: String = row.get(3).map_err(map_err)?;
    Ok(ProcessingLogEntry {
        order_key: row.get(0).map_err(map_err)?,
        action: row.get(1).map_err(map_err)?,
        detail: row.get(2).map_err(map_err)?,
        timestamp: parse_datetime(&ts),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl OrderStore for LibSqlStore {
    async fn check_duplicate(&self, order_key: &str) -> Result<DuplicateCheck, DatabaseError> {
        let existing = self.fetch_order(order_key).await?;
        let already_sent = existing
            .as_ref()
            .is_some_and(|r| r.status == OrderStatus::Sent);

        let detail = match (&existing, already_sent) {
            (_, true) => DETAIL_ALREADY_SENT,
            (Some(_), false) => DETAIL_NOT_SENT,
            (None, false) => "order not found",
        };
        self.log_action(order_key, "duplicate_check", detail).await?;

        Ok(DuplicateCheck {
            already_sent,
            existing,
        })
    }

    async fn record_pending(&self, order: &NewOrder) -> Result<RecordOutcome, DatabaseError> {
        match self
            .insert_order(order, OrderStatus::Pending, None, None)
            .await
        {
            Ok(()) => {
                self.log_action(&order.order_key, "pending", "order claimed for dispatch")
                    .await?;
                debug!(order_key = %order.order_key, "Order claimed");
                Ok(RecordOutcome::Recorded)
            }
            Err(e) if is_unique_violation(&e) => {
                let existing = self.fetch_existing(&order.order_key).await?;
                match existing.status {
                    OrderStatus::Sent => {
                        self.log_action(&order.order_key, "duplicate_check", DETAIL_ALREADY_SENT)
                            .await?;
                        Ok(RecordOutcome::Duplicate(existing))
                    }
                    OrderStatus::Pending => {
                        // A fresh claim means another invocation is
                        // mid-dispatch; a stale one means its owner died
                        // before promoting, and the key is up for grabs.
                        let age = Utc::now() - existing.updated_at;
                        if age > Duration::minutes(STALE_CLAIM_MINUTES)
                            && self.promote(order, OrderStatus::Pending, None, None).await?
                        {
                            self.log_action(
                                &order.order_key,
                                "pending",
                                "stale claim taken over",
                            )
                            .await?;
                            warn!(order_key = %order.order_key, "Stale pending claim taken over");
                            return Ok(RecordOutcome::Recorded);
                        }
                        self.log_action(
                            &order.order_key,
                            "duplicate_check",
                            "order already in flight",
                        )
                        .await?;
                        Ok(RecordOutcome::Duplicate(existing))
                    }
                    OrderStatus::Failed | OrderStatus::Resolved => {
                        if self.promote(order, OrderStatus::Pending, None, None).await? {
                            self.log_action(
                                &order.order_key,
                                "pending",
                                "failed order reclaimed for retry",
                            )
                            .await?;
                            Ok(RecordOutcome::Recorded)
                        } else {
                            let existing = self.fetch_existing(&order.order_key).await?;
                            self.log_action(
                                &order.order_key,
                                "duplicate_check",
                                DETAIL_ALREADY_SENT,
                            )
                            .await?;
                            Ok(RecordOutcome::Duplicate(existing))
                        }
                    }
                }
            }
            Err(e) => Err(DatabaseError::Query(format!("record_pending: {e}"))),
        }
    }

    async fn record_sent(&self, order: &NewOrder) -> Result<RecordOutcome, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let sent_detail = format!("order sent to {}", order.recipient);

        match self
            .insert_order(order, OrderStatus::Sent, None, Some(&now))
            .await
        {
            Ok(()) => {
                self.log_action(&order.order_key, "sent", &sent_detail).await?;
                info!(order_key = %order.order_key, recipient = %order.recipient, "Order marked as sent");
                Ok(RecordOutcome::Recorded)
            }
            Err(e) if is_unique_violation(&e) => {
                let existing = self.fetch_existing(&order.order_key).await?;
                if existing.status == OrderStatus::Sent {
                    self.log_action(&order.order_key, "duplicate_check", DETAIL_ALREADY_SENT)
                        .await?;
                    info!(order_key = %order.order_key, "Duplicate send blocked");
                    return Ok(RecordOutcome::Duplicate(existing));
                }
                // pending → sent (normal flow) or failed → sent (retry).
                if self
                    .promote(order, OrderStatus::Sent, None, Some(&now))
                    .await?
                {
                    self.log_action(&order.order_key, "sent", &sent_detail).await?;
                    info!(order_key = %order.order_key, recipient = %order.recipient, "Order marked as sent");
                    Ok(RecordOutcome::Recorded)
                } else {
                    let existing = self.fetch_existing(&order.order_key).await?;
                    self.log_action(&order.order_key, "duplicate_check", DETAIL_ALREADY_SENT)
                        .await?;
                    Ok(RecordOutcome::Duplicate(existing))
                }
            }
            Err(e) => Err(DatabaseError::Query(format!("record_sent: {e}"))),
        }
    }

    async fn record_failed(
        &self,
        order: &NewOrder,
        error_detail: &str,
    ) -> Result<RecordOutcome, DatabaseError> {
        // Best-effort: a sent record always wins over a late failure report.
        if let Some(existing) = self.fetch_order(&order.order_key).await? {
            if existing.status == OrderStatus::Sent {
                self.log_action(&order.order_key, "duplicate_check", DETAIL_ALREADY_SENT)
                    .await?;
                return Ok(RecordOutcome::Duplicate(existing));
            }
            if self
                .promote(order, OrderStatus::Failed, Some(error_detail), None)
                .await?
            {
                self.log_action(&order.order_key, "failed", error_detail).await?;
                warn!(order_key = %order.order_key, detail = error_detail, "Order marked as failed");
                return Ok(RecordOutcome::Recorded);
            }
            let existing = self.fetch_existing(&order.order_key).await?;
            self.log_action(&order.order_key, "duplicate_check", DETAIL_ALREADY_SENT)
                .await?;
            return Ok(RecordOutcome::Duplicate(existing));
        }

        match self
            .insert_order(order, OrderStatus::Failed, Some(error_detail), None)
            .await
        {
            Ok(()) => {
                self.log_action(&order.order_key, "failed", error_detail).await?;
                warn!(order_key = %order.order_key, detail = error_detail, "Order marked as failed");
                Ok(RecordOutcome::Recorded)
            }
            Err(e) if is_unique_violation(&e) => {
                // Lost a race with a concurrent writer; defer to what won.
                let existing = self.fetch_existing(&order.order_key).await?;
                self.log_action(&order.order_key, "duplicate_check", DETAIL_ALREADY_SENT)
                    .await?;
                Ok(RecordOutcome::Duplicate(existing))
            }
            Err(e) => Err(DatabaseError::Query(format!("record_failed: {e}"))),
        }
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<OrderRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ORDER_COLUMNS} FROM orders
                     WHERE status = 'failed'
                     ORDER BY updated_at DESC
                     LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_failed: {e}")))?;

        let mut orders = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_failed: {e}")))?
        {
            orders.push(row_to_order(&row)?);
        }
        Ok(orders)
    }

    async fn mark_retrying(&self, order_key: &str) -> Result<(), DatabaseError> {
        if self.fetch_order(order_key).await?.is_none() {
            return Err(DatabaseError::NotFound {
                order_key: order_key.to_string(),
            });
        }
        self.log_action(order_key, "retry", "manual retry requested")
            .await
    }

    async fn mark_resolved(&self, order_key: &str, note: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE orders SET status = 'resolved', updated_at = ?1
                 WHERE order_key = ?2 AND status = 'failed'",
                params![now, order_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_resolved: {e}")))?;

        if affected == 0 {
            return match self.fetch_order(order_key).await? {
                None => Err(DatabaseError::NotFound {
                    order_key: order_key.to_string(),
                }),
                Some(record) => Err(DatabaseError::InvalidTransition {
                    order_key: order_key.to_string(),
                    message: format!(
                        "only failed orders can be resolved, status is {}",
                        record.status.as_str()
                    ),
                }),
            };
        }

        self.log_action(order_key, "resolved", note).await?;
        info!(order_key, "Order manually resolved");
        Ok(())
    }

    async fn history(&self, order_key: &str) -> Result<Vec<ProcessingLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT order_key, action, detail, timestamp FROM processing_log
                 WHERE order_key = ?1
                 ORDER BY timestamp DESC, id DESC",
                params![order_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("history: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("history: {e}")))?
        {
            entries.push(row_to_log(&row)?);
        }
        Ok(entries)
    }

    async fn list_orders(
        &self,
        limit: usize,
        offset: usize,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderRecord>, DatabaseError> {
        let mut rows = match status {
            Some(status) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {ORDER_COLUMNS} FROM orders
                         WHERE status = ?1
                         ORDER BY created_at DESC
                         LIMIT ?2 OFFSET ?3"
                    ),
                    params![status.as_str(), limit as i64, offset as i64],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {ORDER_COLUMNS} FROM orders
                         ORDER BY created_at DESC
                         LIMIT ?1 OFFSET ?2"
                    ),
                    params![limit as i64, offset as i64],
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("list_orders: {e}")))?;

        let mut orders = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_orders: {e}")))?
        {
            orders.push(row_to_order(&row)?);
        }
        Ok(orders)
    }

    async fn get_order(&self, order_key: &str) -> Result<Option<OrderRecord>, DatabaseError> {
        self.fetch_order(order_key).await
    }

    async fn statistics(&self, window_days: u32) -> Result<OrderStats, DatabaseError> {
        let since = (Utc::now() - Duration::days(window_days as i64)).to_rfc3339();

        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM orders WHERE status = 'sent' AND sent_at >= ?1",
                params![since.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("statistics total: {e}")))?;
        let total_sent = match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("statistics total: {e}")))?
                as u64,
            _ => 0,
        };

        let mut rows = self
            .conn()
            .query(
                "SELECT DATE(sent_at) AS day, COUNT(*) FROM orders
                 WHERE status = 'sent' AND sent_at >= ?1
                 GROUP BY day ORDER BY day DESC",
                params![since.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("statistics daily: {e}")))?;
        let mut daily_counts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("statistics daily: {e}")))?
        {
            daily_counts.push(DailyCount {
                date: row
                    .get::<String>(0)
                    .map_err(|e| DatabaseError::Query(format!("statistics daily: {e}")))?,
                count: row
                    .get::<i64>(1)
                    .map_err(|e| DatabaseError::Query(format!("statistics daily: {e}")))?
                    as u64,
            });
        }

        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM processing_log
                 WHERE action = 'duplicate_check' AND detail = ?1 AND timestamp >= ?2",
                params![DETAIL_ALREADY_SENT, since.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("statistics duplicates: {e}")))?;
        let duplicates_blocked = match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("statistics duplicates: {e}")))?
                as u64,
            _ => 0,
        };

        Ok(OrderStats {
            total_sent,
            daily_counts,
            duplicates_blocked,
            window_days,
        })
    }

    async fn prune(&self, keep_days: u32) -> Result<usize, DatabaseError> {
        let cutoff = (Utc::now() - Duration::days(keep_days as i64)).to_rfc3339();

        let orders_deleted = self
            .conn()
            .execute(
                "DELETE FROM orders WHERE created_at < ?1 AND status != 'pending'",
                params![cutoff.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune orders: {e}")))?;

        // An order still on file keeps its full audit history, however old.
        let logs_deleted = self
            .conn()
            .execute(
                "DELETE FROM processing_log
                 WHERE timestamp < ?1
                   AND order_key NOT IN (SELECT order_key FROM orders)",
                params![cutoff.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune log: {e}")))?;

        let total = (orders_deleted + logs_deleted) as usize;
        if total > 0 {
            info!(total, keep_days, "Pruned old tracking records");
        }
        Ok(total)
    }

    async fn delete_order(&self, order_key: &str) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM orders WHERE order_key = ?1",
                params![order_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_order: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                order_key: order_key.to_string(),
            });
        }
        self.log_action(order_key, "deleted", "administrative delete")
            .await?;
        warn!(order_key, "Order record deleted by administrative override");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{MatchStrategy, ResolvedLineItem};
    use rust_decimal_macros::dec;

    async fn test_store() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    fn resolved_item(name: &str) -> ResolvedLineItem {
        ResolvedLineItem {
            raw_name: name.to_string(),
            raw_sku: None,
            quantity: 2,
            raw_price: None,
            catalog_id: Some(0),
            resolved_sku: Some("SKU-1".into()),
            resolved_price: Some(dec!(45.99)),
            unit: Some("EA".into()),
            match_strategy: MatchStrategy::ExactSku,
            match_confidence: 1.0,
            needs_verification: false,
        }
    }

    fn new_order(key: &str) -> NewOrder {
        NewOrder {
            order_key: key.to_string(),
            recipient: "cs@example.com".to_string(),
            customer_name: "Jordan Mills".to_string(),
            total_amount: Some(dec!(91.98)),
            line_items: vec![resolved_item("254 Platinum Thinset")],
            raw_source: Some("Order #43333 confirmation".to_string()),
        }
    }

    #[tokio::test]
    async fn record_sent_roundtrip() {
        let store = test_store().await;
        let outcome = store.record_sent(&new_order("TW-1")).await.unwrap();
        assert!(outcome.is_recorded());

        let record = store.get_order("TW-1").await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Sent);
        assert_eq!(record.recipient, "cs@example.com");
        assert_eq!(record.total_amount, Some(dec!(91.98)));
        assert_eq!(record.line_items.len(), 1);
        assert_eq!(record.line_items[0].resolved_sku.as_deref(), Some("SKU-1"));
        assert!(record.sent_at.is_some());
    }

    #[tokio::test]
    async fn record_sent_twice_is_duplicate_with_one_row() {
        let store = test_store().await;
        assert!(store.record_sent(&new_order("TW-2")).await.unwrap().is_recorded());

        let second = store.record_sent(&new_order("TW-2")).await.unwrap();
        let RecordOutcome::Duplicate(existing) = second else {
            panic!("second record_sent must be a duplicate");
        };
        assert_eq!(existing.order_key, "TW-2");
        assert_eq!(existing.status, OrderStatus::Sent);

        let all = store.list_orders(10, 0, None).await.unwrap();
        assert_eq!(all.len(), 1);

        // The second call leaves a duplicate-detection entry.
        let history = store.history("TW-2").await.unwrap();
        assert!(history
            .iter()
            .any(|e| e.action == "duplicate_check" && e.detail == "order already sent"));
    }

    #[tokio::test]
    async fn racing_record_sent_yields_one_sent_record() {
        let store = Arc::new(test_store().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.record_sent(&new_order("TW-RACE")).await.unwrap()
            }));
        }

        let mut recorded = 0;
        for handle in handles {
            if handle.await.unwrap().is_recorded() {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 1);

        let all = store.list_orders(100, 0, None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, OrderStatus::Sent);
    }

    #[tokio::test]
    async fn check_duplicate_reflects_sent_state() {
        let store = test_store().await;

        let check = store.check_duplicate("TW-3").await.unwrap();
        assert!(!check.already_sent);
        assert!(check.existing.is_none());

        store.record_sent(&new_order("TW-3")).await.unwrap();
        let check = store.check_duplicate("TW-3").await.unwrap();
        assert!(check.already_sent);
        assert_eq!(check.existing.unwrap().order_key, "TW-3");
    }

    #[tokio::test]
    async fn pending_claim_then_sent_promotion() {
        let store = test_store().await;
        let order = new_order("TW-4");

        assert!(store.record_pending(&order).await.unwrap().is_recorded());
        assert_eq!(
            store.get_order("TW-4").await.unwrap().unwrap().status,
            OrderStatus::Pending
        );

        // A second claim while in flight is blocked.
        let blocked = store.record_pending(&order).await.unwrap();
        assert!(!blocked.is_recorded());

        assert!(store.record_sent(&order).await.unwrap().is_recorded());
        assert_eq!(
            store.get_order("TW-4").await.unwrap().unwrap().status,
            OrderStatus::Sent
        );
    }

    #[tokio::test]
    async fn stale_pending_claim_is_taken_over() {
        let store = test_store().await;
        let order = new_order("TW-50");

        assert!(store.record_pending(&order).await.unwrap().is_recorded());

        // Backdate the claim past the staleness window, as if its worker
        // crashed between claiming and promoting.
        let stale = (Utc::now() - Duration::minutes(STALE_CLAIM_MINUTES + 1)).to_rfc3339();
        store
            .conn()
            .execute(
                "UPDATE orders SET updated_at = ?1 WHERE order_key = ?2",
                params![stale.as_str(), "TW-50"],
            )
            .await
            .unwrap();

        // The next claim takes the key over and can carry it to sent.
        assert!(store.record_pending(&order).await.unwrap().is_recorded());
        assert!(store.record_sent(&order).await.unwrap().is_recorded());
        assert_eq!(
            store.get_order("TW-50").await.unwrap().unwrap().status,
            OrderStatus::Sent
        );

        let history = store.history("TW-50").await.unwrap();
        assert!(history
            .iter()
            .any(|e| e.action == "pending" && e.detail == "stale claim taken over"));
    }

    #[tokio::test]
    async fn failed_then_retry_promotes_to_sent() {
        let store = test_store().await;
        let order = new_order("LAT-5");

        store.record_failed(&order, "SMTP timeout").await.unwrap();
        let record = store.get_order("LAT-5").await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Failed);
        assert_eq!(record.error_detail.as_deref(), Some("SMTP timeout"));

        let failed = store.list_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);

        // Retry: claim again, then send.
        assert!(store.record_pending(&order).await.unwrap().is_recorded());
        assert!(store.record_sent(&order).await.unwrap().is_recorded());

        let record = store.get_order("LAT-5").await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Sent);
        assert!(store.list_failed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_failed_rejected_after_sent() {
        let store = test_store().await;
        let order = new_order("TW-6");

        store.record_sent(&order).await.unwrap();
        let outcome = store.record_failed(&order, "late failure").await.unwrap();
        assert!(!outcome.is_recorded());

        let record = store.get_order("TW-6").await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Sent);
        assert!(record.error_detail.is_none());
    }

    #[tokio::test]
    async fn mark_resolved_only_from_failed() {
        let store = test_store().await;
        let order = new_order("TW-7");

        store.record_failed(&order, "render failed").await.unwrap();
        store.mark_resolved("TW-7", "handled by phone").await.unwrap();
        assert_eq!(
            store.get_order("TW-7").await.unwrap().unwrap().status,
            OrderStatus::Resolved
        );

        // Resolving a sent order is an invalid transition.
        store.record_sent(&new_order("TW-8")).await.unwrap();
        let err = store.mark_resolved("TW-8", "nope").await.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidTransition { .. }));

        let err = store.mark_resolved("TW-missing", "nope").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn audit_log_covers_every_transition() {
        let store = test_store().await;
        let order = new_order("LAT-9");

        store.record_pending(&order).await.unwrap();
        store.record_failed(&order, "dispatch refused").await.unwrap();
        store.mark_retrying("LAT-9").await.unwrap();
        store.record_pending(&order).await.unwrap();
        store.record_sent(&order).await.unwrap();

        let history = store.history("LAT-9").await.unwrap();
        let actions: Vec<&str> = history.iter().map(|e| e.action.as_str()).collect();
        // Reverse-chronological.
        assert_eq!(actions, vec!["sent", "pending", "retry", "failed", "pending"]);

        // Timestamps never decrease going forward in time.
        for pair in history.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn statistics_counts_sent_and_blocked() {
        let store = test_store().await;

        store.record_sent(&new_order("TW-10")).await.unwrap();
        store.record_sent(&new_order("TW-11")).await.unwrap();
        // One duplicate attempt.
        store.record_sent(&new_order("TW-10")).await.unwrap();

        let stats = store.statistics(7).await.unwrap();
        assert_eq!(stats.total_sent, 2);
        assert_eq!(stats.duplicates_blocked, 1);
        assert_eq!(stats.window_days, 7);
        assert_eq!(stats.daily_counts.len(), 1);
        assert_eq!(stats.daily_counts[0].count, 2);
    }

    #[tokio::test]
    async fn list_orders_filters_and_paginates() {
        let store = test_store().await;
        store.record_sent(&new_order("TW-20")).await.unwrap();
        store.record_sent(&new_order("TW-21")).await.unwrap();
        store
            .record_failed(&new_order("TW-22"), "boom")
            .await
            .unwrap();

        let sent = store
            .list_orders(10, 0, Some(OrderStatus::Sent))
            .await
            .unwrap();
        assert_eq!(sent.len(), 2);

        let page = store.list_orders(1, 1, None).await.unwrap();
        assert_eq!(page.len(), 1);

        let all = store.list_orders(10, 0, None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn delete_order_is_explicit_override() {
        let store = test_store().await;
        store.record_sent(&new_order("TW-30")).await.unwrap();

        store.delete_order("TW-30").await.unwrap();
        assert!(store.get_order("TW-30").await.unwrap().is_none());

        // Audit trail survives the delete.
        let history = store.history("TW-30").await.unwrap();
        assert!(history.iter().any(|e| e.action == "deleted"));

        let err = store.delete_order("TW-30").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn prune_keeps_history_of_retained_orders() {
        let store = test_store().await;
        store.record_pending(&new_order("TW-60")).await.unwrap();
        store.record_sent(&new_order("TW-61")).await.unwrap();

        // Age everything far past the retention window.
        let old = (Utc::now() - Duration::days(100)).to_rfc3339();
        store
            .conn()
            .execute(
                "UPDATE orders SET created_at = ?1, updated_at = ?1",
                params![old.as_str()],
            )
            .await
            .unwrap();
        store
            .conn()
            .execute(
                "UPDATE processing_log SET timestamp = ?1",
                params![old.as_str()],
            )
            .await
            .unwrap();

        let removed = store.prune(30).await.unwrap();
        assert!(removed > 0);

        // The old sent order goes, history and all.
        assert!(store.get_order("TW-61").await.unwrap().is_none());
        assert!(store.history("TW-61").await.unwrap().is_empty());

        // The still-pending order keeps its full audit trail.
        assert!(store.get_order("TW-60").await.unwrap().is_some());
        assert!(!store.history("TW-60").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("orders.db");
        let store = LibSqlStore::open(&path).await.unwrap();
        assert!(path.exists());
        store.record_sent(&new_order("TW-40")).await.unwrap();
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = test_store().await;
        migrations::run(store.conn()).await.unwrap();
        migrations::run(store.conn()).await.unwrap();
    }
}
