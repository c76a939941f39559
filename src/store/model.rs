//! Order tracking models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orders::ResolvedLineItem;

/// Lifecycle of a tracked order.
///
/// pending → {sent | failed}; failed → {sent (retry) | resolved (manual)}.
/// Sent is terminal; deletion is an explicit administrative override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Sent,
    Failed,
    Resolved,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Sent => "sent",
            OrderStatus::Failed => "failed",
            OrderStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> OrderStatus {
        match s {
            "sent" => OrderStatus::Sent,
            "failed" => OrderStatus::Failed,
            "resolved" => OrderStatus::Resolved,
            _ => OrderStatus::Pending,
        }
    }
}

/// One tracked order. Exactly one row per order key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Vendor-qualified idempotency key ("TW-43333").
    pub order_key: String,
    pub status: OrderStatus,
    pub recipient: String,
    pub customer_name: String,
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    /// Resolved line items as of the last processing attempt.
    pub line_items: Vec<ResolvedLineItem>,
    #[serde(default)]
    pub raw_source: Option<String>,
    #[serde(default)]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Input for claiming/recording an order. The store fills in timestamps.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_key: String,
    pub recipient: String,
    pub customer_name: String,
    pub total_amount: Option<Decimal>,
    pub line_items: Vec<ResolvedLineItem>,
    pub raw_source: Option<String>,
}

/// Result of a duplicate check.
#[derive(Debug, Clone)]
pub struct DuplicateCheck {
    pub already_sent: bool,
    pub existing: Option<OrderRecord>,
}

/// Outcome of an idempotency-sensitive write. A collision is a business
/// condition carrying the surviving record, not an error.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Recorded,
    Duplicate(OrderRecord),
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded)
    }
}

/// One append-only audit log entry. Every order mutation writes exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub order_key: String,
    pub action: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-day sent count for the statistics window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: String,
    pub count: u64,
}

/// Derived, read-only aggregation over the tracking tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStats {
    pub total_sent: u64,
    pub daily_counts: Vec<DailyCount>,
    pub duplicates_blocked: u64,
    pub window_days: u32,
}
