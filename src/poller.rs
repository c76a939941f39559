//! Background order polling loop.
//!
//! An `OrderSource` hands the relay parsed orders; where they come from
//! (mailbox extraction, a spool directory, a test vector) is its business.
//! The loop drains the source on an interval and runs each order through
//! the processor, one bad order never stopping the batch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ProcessError;
use crate::orders::IncomingOrder;
use crate::processor::OrderProcessor;

/// Supplier of parsed orders awaiting processing. A fetched order stays
/// with the source until `acknowledge` confirms the store has recorded an
/// outcome for it; until then the source may hand it out again on a later
/// fetch, and the store's idempotency absorbs the replay.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_pending(&self) -> Result<Vec<IncomingOrder>, ProcessError>;

    /// The order reached the store (sent, failed, or duplicate); the source
    /// may drop its copy.
    async fn acknowledge(&self, _order: &IncomingOrder) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// Spawn the polling loop.
///
/// Ticks immediately, then every `interval_secs`. Returns a `JoinHandle`
/// and a shutdown flag; set the flag and the loop exits on its next tick.
pub fn spawn_order_poller(
    source: Arc<dyn OrderSource>,
    processor: Arc<OrderProcessor>,
    interval_secs: u64,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Order poller started — polling every {interval_secs}s");

        let mut tick = tokio::time::interval(Duration::from_secs(interval_secs));

        // Runs immediately on first tick
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Order poller shutting down");
                return;
            }

            run_once(&source, &processor).await;
        }
    });

    (handle, shutdown_flag)
}

/// Drain the source and process everything it returned. Used by the poll
/// loop and by single-shot mode.
pub async fn run_once(source: &Arc<dyn OrderSource>, processor: &Arc<OrderProcessor>) {
    let pending = match source.fetch_pending().await {
        Ok(orders) => orders,
        Err(e) => {
            error!("Failed to fetch pending orders: {e}");
            return;
        }
    };

    if pending.is_empty() {
        return;
    }

    info!("Processing {} pending order(s)", pending.len());

    for incoming in pending {
        match processor
            .submit_order(incoming.vendor, &incoming.order)
            .await
        {
            Ok(outcome) => {
                debug!(
                    order_number = %incoming.order.order_number,
                    vendor = %incoming.vendor,
                    sent = outcome.is_sent(),
                    duplicate = outcome.is_duplicate(),
                    "Order processed"
                );
                // Recorded either way; the source can let go of it now.
                if let Err(e) = source.acknowledge(&incoming).await {
                    warn!(
                        order_number = %incoming.order.order_number,
                        error = %e,
                        "Failed to acknowledge processed order"
                    );
                }
            }
            Err(e) => {
                // Per-order boundary: log, leave it with the source for the
                // next tick, move on.
                error!(
                    order_number = %incoming.order.order_number,
                    vendor = %incoming.vendor,
                    error = %e,
                    "Order processing aborted"
                );
            }
        }
    }
}

/// File-drop source: reads `IncomingOrder` JSON files from a spool
/// directory. A file stays on disk until its order is acknowledged, so a
/// crash mid-processing leaves the order to be picked up again rather than
/// losing it.
pub struct SpoolSource {
    dir: PathBuf,
    in_flight: Mutex<HashMap<String, PathBuf>>,
}

impl SpoolSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl OrderSource for SpoolSource {
    async fn fetch_pending(&self) -> Result<Vec<IncomingOrder>, ProcessError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| ProcessError::SourceFetch(format!("spool read_dir: {e}")))?;

        let mut orders = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProcessError::SourceFetch(format!("spool entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable spool file, skipping");
                    continue;
                }
            };

            match serde_json::from_slice::<IncomingOrder>(&bytes) {
                Ok(order) => {
                    let key = order.vendor.order_key(&order.order.order_number);
                    self.in_flight
                        .lock()
                        .expect("spool lock poisoned")
                        .insert(key, path);
                    orders.push(order);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed spool file, leaving in place");
                }
            }
        }

        Ok(orders)
    }

    async fn acknowledge(&self, order: &IncomingOrder) -> Result<(), ProcessError> {
        let key = order.vendor.order_key(&order.order.order_number);
        let path = self
            .in_flight
            .lock()
            .expect("spool lock poisoned")
            .remove(&key);
        if let Some(path) = path {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove spool file");
            }
        }
        Ok(())
    }
}

/// A source with nothing to say. Used when only the admin API should drive
/// the relay.
pub struct NullSource;

#[async_trait]
impl OrderSource for NullSource {
    async fn fetch_pending(&self) -> Result<Vec<IncomingOrder>, ProcessError> {
        Ok(Vec::new())
    }
}
