//! Order processing orchestrator.
//!
//! Ties the stages together: duplicate check, catalog resolution, document
//! rendering, durable claim, outbound dispatch, outcome recording. The
//! durable claim happens before anything leaves the process; a crash
//! between claim and dispatch leaves a pending row that a resend reclaims
//! once the claim has gone stale, never a silent double-send.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::catalog::{CatalogHandle, Resolver};
use crate::config::RecipientMap;
use crate::dispatch::{OrderAttachment, OrderDispatcher, OutboundOrder};
use crate::error::{Error, ProcessError};
use crate::orders::{ParsedOrder, ResolvedLineItem, SubmitOutcome, Vendor};
use crate::render::{DocumentRenderer, RenderOrder};
use crate::store::{NewOrder, OrderStore, RecordOutcome};

const DISPATCH_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// The orchestrator. Collaborators are trait objects so tests swap in
/// doubles for rendering and dispatch.
pub struct OrderProcessor {
    store: Arc<dyn OrderStore>,
    catalog: Arc<CatalogHandle>,
    renderer: Arc<dyn DocumentRenderer>,
    dispatcher: Arc<dyn OrderDispatcher>,
    recipients: RecipientMap,
    dispatch_attempts: u32,
}

impl OrderProcessor {
    pub fn new(
        store: Arc<dyn OrderStore>,
        catalog: Arc<CatalogHandle>,
        renderer: Arc<dyn DocumentRenderer>,
        dispatcher: Arc<dyn OrderDispatcher>,
        recipients: RecipientMap,
        dispatch_attempts: u32,
    ) -> Self {
        Self {
            store,
            catalog,
            renderer,
            dispatcher,
            recipients,
            dispatch_attempts: dispatch_attempts.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    /// Process one parsed order end to end.
    ///
    /// Collaborator failures (render, dispatch) are absorbed into a failed
    /// record and a `Failed` outcome; only store unavailability surfaces as
    /// `Err`, since without the store no outcome can be trusted.
    pub async fn submit_order(
        &self,
        vendor: Vendor,
        parsed: &ParsedOrder,
    ) -> Result<SubmitOutcome, Error> {
        if parsed.order_number.trim().is_empty() {
            return Err(ProcessError::MissingOrderNumber.into());
        }
        let order_key = vendor.order_key(&parsed.order_number);

        // Advisory fast path; the pending claim below is the real gate.
        let check = self.store.check_duplicate(&order_key).await?;
        if check.already_sent {
            let sent_at = check.existing.and_then(|r| r.sent_at);
            info!(order_key, "Order already sent, skipping");
            return Ok(SubmitOutcome::Duplicate { order_key, sent_at });
        }

        let resolved = self.resolve_items(vendor, parsed);
        let unresolved = resolved.iter().filter(|i| i.needs_verification).count();
        if unresolved > 0 {
            warn!(
                order_key,
                unresolved,
                total = resolved.len(),
                "Order has line items needing manual verification, forwarding anyway"
            );
        }

        let recipient = self.recipients.for_vendor(vendor).to_string();
        let new_order = NewOrder {
            order_key: order_key.clone(),
            recipient: recipient.clone(),
            customer_name: parsed.customer_name.clone(),
            total_amount: parsed.total,
            line_items: resolved.clone(),
            raw_source: parsed.raw_source.clone(),
        };

        // Durable claim before anything leaves the process.
        match self.store.record_pending(&new_order).await? {
            RecordOutcome::Recorded => {}
            RecordOutcome::Duplicate(existing) => {
                info!(order_key, "Order already claimed, skipping");
                return Ok(SubmitOutcome::Duplicate {
                    order_key,
                    sent_at: existing.sent_at,
                });
            }
        }

        let render_order = RenderOrder {
            order_key: order_key.clone(),
            customer_name: parsed.customer_name.clone(),
            shipping_address: Some(parsed.shipping_address.clone()),
            line_items: resolved.clone(),
            total: parsed.total,
        };
        let document = match self.renderer.render(&render_order).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .fail_order(&new_order, &format!("render failed: {e}"))
                    .await;
            }
        };

        let outbound = OutboundOrder {
            recipient,
            subject: format!("Purchase Order {order_key} - {}", parsed.customer_name),
            body_text: format_body(&order_key, parsed, &resolved),
            attachment: Some(OrderAttachment {
                filename: format!("order_{order_key}.txt"),
                content: document,
            }),
        };

        if let Err(e) = self.dispatch_with_retry(&outbound, &order_key).await {
            return self
                .fail_order(&new_order, &format!("dispatch failed: {e}"))
                .await;
        }

        match self.store.record_sent(&new_order).await? {
            RecordOutcome::Recorded => {
                info!(order_key, vendor = %vendor, "Order processed and sent");
                Ok(SubmitOutcome::Sent { order_key })
            }
            RecordOutcome::Duplicate(existing) => Ok(SubmitOutcome::Duplicate {
                order_key,
                sent_at: existing.sent_at,
            }),
        }
    }

    /// Re-process a previously recorded order, rebuilding the parsed order
    /// from the stored snapshot. Re-enters `submit_order`, so a sent order
    /// comes back as `Duplicate` rather than going out twice.
    pub async fn resend(&self, order_key: &str) -> Result<SubmitOutcome, Error> {
        let record = self
            .store
            .get_order(order_key)
            .await?
            .ok_or(crate::error::DatabaseError::NotFound {
                order_key: order_key.to_string(),
            })?;
        let vendor = Vendor::from_order_key(order_key)?;

        if record.line_items.is_empty() {
            return Err(ProcessError::CorruptSnapshot {
                order_key: order_key.to_string(),
                message: "stored record has no line items".to_string(),
            }
            .into());
        }

        self.store.mark_retrying(order_key).await?;

        let order_number = order_key
            .strip_prefix(vendor.prefix())
            .and_then(|rest| rest.strip_prefix('-'))
            .unwrap_or(order_key)
            .to_string();

        // Raw fields survive in the snapshot; re-resolve against the
        // current catalog so a fixed price list takes effect on retry.
        let parsed = ParsedOrder {
            order_number,
            customer_name: record.customer_name.clone(),
            shipping_address: Default::default(),
            line_items: record
                .line_items
                .iter()
                .map(|item| crate::orders::LineItem {
                    raw_name: item.raw_name.clone(),
                    raw_sku: item.raw_sku.clone(),
                    quantity: item.quantity,
                    raw_price: item.raw_price,
                })
                .collect(),
            total: record.total_amount,
            raw_source: record.raw_source.clone(),
        };

        self.submit_order(vendor, &parsed).await
    }

    fn resolve_items(&self, vendor: Vendor, parsed: &ParsedOrder) -> Vec<ResolvedLineItem> {
        // One snapshot for the whole order; a concurrent reload never mixes
        // catalog versions within an order.
        let snapshot = self.catalog.snapshot();
        let resolver = Resolver::new(&snapshot).with_brand_prefix(vendor.brand_prefix());
        parsed
            .line_items
            .iter()
            .map(|item| resolver.resolve_item(item))
            .collect()
    }

    async fn dispatch_with_retry(
        &self,
        outbound: &OutboundOrder,
        order_key: &str,
    ) -> Result<(), crate::error::DispatchError> {
        let mut last_err = None;
        for attempt in 1..=self.dispatch_attempts {
            match self.dispatcher.dispatch(outbound).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        order_key,
                        attempt,
                        attempts = self.dispatch_attempts,
                        error = %e,
                        "Dispatch attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < self.dispatch_attempts {
                        tokio::time::sleep(DISPATCH_RETRY_BACKOFF).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(crate::error::DispatchError::Smtp(
            "no dispatch attempt made".to_string(),
        )))
    }

    async fn fail_order(
        &self,
        order: &NewOrder,
        detail: &str,
    ) -> Result<SubmitOutcome, Error> {
        error!(order_key = %order.order_key, detail, "Order processing failed");
        match self.store.record_failed(order, detail).await? {
            RecordOutcome::Recorded => Ok(SubmitOutcome::Failed {
                order_key: order.order_key.clone(),
                detail: detail.to_string(),
            }),
            // A sent record surfaced while we were failing; the send won.
            RecordOutcome::Duplicate(existing) => Ok(SubmitOutcome::Duplicate {
                order_key: order.order_key.clone(),
                sent_at: existing.sent_at,
            }),
        }
    }
}

/// Human-readable email body; the rendered form rides as an attachment.
fn format_body(order_key: &str, parsed: &ParsedOrder, resolved: &[ResolvedLineItem]) -> String {
    let mut body = format!(
        "Please process the attached purchase order {order_key}.\n\
         \n\
         Customer: {}\n\
         Line items: {}\n",
        parsed.customer_name,
        resolved.len()
    );

    let unresolved: Vec<&ResolvedLineItem> =
        resolved.iter().filter(|i| i.needs_verification).collect();
    if !unresolved.is_empty() {
        body.push_str(&format!(
            "\nATTENTION: {} item(s) could not be matched to the price catalog\n\
             and need manual verification:\n",
            unresolved.len()
        ));
        for item in unresolved {
            body.push_str(&format!("  - {} x{}\n", item.raw_name, item.quantity));
        }
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, CatalogIndex};
    use crate::dispatch::testing::{FlakyDispatcher, RecordingDispatcher};
    use crate::orders::LineItem;
    use crate::render::FallbackRenderer;
    use crate::store::{LibSqlStore, OrderStatus};
    use rust_decimal_macros::dec;

    fn test_catalog() -> CatalogIndex {
        let entry = |id: u64, sku: Option<&str>, name: &str, price| CatalogEntry {
            id,
            display_name: name.to_string(),
            normalized_name: name.to_uppercase(),
            sku: sku.map(String::from),
            unit_price: price,
            unit: "EA".to_string(),
            category: String::new(),
        };
        CatalogIndex::from_entries(
            1,
            vec![
                entry(
                    0,
                    Some("254-50G"),
                    "254 Platinum Multipurpose Thinset Gray 50lb",
                    dec!(45.99),
                ),
                entry(
                    1,
                    Some("9315-1212-S"),
                    "HYDRO BAN Preformed Niche Square 12x12",
                    dec!(128.00),
                ),
            ],
        )
    }

    fn recipients() -> RecipientMap {
        RecipientMap {
            tileware: "tileware-orders@example.com".to_string(),
            laticrete: "laticrete-orders@example.com".to_string(),
        }
    }

    async fn processor_with(
        dispatcher: Arc<dyn OrderDispatcher>,
        attempts: u32,
    ) -> OrderProcessor {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let catalog = Arc::new(CatalogHandle::from_index(test_catalog()));
        OrderProcessor::new(
            store,
            catalog,
            Arc::new(FallbackRenderer::standard()),
            dispatcher,
            recipients(),
            attempts,
        )
    }

    fn order(number: &str, items: Vec<LineItem>) -> ParsedOrder {
        ParsedOrder {
            order_number: number.to_string(),
            customer_name: "Jordan Mills".to_string(),
            shipping_address: Default::default(),
            line_items: items,
            total: None,
            raw_source: Some("Order confirmation email".to_string()),
        }
    }

    fn line(name: &str, sku: Option<&str>) -> LineItem {
        LineItem {
            raw_name: name.to_string(),
            raw_sku: sku.map(String::from),
            quantity: 2,
            raw_price: None,
        }
    }

    #[tokio::test]
    async fn submit_sends_and_records_once() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let processor = processor_with(dispatcher.clone(), 1).await;
        let parsed = order("43333", vec![line("254 Platinum Thinset", Some("#254-50G"))]);

        let outcome = processor
            .submit_order(Vendor::Tileware, &parsed)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Sent { ref order_key } if order_key == "TW-43333"));

        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "tileware-orders@example.com");
        assert!(sent[0].subject.contains("TW-43333"));
        assert!(sent[0].attachment.is_some());

        let record = processor.store().get_order("TW-43333").await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Sent);
        assert_eq!(record.line_items[0].resolved_price, Some(dec!(45.99)));
    }

    #[tokio::test]
    async fn second_submit_is_duplicate_and_not_dispatched() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let processor = processor_with(dispatcher.clone(), 1).await;
        let parsed = order("43333", vec![line("254 Platinum Thinset", Some("#254-50G"))]);

        let first = processor
            .submit_order(Vendor::Tileware, &parsed)
            .await
            .unwrap();
        assert!(first.is_sent());

        let second = processor
            .submit_order(Vendor::Tileware, &parsed)
            .await
            .unwrap();
        let SubmitOutcome::Duplicate { order_key, sent_at } = second else {
            panic!("second submit must be a duplicate");
        };
        assert_eq!(order_key, "TW-43333");
        assert!(sent_at.is_some());

        // One physical email, one row.
        assert_eq!(dispatcher.sent.lock().unwrap().len(), 1);
        assert_eq!(
            processor.store().list_orders(10, 0, None).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_item_degrades_but_order_still_sends() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let processor = processor_with(dispatcher.clone(), 1).await;
        let parsed = order(
            "777",
            vec![
                line("254 Platinum Thinset", Some("#254-50G")),
                line("Unknown Mystery Tile XYZ", None),
            ],
        );

        let outcome = processor
            .submit_order(Vendor::Tileware, &parsed)
            .await
            .unwrap();
        assert!(outcome.is_sent());

        let record = processor.store().get_order("TW-777").await.unwrap().unwrap();
        let mystery = &record.line_items[1];
        assert!(mystery.needs_verification);
        assert!(mystery.resolved_price.is_none());

        let sent = dispatcher.sent.lock().unwrap();
        assert!(sent[0].body_text.contains("manual verification"));
        assert!(sent[0].body_text.contains("Unknown Mystery Tile XYZ"));
    }

    #[tokio::test]
    async fn dispatch_failure_records_failed_for_retry() {
        // Fails more times than we retry.
        let dispatcher = Arc::new(FlakyDispatcher::failing(5));
        let processor = processor_with(dispatcher.clone(), 2).await;
        let parsed = order("900", vec![line("254 Platinum Thinset", Some("#254-50G"))]);

        let outcome = processor
            .submit_order(Vendor::Tileware, &parsed)
            .await
            .unwrap();
        let SubmitOutcome::Failed { order_key, detail } = outcome else {
            panic!("dispatch failure must yield a failed outcome");
        };
        assert_eq!(order_key, "TW-900");
        assert!(detail.contains("dispatch failed"));

        let record = processor.store().get_order("TW-900").await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Failed);
        assert!(dispatcher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_dispatch_failure_is_retried() {
        let dispatcher = Arc::new(FlakyDispatcher::failing(1));
        let processor = processor_with(dispatcher.clone(), 2).await;
        let parsed = order("901", vec![line("254 Platinum Thinset", Some("#254-50G"))]);

        let outcome = processor
            .submit_order(Vendor::Tileware, &parsed)
            .await
            .unwrap();
        assert!(outcome.is_sent());
        assert_eq!(dispatcher.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resend_after_failure_goes_out() {
        let dispatcher = Arc::new(FlakyDispatcher::failing(2));
        let processor = processor_with(dispatcher.clone(), 1).await;
        let parsed = order("902", vec![line("254 Platinum Thinset", Some("#254-50G"))]);

        // Two failed submits (flaky fails twice), then a resend succeeds.
        processor.submit_order(Vendor::Tileware, &parsed).await.unwrap();
        let outcome = processor.resend("TW-902").await.unwrap();
        let SubmitOutcome::Failed { .. } = outcome else {
            panic!("second attempt still fails");
        };

        let outcome = processor.resend("TW-902").await.unwrap();
        assert!(outcome.is_sent());
        assert_eq!(
            processor.store().get_order("TW-902").await.unwrap().unwrap().status,
            OrderStatus::Sent
        );

        // Resend of a sent order short-circuits to duplicate.
        let outcome = processor.resend("TW-902").await.unwrap();
        assert!(outcome.is_duplicate());
        assert_eq!(dispatcher.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resend_unknown_key_is_not_found() {
        let processor = processor_with(Arc::new(RecordingDispatcher::default()), 1).await;
        let err = processor.resend("TW-nope").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Database(crate::error::DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_order_number_is_rejected() {
        let processor = processor_with(Arc::new(RecordingDispatcher::default()), 1).await;
        let parsed = order("  ", vec![line("whatever", None)]);
        let err = processor
            .submit_order(Vendor::Tileware, &parsed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Process(ProcessError::MissingOrderNumber)
        ));
    }

    #[tokio::test]
    async fn laticrete_orders_route_to_laticrete_recipient() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let processor = processor_with(dispatcher.clone(), 1).await;
        let parsed = order(
            "88",
            vec![line("LATICRETE 254 Platinum Thinset Gray 50lb", None)],
        );

        let outcome = processor
            .submit_order(Vendor::Laticrete, &parsed)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Sent { ref order_key } if order_key == "LAT-88"));
        assert_eq!(
            dispatcher.sent.lock().unwrap()[0].recipient,
            "laticrete-orders@example.com"
        );
    }
}
