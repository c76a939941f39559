//! End-to-end flow: catalog load, resolution, idempotent tracking,
//! rendering, dispatch. Uses an in-memory store and a recording dispatcher;
//! the only fake behavior is where the email actually goes.

use std::io::Write as _;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use order_relay::catalog::CatalogHandle;
use order_relay::config::RecipientMap;
use order_relay::dispatch::{OrderDispatcher, OutboundOrder};
use order_relay::error::DispatchError;
use order_relay::orders::{LineItem, MatchStrategy, ParsedOrder, SubmitOutcome, Vendor};
use order_relay::processor::OrderProcessor;
use order_relay::render::FallbackRenderer;
use order_relay::store::{LibSqlStore, OrderStatus, OrderStore};
use rust_decimal_macros::dec;

#[derive(Default)]
struct RecordingDispatcher {
    sent: Mutex<Vec<OutboundOrder>>,
}

#[async_trait]
impl OrderDispatcher for RecordingDispatcher {
    async fn dispatch(&self, outbound: &OutboundOrder) -> Result<(), DispatchError> {
        self.sent.lock().unwrap().push(outbound.clone());
        Ok(())
    }
}

const CATALOG_CSV: &str = "\
item_no,brand,description,unit_price,unit,category
254-50G,LATICRETE,254 Platinum Multipurpose Thinset Gray 50lb,$45.99,BAG,Mortar
9315-1212-S,HYDRO BAN,Preformed Niche Square 12x12,128.00,EA,Niches
,,No Data,0,,
T104-BN,TileWare,Promessa Series Tee Hook Brushed Nickel,31.58,EA,Accessories
";

fn write_catalog() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CATALOG_CSV.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

struct Harness {
    store: Arc<dyn OrderStore>,
    dispatcher: Arc<RecordingDispatcher>,
    processor: Arc<OrderProcessor>,
    _catalog_file: tempfile::NamedTempFile,
}

async fn harness() -> Harness {
    let catalog_file = write_catalog();
    let store: Arc<dyn OrderStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let catalog = Arc::new(CatalogHandle::load(catalog_file.path()).unwrap());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let processor = Arc::new(OrderProcessor::new(
        Arc::clone(&store),
        catalog,
        Arc::new(FallbackRenderer::standard()),
        Arc::clone(&dispatcher) as Arc<dyn OrderDispatcher>,
        RecipientMap {
            tileware: "tileware-cs@example.com".to_string(),
            laticrete: "laticrete-cs@example.com".to_string(),
        },
        1,
    ));
    Harness {
        store,
        dispatcher,
        processor,
        _catalog_file: catalog_file,
    }
}

fn order(number: &str, items: Vec<LineItem>) -> ParsedOrder {
    ParsedOrder {
        order_number: number.to_string(),
        customer_name: "Jordan Mills".to_string(),
        shipping_address: Default::default(),
        line_items: items,
        total: None,
        raw_source: Some("Forwarded order confirmation".to_string()),
    }
}

fn line(name: &str, sku: Option<&str>, qty: u32) -> LineItem {
    LineItem {
        raw_name: name.to_string(),
        raw_sku: sku.map(String::from),
        quantity: qty,
        raw_price: None,
    }
}

#[tokio::test]
async fn double_submit_sends_exactly_once() {
    let h = harness().await;
    let parsed = order(
        "43333",
        vec![line("Promessa Tee Hook", Some("T104-BN"), 2)],
    );

    let first = h
        .processor
        .submit_order(Vendor::Tileware, &parsed)
        .await
        .unwrap();
    assert!(matches!(first, SubmitOutcome::Sent { ref order_key } if order_key == "TW-43333"));

    let second = h
        .processor
        .submit_order(Vendor::Tileware, &parsed)
        .await
        .unwrap();
    let SubmitOutcome::Duplicate { order_key, sent_at } = second else {
        panic!("second submit must come back as duplicate");
    };
    assert_eq!(order_key, "TW-43333");
    assert!(sent_at.is_some());

    // One email, one row, and the audit trail shows the blocked attempt.
    assert_eq!(h.dispatcher.sent.lock().unwrap().len(), 1);
    assert_eq!(h.store.list_orders(10, 0, None).await.unwrap().len(), 1);
    let history = h.store.history("TW-43333").await.unwrap();
    assert!(history
        .iter()
        .any(|e| e.action == "duplicate_check" && e.detail == "order already sent"));
}

#[tokio::test]
async fn mangled_sku_resolves_with_partial_confidence() {
    let h = harness().await;
    let parsed = order(
        "50001",
        vec![line(
            "LATICRETE 254 Platinum Thinset Gray",
            Some("#254-50-G"),
            4,
        )],
    );

    let outcome = h
        .processor
        .submit_order(Vendor::Laticrete, &parsed)
        .await
        .unwrap();
    assert!(outcome.is_sent());

    let record = h.store.get_order("LAT-50001").await.unwrap().unwrap();
    let item = &record.line_items[0];
    assert_eq!(item.match_strategy, MatchStrategy::PartialSku);
    assert_eq!(item.match_confidence, 0.85);
    assert_eq!(item.resolved_sku.as_deref(), Some("254-50G"));
    assert_eq!(item.resolved_price, Some(dec!(45.99)));
    assert!(!item.needs_verification);
}

#[tokio::test]
async fn unknown_product_is_flagged_but_order_still_goes_out() {
    let h = harness().await;
    let parsed = order(
        "60001",
        vec![
            line("Preformed Niche 12x12", Some("9315-1212-S"), 1),
            line("Unknown Mystery Tile XYZ", None, 6),
        ],
    );

    let outcome = h
        .processor
        .submit_order(Vendor::Tileware, &parsed)
        .await
        .unwrap();
    assert!(outcome.is_sent());

    let record = h.store.get_order("TW-60001").await.unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Sent);
    let mystery = &record.line_items[1];
    assert_eq!(mystery.match_strategy, MatchStrategy::NoMatch);
    assert!(mystery.needs_verification);
    assert_eq!(mystery.raw_name, "Unknown Mystery Tile XYZ");

    let sent = h.dispatcher.sent.lock().unwrap();
    assert!(sent[0].body_text.contains("manual verification"));
    assert!(sent[0].body_text.contains("Unknown Mystery Tile XYZ"));
}

#[tokio::test]
async fn racing_submits_produce_one_sent_record() {
    let h = harness().await;
    let mut handles = Vec::new();
    for _ in 0..6 {
        let processor = Arc::clone(&h.processor);
        let parsed = order("70007", vec![line("Promessa Tee Hook", Some("T104-BN"), 1)]);
        handles.push(tokio::spawn(async move {
            processor.submit_order(Vendor::Tileware, &parsed).await
        }));
    }

    let mut sent_outcomes = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_sent() {
            sent_outcomes += 1;
        }
    }
    assert_eq!(sent_outcomes, 1);

    let record = h.store.get_order("TW-70007").await.unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Sent);
    assert_eq!(h.store.list_orders(10, 0, None).await.unwrap().len(), 1);
    assert_eq!(h.dispatcher.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn audit_trail_is_complete_and_ordered() {
    let h = harness().await;
    let parsed = order("80001", vec![line("Promessa Tee Hook", Some("T104-BN"), 1)]);

    h.processor
        .submit_order(Vendor::Tileware, &parsed)
        .await
        .unwrap();

    let history = h.store.history("TW-80001").await.unwrap();
    let actions: Vec<&str> = history.iter().map(|e| e.action.as_str()).collect();
    // Reverse-chronological: sent, pending claim, initial duplicate check.
    assert_eq!(actions, vec!["sent", "pending", "duplicate_check"]);
    for pair in history.windows(2) {
        assert!(pair[0].timestamp >= pair[1].timestamp);
    }

    let stats = h.store.statistics(7).await.unwrap();
    assert_eq!(stats.total_sent, 1);
    assert_eq!(stats.duplicates_blocked, 0);
}
