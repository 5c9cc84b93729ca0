//! End-to-end flows against an in-memory store and a scripted mock
//! platform: order polling, dedup, oversell, the confirm retry ladder, and
//! push clamping.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use stocksync_backend::error::PlatformError;
use stocksync_backend::models::{
    ApiConfig, EventDraft, EventSource, EventType, RetryStatus, SkuMaster, Store, SYSTEM_ERROR_SKU,
};
use stocksync_backend::platform::types::{InventoryRecord, ItemDetail, OrderDetail};
use stocksync_backend::platform::{PlatformApi, PlatformConnector};
use stocksync_backend::store as rows;
use stocksync_backend::{
    ConfirmRetryQueue, InventoryService, InventoryStore, OrderPoller, PushSynchronizer,
    SkuCatalogSync,
};

#[derive(Clone, Copy)]
enum Scripted {
    Succeed,
    Fail(u16),
}

#[derive(Default)]
struct MockState {
    orders: Vec<OrderDetail>,
    confirm_script: HashMap<String, Vec<Scripted>>,
    confirm_calls: Vec<String>,
    set_inventory_calls: Vec<(String, u32)>,
    set_inventory_fail: HashMap<String, u16>,
    inventory_rows: Vec<InventoryRecord>,
    items: HashMap<String, ItemDetail>,
}

#[derive(Default)]
struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    fn push_order(&self, order: serde_json::Value) {
        let order: OrderDetail = serde_json::from_value(order).unwrap();
        self.state.lock().orders.push(order);
    }

    fn script_confirm(&self, order_number: &str, outcomes: &[Scripted]) {
        self.state
            .lock()
            .confirm_script
            .insert(order_number.to_string(), outcomes.to_vec());
    }

    fn confirm_calls(&self) -> Vec<String> {
        self.state.lock().confirm_calls.clone()
    }

    fn set_inventory_calls(&self) -> Vec<(String, u32)> {
        self.state.lock().set_inventory_calls.clone()
    }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn search_orders(
        &self,
        _start: chrono::DateTime<Utc>,
        _end: chrono::DateTime<Utc>,
        _statuses: Option<Vec<i64>>,
    ) -> Result<Vec<String>, PlatformError> {
        Ok(self
            .state
            .lock()
            .orders
            .iter()
            .map(|o| o.order_number.clone())
            .collect())
    }

    async fn get_orders(&self, order_numbers: &[String]) -> Result<Vec<OrderDetail>, PlatformError> {
        Ok(self
            .state
            .lock()
            .orders
            .iter()
            .filter(|o| order_numbers.contains(&o.order_number))
            .cloned()
            .collect())
    }

    async fn confirm_order(&self, order_number: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.confirm_calls.push(order_number.to_string());
        let outcome = state
            .confirm_script
            .get_mut(order_number)
            .and_then(|script| {
                if script.is_empty() {
                    None
                } else {
                    Some(script.remove(0))
                }
            })
            .unwrap_or(Scripted::Succeed);
        match outcome {
            Scripted::Succeed => Ok(()),
            Scripted::Fail(code) => Err(PlatformError::Failure {
                code,
                body: "scripted failure".to_string(),
            }),
        }
    }

    async fn set_inventory(&self, external_sku: &str, quantity: u32) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state
            .set_inventory_calls
            .push((external_sku.to_string(), quantity));
        if let Some(code) = state.set_inventory_fail.get(external_sku) {
            return Err(PlatformError::Failure {
                code: *code,
                body: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn list_inventory_range(
        &self,
        min_quantity: i64,
        _max_quantity: i64,
    ) -> Result<Vec<InventoryRecord>, PlatformError> {
        // All mock rows sit in the first window.
        if min_quantity == 0 {
            Ok(self.state.lock().inventory_rows.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn get_item(&self, manage_number: &str) -> Result<ItemDetail, PlatformError> {
        self.state
            .lock()
            .items
            .get(manage_number)
            .cloned()
            .ok_or(PlatformError::Failure {
                code: 404,
                body: "no such item".to_string(),
            })
    }

    async fn test_auth(&self) -> Result<(bool, Option<i64>), PlatformError> {
        Ok((true, None))
    }
}

struct MockConnector(Arc<MockPlatform>);

impl PlatformConnector for MockConnector {
    fn connect(&self, _store: &Store) -> Result<Arc<dyn PlatformApi>, PlatformError> {
        Ok(self.0.clone())
    }
}

struct Harness {
    store: InventoryStore,
    inventory: InventoryService,
    platform: Arc<MockPlatform>,
    poller: OrderPoller,
    retry: ConfirmRetryQueue,
    sync: PushSynchronizer,
    catalog: SkuCatalogSync,
    store_row: Store,
}

fn harness() -> Harness {
    let store = InventoryStore::open_in_memory().unwrap();
    let inventory = InventoryService::new(store.clone());
    let platform = Arc::new(MockPlatform::default());
    let connector: Arc<dyn PlatformConnector> = Arc::new(MockConnector(platform.clone()));
    let retry = ConfirmRetryQueue::new(store.clone(), inventory.clone(), connector.clone());
    let poller = OrderPoller::new(
        store.clone(),
        inventory.clone(),
        connector.clone(),
        retry.clone(),
    );
    let sync = PushSynchronizer::new(store.clone(), inventory.clone(), connector.clone());
    let catalog = SkuCatalogSync::new(store.clone(), inventory.clone(), connector);

    let store_row = Store::new("S1".into(), "Store One".into(), "platform".into())
        .with_api_config(ApiConfig {
            service_secret: Some("sec".into()),
            license_key: Some("key".into()),
            shop_url: None,
        });
    store
        .with_conn(|conn| rows::insert_store(conn, &store_row))
        .unwrap();

    Harness {
        store,
        inventory,
        platform,
        poller,
        retry,
        sync,
        catalog,
        store_row,
    }
}

fn seed_sku(h: &Harness, sku_id: &str, original: Option<&str>, oversell: bool) {
    h.store
        .with_conn(|conn| {
            rows::insert_sku(
                conn,
                &SkuMaster::new(
                    sku_id.to_string(),
                    original.map(str::to_string),
                    sku_id.to_string(),
                )
                .with_oversell(oversell),
            )
        })
        .unwrap();
}

fn order_json(number: &str, status: &str, lines: serde_json::Value) -> serde_json::Value {
    json!({
        "orderNumber": number,
        "orderStatus": status,
        "orderItemList": { "orderItem": lines }
    })
}

fn api_error_count(h: &Harness) -> usize {
    h.inventory
        .get_events(SYSTEM_ERROR_SKU, Some(EventType::ApiError), 100, 0)
        .unwrap()
        .len()
}

// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_order_applies_event_and_confirms() {
    let h = harness();
    seed_sku(&h, "abc", Some("ABC"), true);
    h.platform.push_order(order_json(
        "O1",
        "100",
        json!({ "skuNumber": "ABC", "quantity": 3 }),
    ));

    let report = h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(report.processed, 1);
    assert!(report.error.is_none());
    assert!(report.failed_confirms.is_empty());

    let snap = h.inventory.get_snapshot("abc").unwrap().unwrap();
    assert_eq!(snap.internal_available, -3);

    let events = h.inventory.get_events("abc", None, 10, 0).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::OrderReceived);
    assert_eq!(events[0].quantity, -3);
    assert_eq!(events[0].token.as_deref(), Some("O1|100|S1"));
    assert_eq!(events[0].order_id.as_deref(), Some("O1"));

    assert_eq!(h.platform.confirm_calls(), vec!["O1".to_string()]);
    let retries = h
        .store
        .with_conn(|conn| rows::retries_for_order(conn, "O1", "S1"))
        .unwrap();
    assert!(retries.is_empty());
}

#[tokio::test]
async fn fresh_order_for_new_sku_without_oversell_rolls_back() {
    let h = harness();
    h.platform.push_order(order_json(
        "O1",
        "100",
        json!({ "skuNumber": "ABC", "quantity": 3 }),
    ));

    let report = h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(report.processed, 0);

    // The batch rolled back: no snapshot, no events, no confirm attempt.
    assert!(h.inventory.get_snapshot("abc").unwrap().is_none());
    assert!(h.inventory.get_events("abc", None, 10, 0).unwrap().is_empty());
    assert!(h.platform.confirm_calls().is_empty());
}

#[tokio::test]
async fn new_sku_is_created_with_observed_spelling() {
    let h = harness();
    h.platform.push_order(order_json(
        "O7",
        "100",
        json!({ "skuNumber": "NEW-Widget", "quantity": 0 }),
    ));

    let report = h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(report.processed, 1);

    let master = h.inventory.get_sku("new-widget").unwrap().unwrap();
    assert_eq!(master.sku_id, "new-widget");
    assert_eq!(master.original_sku.as_deref(), Some("NEW-Widget"));
    assert_eq!(
        h.inventory
            .get_snapshot("NEW-Widget")
            .unwrap()
            .unwrap()
            .internal_available,
        0
    );
}

#[tokio::test]
async fn duplicate_poll_processes_each_order_once() {
    let h = harness();
    seed_sku(&h, "abc", Some("ABC"), true);
    h.platform.push_order(order_json(
        "O1",
        "100",
        json!({ "skuNumber": "ABC", "quantity": 3 }),
    ));

    let first = h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(first.processed, 1);

    let second = h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 1);

    // No new events, no re-confirm, no retry entries.
    assert_eq!(h.inventory.get_events("abc", None, 10, 0).unwrap().len(), 1);
    assert_eq!(h.platform.confirm_calls().len(), 1);
    let retries = h
        .store
        .with_conn(|conn| rows::retries_for_order(conn, "O1", "S1"))
        .unwrap();
    assert!(retries.is_empty());

    // Accumulator law holds over the whole history.
    let sum = h
        .store
        .with_conn(|conn| rows::event_quantity_sum(conn, "abc"))
        .unwrap();
    let snap = h.inventory.get_snapshot("abc").unwrap().unwrap();
    assert_eq!(sum, snap.internal_available);
}

#[tokio::test]
async fn cancel_before_receive_converges_when_oversell_allowed() {
    let h = harness();
    seed_sku(&h, "x", None, true);

    // Cancellation arrives first.
    h.platform.push_order(order_json(
        "O2",
        "900",
        json!({ "skuNumber": "X", "quantity": 2 }),
    ));
    h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(
        h.inventory.get_snapshot("x").unwrap().unwrap().internal_available,
        2
    );

    // The matching receive shows up in a later window.
    h.platform.push_order(order_json(
        "O3",
        "100",
        json!({ "skuNumber": "X", "quantity": 5 }),
    ));
    h.poller.poll_store(&h.store_row, None).await;

    let snap = h.inventory.get_snapshot("x").unwrap().unwrap();
    assert_eq!(snap.internal_available, -3);
}

#[tokio::test]
async fn cancel_before_receive_rejects_when_oversell_forbidden() {
    let h = harness();
    seed_sku(&h, "x", None, false);

    h.platform.push_order(order_json(
        "O2",
        "900",
        json!({ "skuNumber": "X", "quantity": 2 }),
    ));
    h.poller.poll_store(&h.store_row, None).await;

    h.platform.push_order(order_json(
        "O3",
        "100",
        json!({ "skuNumber": "X", "quantity": 5 }),
    ));
    let report = h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(report.processed, 0);

    // The receive was rejected; the cancellation stands.
    let snap = h.inventory.get_snapshot("x").unwrap().unwrap();
    assert_eq!(snap.internal_available, 2);
    assert!(h.platform.confirm_calls().is_empty());
}

#[tokio::test]
async fn confirmed_status_records_zero_quantity_marker() {
    let h = harness();
    seed_sku(&h, "abc", Some("ABC"), true);
    h.platform.push_order(order_json(
        "O1",
        "100",
        json!({ "skuNumber": "ABC", "quantity": 3 }),
    ));
    h.poller.poll_store(&h.store_row, None).await;

    // The platform later reports the same order as confirmed.
    h.platform.push_order(order_json(
        "O1",
        "300",
        json!({ "skuNumber": "ABC", "quantity": 3 }),
    ));
    h.poller.poll_store(&h.store_row, None).await;

    let events = h.inventory.get_events("abc", None, 10, 0).unwrap();
    assert_eq!(events.len(), 2);
    let confirmed = events
        .iter()
        .find(|e| e.event_type == EventType::OrderConfirmed)
        .unwrap();
    assert_eq!(confirmed.quantity, 0);
    assert_eq!(confirmed.token.as_deref(), Some("O1|300|S1"));

    // The marker did not move the accumulator.
    assert_eq!(
        h.inventory.get_snapshot("abc").unwrap().unwrap().internal_available,
        -3
    );
}

#[tokio::test]
async fn failed_confirm_enqueues_one_pending_retry() {
    let h = harness();
    seed_sku(&h, "abc", Some("ABC"), true);
    h.platform.push_order(order_json(
        "O1",
        "100",
        json!({ "skuNumber": "ABC", "quantity": 3 }),
    ));
    h.platform.script_confirm("O1", &[Scripted::Fail(503)]);

    let before = Utc::now().timestamp();
    let report = h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(report.failed_confirms, vec!["O1".to_string()]);

    // Inventory event stands even though the confirm failed.
    assert_eq!(
        h.inventory.get_snapshot("abc").unwrap().unwrap().internal_available,
        -3
    );

    let retries = h
        .store
        .with_conn(|conn| rows::retries_for_order(conn, "O1", "S1"))
        .unwrap();
    assert_eq!(retries.len(), 1);
    let entry = &retries[0];
    assert_eq!(entry.status, RetryStatus::Pending);
    assert_eq!(entry.retry_count, 0);
    assert_eq!(entry.max_retries, 3);
    let delay = entry.next_attempt_at - before;
    assert!((295..=310).contains(&delay), "delay was {}", delay);

    assert_eq!(api_error_count(&h), 1);
}

#[tokio::test]
async fn retry_succeeds_on_third_attempt() {
    let h = harness();
    seed_sku(&h, "abc", Some("ABC"), true);
    h.platform.push_order(order_json(
        "O1",
        "100",
        json!({ "skuNumber": "ABC", "quantity": 3 }),
    ));
    h.platform.script_confirm(
        "O1",
        &[
            Scripted::Fail(503), // at poll time
            Scripted::Fail(503), // first drain
            Scripted::Fail(503), // second drain
            Scripted::Succeed,   // third drain
        ],
    );

    h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(api_error_count(&h), 1);

    let t1 = Utc::now() + Duration::seconds(301);
    let drained = h.retry.drain_at(t1).await.unwrap();
    assert_eq!(drained.total, 1);
    assert_eq!(drained.processed, 0);

    let t2 = t1 + Duration::seconds(121);
    h.retry.drain_at(t2).await.unwrap();

    let retries = h
        .store
        .with_conn(|conn| rows::retries_for_order(conn, "O1", "S1"))
        .unwrap();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].status, RetryStatus::Pending);
    assert_eq!(retries[0].retry_count, 2);
    assert_eq!(retries[0].next_attempt_at, t2.timestamp() + 4 * 60);

    // Three API_ERROR events so far: the poll-time failure and two drains.
    assert_eq!(api_error_count(&h), 3);

    // Not due yet.
    let idle = h.retry.drain_at(t2 + Duration::seconds(30)).await.unwrap();
    assert_eq!(idle.total, 0);

    let t3 = t2 + Duration::seconds(241);
    let last = h.retry.drain_at(t3).await.unwrap();
    assert_eq!(last.processed, 1);

    let retries = h
        .store
        .with_conn(|conn| rows::retries_for_order(conn, "O1", "S1"))
        .unwrap();
    assert!(retries.is_empty());

    // No SYNC_FAILURE anywhere in the trace.
    assert!(h
        .inventory
        .get_events(SYSTEM_ERROR_SKU, Some(EventType::SyncFailure), 100, 0)
        .unwrap()
        .is_empty());
    assert_eq!(h.platform.confirm_calls().len(), 4);
}

#[tokio::test]
async fn retry_exhaustion_goes_terminal() {
    let h = harness();
    seed_sku(&h, "abc", Some("ABC"), true);
    h.platform.push_order(order_json(
        "O1",
        "100",
        json!({ "skuNumber": "ABC", "quantity": 3 }),
    ));
    h.platform.script_confirm(
        "O1",
        &[
            Scripted::Fail(500),
            Scripted::Fail(500),
            Scripted::Fail(500),
            Scripted::Fail(500),
        ],
    );

    h.poller.poll_store(&h.store_row, None).await;

    let mut t = Utc::now() + Duration::seconds(301);
    for _ in 0..3 {
        h.retry.drain_at(t).await.unwrap();
        t = t + Duration::seconds(8 * 60 + 1);
    }

    let retries = h
        .store
        .with_conn(|conn| rows::retries_for_order(conn, "O1", "S1"))
        .unwrap();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].status, RetryStatus::Failed);
    assert_eq!(retries[0].retry_count, 3);

    // Nothing is due any more.
    let idle = h.retry.drain_at(t + Duration::days(1)).await.unwrap();
    assert_eq!(idle.total, 0);

    // One terminal API_ERROR summarizing the failure.
    let events = h
        .inventory
        .get_events(SYSTEM_ERROR_SKU, Some(EventType::ApiError), 100, 0)
        .unwrap();
    let terminal: Vec<_> = events
        .iter()
        .filter(|e| {
            e.reason
                .as_deref()
                .is_some_and(|r| r.contains("failed after 3 retries"))
        })
        .collect();
    assert_eq!(terminal.len(), 1);
}

#[tokio::test]
async fn push_clamps_negative_stock_to_zero() {
    let h = harness();
    seed_sku(&h, "x-raw", Some("X-RAW"), true);
    h.inventory.register_sku_to_store("x-raw", "S1").unwrap();

    h.platform.push_order(order_json(
        "O5",
        "100",
        json!({ "skuNumber": "X-RAW", "quantity": 3 }),
    ));
    h.poller.poll_store(&h.store_row, None).await;
    assert_eq!(
        h.inventory
            .get_snapshot("x-raw")
            .unwrap()
            .unwrap()
            .internal_available,
        -3
    );

    let outcome = h.sync.sync_sku_to_store("X-RAW", "S1").await;
    assert!(outcome.success);
    assert_eq!(outcome.sku_id, "x-raw");
    assert_eq!(outcome.platform_quantity, Some(0));
    assert_eq!(outcome.external_sku.as_deref(), Some("X-RAW"));
    assert_eq!(
        h.platform.set_inventory_calls(),
        vec![("X-RAW".to_string(), 0)]
    );
}

#[tokio::test]
async fn sync_store_fans_out_and_aggregates_failures() {
    let h = harness();
    seed_sku(&h, "a", Some("A"), true);
    seed_sku(&h, "b", Some("B"), true);
    h.inventory.register_sku_to_store("a", "S1").unwrap();
    h.inventory.register_sku_to_store("b", "S1").unwrap();
    h.inventory
        .create_event(EventDraft::new(
            EventType::StockIn,
            "a",
            5,
            "tester",
            EventSource::Manual,
        ))
        .unwrap();
    h.inventory
        .create_event(EventDraft::new(
            EventType::StockIn,
            "b",
            7,
            "tester",
            EventSource::Manual,
        ))
        .unwrap();
    h.platform
        .state
        .lock()
        .set_inventory_fail
        .insert("B".to_string(), 500);

    let report = h.sync.sync_store("S1").await;
    assert_eq!(report.total, 2);
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].sku_id, "b");

    // The push failure left a SYNC_FAILURE event on the SKU.
    let failures = h
        .inventory
        .get_events("b", Some(EventType::SyncFailure), 10, 0)
        .unwrap();
    assert_eq!(failures.len(), 1);

    // Idempotent re-run with the failure cleared.
    h.platform.state.lock().set_inventory_fail.clear();
    let again = h.sync.sync_store("S1").await;
    assert_eq!(again.synced, 2);
    assert!(again.failed.is_empty());
}

#[tokio::test]
async fn catalog_sync_imports_platform_skus() {
    let h = harness();
    {
        let mut state = h.platform.state.lock();
        state.inventory_rows = vec![
            InventoryRecord {
                manage_number: "mgmt-1".into(),
                variant_id: "VAR-1".into(),
                quantity: Some(4),
            },
            // Duplicate variant collapses.
            InventoryRecord {
                manage_number: "mgmt-1".into(),
                variant_id: "VAR-1".into(),
                quantity: Some(4),
            },
            // No manage number: skipped.
            InventoryRecord {
                manage_number: "".into(),
                variant_id: "VAR-2".into(),
                quantity: None,
            },
        ];
        state.items.insert(
            "mgmt-1".into(),
            ItemDetail {
                item_name: "Imported Widget".into(),
                item_url: Some("https://shop.example/items/mgmt-1".into()),
                image_url: None,
                medium_image_url: Some("https://img.example/m.png".into()),
                item_price: Some(1200.0),
            },
        );
    }

    let report = h.catalog.sync_store_skus("S1").await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(report.errors.is_empty());
    assert!(report.error.is_none());

    let master = h.inventory.get_sku("var-1").unwrap().unwrap();
    assert_eq!(master.sku_name, "Imported Widget");
    assert_eq!(master.aliases.get("platform").unwrap(), "VAR-1");
    assert_eq!(
        master.extra_data.get("manage_number").unwrap(),
        &json!("mgmt-1")
    );
    assert_eq!(
        master.extra_data.get("image_url").unwrap(),
        &json!("https://img.example/m.png")
    );

    assert_eq!(
        h.inventory.get_registered_stores("VAR-1").unwrap(),
        vec!["S1".to_string()]
    );

    let store_row = h.inventory.get_store("S1").unwrap().unwrap();
    assert!(store_row.last_sku_sync_at.is_some());
}

#[tokio::test]
async fn poll_all_stores_drains_retry_queue_once() {
    let h = harness();
    seed_sku(&h, "abc", Some("ABC"), true);
    h.platform.push_order(order_json(
        "O1",
        "100",
        json!({ "skuNumber": "ABC", "quantity": 1 }),
    ));

    let summary = h.poller.poll_all_stores().await;
    assert_eq!(summary.stores_polled, 1);
    assert_eq!(summary.total_processed, 1);
    assert!(summary.errors.is_empty());
    // Fresh queue: nothing was due.
    assert_eq!(summary.retry.total, 0);
}
