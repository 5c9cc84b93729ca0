//! Order polling: time-windowed pull of platform orders, state-driven
//! application to the inventory log, and platform-side confirmation.
//!
//! Each batch of order details is applied inside one transaction; any error
//! while applying an order rolls the whole batch back and polling continues
//! with the next batch. Confirms run after the batch committed so no
//! transaction ever spans a platform call; a failed confirm lands in the
//! retry queue.

use crate::error::{InventoryError, InventoryResult};
use crate::inventory::InventoryService;
use crate::models::{
    Environment, EventDraft, EventSource, EventType, Store, PLATFORM_TYPE,
};
use crate::platform::types::OrderDetail;
use crate::platform::{PlatformApi, PlatformConnector};
use crate::retry::{ConfirmRetryQueue, RetryDrainReport};
use crate::store::{self, InventoryStore};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const ORDER_BATCH_SIZE: usize = 100;
pub const DEFAULT_WINDOW_HOURS: i64 = 2;

/// Platform order status codes the poller acts on.
pub const STATUS_NEW: &str = "100";
pub const STATUS_CONFIRMED: &str = "300";
pub const STATUS_CANCELLED: &str = "900";

/// Deterministic replay-protection token for one platform order sighting.
pub fn order_dedup_token(order_number: &str, platform_status: &str, store_id: &str) -> String {
    format!("{}|{}|{}", order_number, platform_status, store_id)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorePollReport {
    pub store_id: String,
    pub processed: usize,
    pub skipped: usize,
    pub failed_confirms: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollSummary {
    pub stores_polled: usize,
    pub total_processed: usize,
    pub errors: Vec<(String, String)>,
    pub retry: RetryDrainReport,
}

/// What one applied batch left to do after commit.
#[derive(Default)]
struct BatchOutcome {
    processed: usize,
    skipped: usize,
    to_confirm: Vec<(String, serde_json::Value)>,
}

enum OrderOutcome {
    /// New order applied; confirm it after commit, metadata in hand for a
    /// possible retry entry.
    Received(serde_json::Value),
    Applied,
    Skipped,
}

#[derive(Clone)]
pub struct OrderPoller {
    store: InventoryStore,
    inventory: InventoryService,
    connector: Arc<dyn PlatformConnector>,
    retry_queue: ConfirmRetryQueue,
}

impl OrderPoller {
    pub fn new(
        store: InventoryStore,
        inventory: InventoryService,
        connector: Arc<dyn PlatformConnector>,
        retry_queue: ConfirmRetryQueue,
    ) -> Self {
        Self {
            store,
            inventory,
            connector,
            retry_queue,
        }
    }

    /// One polling cycle for one store. Window defaults to the last two
    /// hours. Never raises; every failure ends up in the report and the
    /// event log.
    pub async fn poll_store(
        &self,
        store_row: &Store,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> StorePollReport {
        let mut report = StorePollReport {
            store_id: store_row.store_id.clone(),
            ..Default::default()
        };

        let (start, end) = window.unwrap_or_else(|| {
            let end = Utc::now();
            (end - Duration::hours(DEFAULT_WINDOW_HOURS), end)
        });

        let client = match self.connector.connect(store_row) {
            Ok(client) => client,
            Err(e) => {
                warn!(store_id = %store_row.store_id, "Skipping poll: {}", e);
                report.error = Some(e.to_string());
                return report;
            }
        };

        let order_numbers = match client.search_orders(start, end, None).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(store_id = %store_row.store_id, "Order search failed: {}", e);
                let _ = self.inventory.log_api_error(
                    &e.to_string(),
                    "search_order",
                    Some(&store_row.store_id),
                    None,
                    json!({
                        "start_time": start.to_rfc3339(),
                        "end_time": end.to_rfc3339(),
                        "error_code": e.status_code(),
                    }),
                );
                report.error = Some(e.to_string());
                return report;
            }
        };

        info!(
            store_id = %store_row.store_id,
            found = order_numbers.len(),
            "Order search complete"
        );
        if order_numbers.is_empty() {
            return report;
        }

        for batch in order_numbers.chunks(ORDER_BATCH_SIZE) {
            let orders = match client.get_orders(batch).await {
                Ok(orders) => orders,
                Err(e) => {
                    error!(store_id = %store_row.store_id, "Order fetch failed: {}", e);
                    let _ = self.inventory.log_api_error(
                        &e.to_string(),
                        "get_order",
                        Some(&store_row.store_id),
                        None,
                        json!({
                            "batch": batch.iter().take(5).collect::<Vec<_>>(),
                            "batch_size": batch.len(),
                            "error_code": e.status_code(),
                        }),
                    );
                    continue;
                }
            };

            let applied = self.store.with_tx(|conn| {
                let mut outcome = BatchOutcome::default();
                for order in &orders {
                    match self.apply_order(conn, order, &store_row.store_id)? {
                        OrderOutcome::Received(line) => {
                            outcome.processed += 1;
                            outcome.to_confirm.push((order.order_number.clone(), line));
                        }
                        OrderOutcome::Applied => outcome.processed += 1,
                        OrderOutcome::Skipped => outcome.skipped += 1,
                    }
                }
                Ok(outcome)
            });

            let outcome = match applied {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        store_id = %store_row.store_id,
                        "Order batch rolled back: {}",
                        e
                    );
                    let _ = self.inventory.log_api_error(
                        &e.to_string(),
                        "process_order_batch",
                        Some(&store_row.store_id),
                        None,
                        json!({ "batch_size": batch.len() }),
                    );
                    continue;
                }
            };

            report.processed += outcome.processed;
            report.skipped += outcome.skipped;

            for (order_number, line) in outcome.to_confirm {
                match client.confirm_order(&order_number).await {
                    Ok(()) => {
                        info!(order_number = %order_number, "Order confirmed");
                    }
                    Err(e) => {
                        error!(order_number = %order_number, "Order confirm failed: {}", e);
                        let _ = self.inventory.log_api_error(
                            &e.to_string(),
                            "confirm_order",
                            Some(&store_row.store_id),
                            None,
                            json!({
                                "order_number": order_number,
                                "error_code": e.status_code(),
                            }),
                        );
                        let _ = self.retry_queue.enqueue(
                            &order_number,
                            &store_row.store_id,
                            &e.to_string(),
                            line,
                        );
                        report.failed_confirms.push(order_number);
                    }
                }
            }
        }

        report
    }

    /// Apply one order inside the batch transaction. Returns what is left
    /// to do after commit; an error aborts the whole batch.
    fn apply_order(
        &self,
        conn: &Connection,
        order: &OrderDetail,
        store_id: &str,
    ) -> InventoryResult<OrderOutcome> {
        let token = order_dedup_token(&order.order_number, &order.order_status, store_id);

        if store::get_event_by_token(conn, &token)?.is_some() {
            warn!(
                order_number = %order.order_number,
                status = %order.order_status,
                store_id,
                "Duplicate order skipped"
            );
            return Ok(OrderOutcome::Skipped);
        }

        let (event_type, sign, reason) = match order.order_status.as_str() {
            STATUS_NEW => (EventType::OrderReceived, -1, "platform new order"),
            STATUS_CONFIRMED => (EventType::OrderConfirmed, 0, "platform order confirmed"),
            STATUS_CANCELLED => (EventType::OrderCancelled, 1, "platform order cancelled"),
            other => {
                debug!(
                    order_number = %order.order_number,
                    status = other,
                    "Ignoring order status"
                );
                return Ok(OrderOutcome::Skipped);
            }
        };

        let mut applied_line = None;
        for line in order.lines() {
            let Some(raw_sku) = line.raw_sku() else {
                debug!(order_number = %order.order_number, "Line without SKU skipped");
                continue;
            };

            if event_type == EventType::OrderReceived {
                self.inventory.get_or_create_sku_in(
                    conn,
                    raw_sku,
                    Some(raw_sku),
                    None,
                    Environment::Prod,
                )?;
            }

            let draft = EventDraft::new(
                event_type,
                raw_sku,
                sign * line.quantity,
                "system",
                EventSource::Api,
            )
            .with_store(store_id)
            .with_order(order.order_number.clone(), order.order_status.clone())
            .with_reason(reason)
            .with_metadata(json!({ "item": line }))
            .with_token(token.clone());

            match self.inventory.create_event_in(conn, draft) {
                Ok(_) => {
                    if applied_line.is_none() {
                        applied_line = Some(json!(line));
                    }
                }
                // The dedup token is shared by every line of the sighting;
                // later lines collapse into the first application.
                Err(InventoryError::DuplicateToken(_)) => {
                    debug!(
                        order_number = %order.order_number,
                        "Additional line collapsed into dedup token"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        match applied_line {
            Some(line) if event_type == EventType::OrderReceived => {
                Ok(OrderOutcome::Received(line))
            }
            Some(_) => Ok(OrderOutcome::Applied),
            None => {
                warn!(
                    order_number = %order.order_number,
                    status = %order.order_status,
                    "Order carried no usable lines"
                );
                Ok(OrderOutcome::Skipped)
            }
        }
    }

    /// Poll every active platform store serially, then drain the confirm
    /// retry queue once.
    pub async fn poll_all_stores(&self) -> PollSummary {
        let mut summary = PollSummary::default();

        let stores = match self
            .store
            .with_conn(|conn| store::list_active_stores(conn, PLATFORM_TYPE))
        {
            Ok(stores) => stores,
            Err(e) => {
                error!("Failed to list active stores: {}", e);
                summary.errors.push(("-".to_string(), e.to_string()));
                return summary;
            }
        };

        summary.stores_polled = stores.len();
        for store_row in &stores {
            let report = self.poll_store(store_row, None).await;
            summary.total_processed += report.processed;
            if let Some(error) = report.error {
                summary.errors.push((report.store_id, error));
            }
        }

        match self.retry_queue.drain().await {
            Ok(retry) => summary.retry = retry,
            Err(e) => {
                error!("Retry queue drain failed: {}", e);
                summary.errors.push(("retry-queue".to_string(), e.to_string()));
            }
        }

        summary
    }

    /// Drain the confirm retry queue once (also exposed to the scheduler).
    pub async fn process_retry_queue(&self) -> InventoryResult<RetryDrainReport> {
        self.retry_queue.drain().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_token_shape() {
        assert_eq!(order_dedup_token("O1", "100", "S1"), "O1|100|S1");
        assert_eq!(order_dedup_token("O1", "900", "S1"), "O1|900|S1");
    }
}
