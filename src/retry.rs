//! Durable retry queue for platform-side order confirms.
//!
//! An entry is born when a new order's inventory events committed but the
//! confirm call failed. The drain re-attempts due entries with exponential
//! backoff (2^n minutes) and terminates each entry either by deletion
//! (confirm succeeded) or a `failed` status with a summary event.

use crate::error::{InventoryError, InventoryResult, PlatformError};
use crate::inventory::InventoryService;
use crate::models::{RetryEntry, RetryStatus};
use crate::platform::{PlatformApi, PlatformConnector};
use crate::store::{self, InventoryStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MAX_CONFIRM_RETRIES: i64 = 3;
pub const INITIAL_RETRY_DELAY_SECS: i64 = 5 * 60;

/// Wait before attempt number `retry_count`: 2^n minutes (2m, 4m, 8m).
pub fn backoff_delay_secs(retry_count: i64) -> i64 {
    60 * (1i64 << retry_count.clamp(0, 16))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryDrainReport {
    pub total: usize,
    pub processed: usize,
    pub failed: Vec<String>,
}

#[derive(Clone)]
pub struct ConfirmRetryQueue {
    store: InventoryStore,
    inventory: InventoryService,
    connector: Arc<dyn PlatformConnector>,
}

impl ConfirmRetryQueue {
    pub fn new(
        store: InventoryStore,
        inventory: InventoryService,
        connector: Arc<dyn PlatformConnector>,
    ) -> Self {
        Self {
            store,
            inventory,
            connector,
        }
    }

    /// Queue a failed confirm for re-attempt. No-op when a pending entry for
    /// this (order_number, store_id) already exists; the partial unique
    /// index backstops the check against concurrent enqueuers.
    pub fn enqueue(
        &self,
        order_number: &str,
        store_id: &str,
        error_message: &str,
        line_item: Value,
    ) -> InventoryResult<bool> {
        let now = Utc::now().timestamp();
        let entry = RetryEntry {
            retry_id: Uuid::new_v4(),
            order_number: order_number.to_string(),
            store_id: store_id.to_string(),
            retry_count: 0,
            max_retries: MAX_CONFIRM_RETRIES,
            last_error: Some(error_message.to_string()),
            last_attempt_at: Some(now),
            next_attempt_at: now + INITIAL_RETRY_DELAY_SECS,
            status: RetryStatus::Pending,
            metadata: json!({ "item": line_item }),
            created_at: now,
        };

        let inserted = self.store.with_tx(|conn| {
            if store::pending_retry_exists(conn, order_number, store_id)? {
                return Ok(false);
            }
            match store::insert_retry(conn, &entry) {
                Ok(()) => Ok(true),
                Err(InventoryError::DuplicateToken(_)) => Ok(false),
                Err(e) => Err(e),
            }
        })?;

        if inserted {
            info!(order_number, store_id, "Order added to confirm retry queue");
        }
        Ok(inserted)
    }

    /// Re-attempt every due entry once.
    pub async fn drain(&self) -> InventoryResult<RetryDrainReport> {
        self.drain_at(Utc::now()).await
    }

    /// Drain with an explicit clock; scheduling math uses `now` so tests can
    /// step through the backoff sequence.
    pub async fn drain_at(&self, now: DateTime<Utc>) -> InventoryResult<RetryDrainReport> {
        let now_unix = now.timestamp();
        let due = self
            .store
            .with_conn(|conn| store::due_retries(conn, now_unix))?;

        let mut report = RetryDrainReport {
            total: due.len(),
            ..Default::default()
        };

        for entry in due {
            let store_row = self
                .store
                .with_conn(|conn| store::get_store(conn, &entry.store_id))?;

            let client = match store_row {
                Some(ref row) => match self.connector.connect(row) {
                    Ok(client) => client,
                    Err(_) => {
                        warn!(
                            order_number = %entry.order_number,
                            store_id = %entry.store_id,
                            "Retry store unconfigured, marking failed"
                        );
                        self.store
                            .with_conn(|conn| store::mark_retry_failed(conn, entry.retry_id))?;
                        report.failed.push(entry.order_number.clone());
                        continue;
                    }
                },
                None => {
                    warn!(
                        order_number = %entry.order_number,
                        store_id = %entry.store_id,
                        "Retry store missing, marking failed"
                    );
                    self.store
                        .with_conn(|conn| store::mark_retry_failed(conn, entry.retry_id))?;
                    report.failed.push(entry.order_number.clone());
                    continue;
                }
            };

            match client.confirm_order(&entry.order_number).await {
                Ok(()) => {
                    info!(
                        order_number = %entry.order_number,
                        attempt = entry.retry_count + 1,
                        "Confirm retry succeeded"
                    );
                    self.store
                        .with_conn(|conn| store::delete_retry(conn, entry.retry_id))?;
                    report.processed += 1;
                }
                Err(e) => {
                    let terminal = self.record_failure(&entry, &e, now_unix)?;
                    if terminal {
                        report.failed.push(entry.order_number.clone());
                    }
                }
            }
        }

        Ok(report)
    }

    /// Record one failed attempt; returns true when the entry went terminal.
    fn record_failure(
        &self,
        entry: &RetryEntry,
        err: &PlatformError,
        now_unix: i64,
    ) -> InventoryResult<bool> {
        let new_count = entry.retry_count + 1;
        let message = err.to_string();

        if new_count >= entry.max_retries {
            self.store.with_conn(|conn| {
                store::update_retry_attempt(
                    conn,
                    entry.retry_id,
                    new_count,
                    &message,
                    now_unix,
                    entry.next_attempt_at,
                    RetryStatus::Failed,
                )
            })?;
            error!(
                order_number = %entry.order_number,
                retries = entry.max_retries,
                "Order confirm failed permanently"
            );
            self.inventory.log_api_error(
                &format!(
                    "Order confirm failed after {} retries: {}",
                    entry.max_retries, message
                ),
                "confirm_order",
                Some(&entry.store_id),
                None,
                json!({
                    "order_number": entry.order_number,
                    "retry_count": new_count,
                    "error_code": err.status_code(),
                    "last_error": message,
                }),
            )?;
            return Ok(true);
        }

        let next_attempt_at = now_unix + backoff_delay_secs(new_count);
        self.store.with_conn(|conn| {
            store::update_retry_attempt(
                conn,
                entry.retry_id,
                new_count,
                &message,
                now_unix,
                next_attempt_at,
                RetryStatus::Pending,
            )
        })?;
        info!(
            order_number = %entry.order_number,
            attempt = new_count,
            max = entry.max_retries,
            wait_minutes = backoff_delay_secs(new_count) / 60,
            "Order confirm will retry"
        );
        self.inventory.log_api_error(
            &message,
            "confirm_order_retry",
            Some(&entry.store_id),
            None,
            json!({
                "order_number": entry.order_number,
                "retry_count": new_count,
                "error_code": err.status_code(),
            }),
        )?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay_secs(1), 2 * 60);
        assert_eq!(backoff_delay_secs(2), 4 * 60);
        assert_eq!(backoff_delay_secs(3), 8 * 60);
    }

    #[test]
    fn backoff_is_bounded() {
        // Pathological counts must not shift past the integer width.
        assert_eq!(backoff_delay_secs(64), 60 * (1 << 16));
        assert_eq!(backoff_delay_secs(-3), 60);
    }
}
