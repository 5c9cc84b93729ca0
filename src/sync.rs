//! Push synchronizer: current snapshots → platform set-inventory, fanned out
//! per store with bounded parallelism.
//!
//! The platform cannot represent negative stock, so pushed quantities clamp
//! at zero; the truth of oversell stays internal. Every operation returns an
//! outcome record instead of raising.

use crate::error::InventoryError;
use crate::inventory::InventoryService;
use crate::platform::{PlatformApi, PlatformConnector};
use crate::sku;
use crate::store::{self, InventoryStore};
use futures_util::{stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Concurrent platform calls per fan-out.
pub const SYNC_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub sku_id: String,
    pub store_id: String,
    pub success: bool,
    pub external_sku: Option<String>,
    pub platform_quantity: Option<u32>,
    pub error: Option<String>,
}

impl SyncOutcome {
    fn failure(sku_id: &str, store_id: &str, error: impl Into<String>) -> Self {
        Self {
            sku_id: sku_id.to_string(),
            store_id: store_id.to_string(),
            success: false,
            external_sku: None,
            platform_quantity: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSyncReport {
    pub store_id: String,
    pub total: usize,
    pub synced: usize,
    pub failed: Vec<SyncOutcome>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SkuSyncReport {
    pub sku_id: String,
    pub total: usize,
    pub synced: usize,
    pub stores: Vec<String>,
    pub failed: Vec<SyncOutcome>,
}

#[derive(Clone)]
pub struct PushSynchronizer {
    store: InventoryStore,
    inventory: InventoryService,
    connector: Arc<dyn PlatformConnector>,
}

impl PushSynchronizer {
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

    /// Push one SKU's snapshot to one store.
    pub async fn sync_sku_to_store(&self, sku_id: &str, store_id: &str) -> SyncOutcome {
        let canonical = sku::normalize(sku_id);

        let store_row = match self
            .store
            .with_conn(|conn| store::get_store(conn, store_id))
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                return SyncOutcome::failure(
                    &canonical,
                    store_id,
                    InventoryError::StoreNotFound(store_id.to_string()).to_string(),
                )
            }
            Err(e) => return SyncOutcome::failure(&canonical, store_id, e.to_string()),
        };

        let snapshot = match self
            .store
            .with_conn(|conn| store::get_snapshot(conn, &canonical))
        {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return SyncOutcome::failure(&canonical, store_id, "snapshot not found"),
            Err(e) => return SyncOutcome::failure(&canonical, store_id, e.to_string()),
        };

        let master = match self.store.with_conn(|conn| store::get_sku(conn, &canonical)) {
            Ok(Some(master)) => master,
            Ok(None) => {
                return SyncOutcome::failure(
                    &canonical,
                    store_id,
                    InventoryError::SkuNotFound(canonical.clone()).to_string(),
                )
            }
            Err(e) => return SyncOutcome::failure(&canonical, store_id, e.to_string()),
        };

        let client = match self.connector.connect(&store_row) {
            Ok(client) => client,
            Err(e) => {
                debug!(sku_id = %canonical, store_id, "Push skipped: {}", e);
                return SyncOutcome::failure(&canonical, store_id, e.to_string());
            }
        };

        let platform_quantity = snapshot.platform_quantity();
        let external_sku = master.external_sku().to_string();

        match client.set_inventory(&external_sku, platform_quantity).await {
            Ok(()) => {
                info!(
                    sku_id = %canonical,
                    store_id,
                    external_sku = %external_sku,
                    quantity = platform_quantity,
                    "Inventory pushed"
                );
                SyncOutcome {
                    sku_id: canonical,
                    store_id: store_id.to_string(),
                    success: true,
                    external_sku: Some(external_sku),
                    platform_quantity: Some(platform_quantity),
                    error: None,
                }
            }
            Err(e) => {
                error!(sku_id = %canonical, store_id, "Inventory push failed: {}", e);
                let _ = self.inventory.log_sync_failure(
                    &e.to_string(),
                    &canonical,
                    Some(store_id),
                    json!({
                        "external_sku": external_sku,
                        "quantity": platform_quantity,
                        "error_code": e.status_code(),
                    }),
                );
                SyncOutcome {
                    sku_id: canonical,
                    store_id: store_id.to_string(),
                    success: false,
                    external_sku: Some(external_sku),
                    platform_quantity: Some(platform_quantity),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Push every SKU registered to a store.
    pub async fn sync_store(&self, store_id: &str) -> StoreSyncReport {
        let sku_ids = match self
            .store
            .with_conn(|conn| store::sku_ids_for_store(conn, store_id))
        {
            Ok(ids) => ids,
            Err(e) => {
                error!(store_id, "Failed to list store SKUs: {}", e);
                return StoreSyncReport {
                    store_id: store_id.to_string(),
                    ..Default::default()
                };
            }
        };

        let total = sku_ids.len();
        let outcomes: Vec<SyncOutcome> = stream::iter(sku_ids)
            .map(|sku_id| async move { self.sync_sku_to_store(&sku_id, store_id).await })
            .buffer_unordered(SYNC_CONCURRENCY)
            .collect()
            .await;

        let mut report = StoreSyncReport {
            store_id: store_id.to_string(),
            total,
            ..Default::default()
        };
        for outcome in outcomes {
            if outcome.success {
                report.synced += 1;
            } else {
                report.failed.push(outcome);
            }
        }
        info!(
            store_id,
            total = report.total,
            synced = report.synced,
            failed = report.failed.len(),
            "Store push complete"
        );
        report
    }

    /// Push one SKU to every store it is registered on.
    pub async fn sync_sku_to_all_stores(&self, sku_id: &str) -> SkuSyncReport {
        let canonical = sku::normalize(sku_id);

        let store_ids = match self
            .store
            .with_conn(|conn| store::store_ids_for_sku(conn, &canonical))
        {
            Ok(ids) => ids,
            Err(e) => {
                error!(sku_id = %canonical, "Failed to list registered stores: {}", e);
                return SkuSyncReport {
                    sku_id: canonical,
                    ..Default::default()
                };
            }
        };

        let total = store_ids.len();
        let outcomes: Vec<SyncOutcome> = stream::iter(store_ids)
            .map(|store_id| {
                let sku = canonical.clone();
                async move { self.sync_sku_to_store(&sku, &store_id).await }
            })
            .buffer_unordered(SYNC_CONCURRENCY)
            .collect()
            .await;

        let mut report = SkuSyncReport {
            sku_id: canonical,
            total,
            ..Default::default()
        };
        for outcome in outcomes {
            if outcome.success {
                report.synced += 1;
                report.stores.push(outcome.store_id);
            } else {
                report.failed.push(outcome);
            }
        }
        report
    }
}
