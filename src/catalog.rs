//! SKU catalog sync: walk the platform's inventory in quantity windows,
//! pull item details, and upsert SKU master rows plus their store
//! membership. This is how a store's sellable catalog first lands in the
//! SKU master.

use crate::error::{InventoryError, InventoryResult};
use crate::inventory::InventoryService;
use crate::models::{Environment, Store};
use crate::platform::types::InventoryRecord;
use crate::platform::{PlatformApi, PlatformConnector};
use crate::sku;
use crate::store::{self, InventoryStore};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Quantity window walked per range request.
pub const INVENTORY_RANGE_STEP: i64 = 1000;
pub const INVENTORY_RANGE_MAX: i64 = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSyncError {
    pub sku_id: String,
    pub manage_number: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogSyncReport {
    pub store_id: String,
    pub synced: usize,
    pub errors: Vec<CatalogSyncError>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct SkuCatalogSync {
    store: InventoryStore,
    inventory: InventoryService,
    connector: Arc<dyn PlatformConnector>,
}

impl SkuCatalogSync {
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

    /// Import the store's platform catalog. Range and item failures are
    /// logged and skipped; the report carries what happened. Finishes by
    /// stamping the store's `last_sku_sync_at`.
    pub async fn sync_store_skus(&self, store_id: &str) -> InventoryResult<CatalogSyncReport> {
        let mut report = CatalogSyncReport {
            store_id: store_id.to_string(),
            ..Default::default()
        };

        let store_row: Option<Store> = self
            .store
            .with_conn(|conn| store::get_store(conn, store_id))?;
        let Some(store_row) = store_row else {
            report.error = Some(InventoryError::StoreNotFound(store_id.to_string()).to_string());
            return Ok(report);
        };

        let client = match self.connector.connect(&store_row) {
            Ok(client) => client,
            Err(e) => {
                warn!(store_id, "Catalog sync skipped: {}", e);
                report.error = Some(e.to_string());
                return Ok(report);
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut min_quantity = 0i64;

        while min_quantity <= INVENTORY_RANGE_MAX {
            let max_quantity = (min_quantity + INVENTORY_RANGE_STEP - 1).min(INVENTORY_RANGE_MAX);

            let inventories = match client
                .list_inventory_range(min_quantity, max_quantity)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    error!(
                        store_id,
                        min_quantity, max_quantity, "Inventory range fetch failed: {}", e
                    );
                    let _ = self.inventory.log_api_error(
                        &e.to_string(),
                        "get_inventory_range",
                        Some(store_id),
                        None,
                        json!({
                            "min_quantity": min_quantity,
                            "max_quantity": max_quantity,
                            "error_code": e.status_code(),
                        }),
                    );
                    if e.is_credential() {
                        report.error = Some(e.to_string());
                        break;
                    }
                    min_quantity += INVENTORY_RANGE_STEP;
                    continue;
                }
            };

            for record in inventories {
                if record.manage_number.is_empty() {
                    continue;
                }
                let sku_id = sku::normalize(&record.variant_id);
                if sku_id.is_empty() || !seen.insert(sku_id.clone()) {
                    continue;
                }

                match self
                    .import_record(client.as_ref(), store_id, &sku_id, &record)
                    .await
                {
                    Ok(true) => report.synced += 1,
                    Ok(false) => {}
                    Err(e) => report.errors.push(CatalogSyncError {
                        sku_id,
                        manage_number: record.manage_number.clone(),
                        error: e.to_string(),
                    }),
                }
            }

            min_quantity += INVENTORY_RANGE_STEP;
        }

        self.store
            .with_conn(|conn| store::set_store_synced_at(conn, store_id, Utc::now()))?;

        info!(
            store_id,
            synced = report.synced,
            errors = report.errors.len(),
            "Catalog sync complete"
        );
        Ok(report)
    }

    /// Pull one item's details and fold them into the SKU master. Item
    /// failures are logged and reported as skipped, not raised.
    async fn import_record(
        &self,
        client: &dyn PlatformApi,
        store_id: &str,
        sku_id: &str,
        record: &InventoryRecord,
    ) -> InventoryResult<bool> {
        let item = match client.get_item(&record.manage_number).await {
            Ok(item) => item,
            Err(e) => {
                warn!(
                    manage_number = %record.manage_number,
                    "Item detail fetch failed: {}",
                    e
                );
                self.inventory.log_api_error(
                    &e.to_string(),
                    "get_item_details",
                    Some(store_id),
                    Some(sku_id),
                    json!({
                        "manage_number": record.manage_number,
                        "error_code": e.status_code(),
                    }),
                )?;
                return Ok(false);
            }
        };

        self.inventory.get_or_create_sku(
            sku_id,
            Some(&record.variant_id),
            Some(&item.item_name),
            Environment::Prod,
        )?;

        let mut extra: HashMap<String, serde_json::Value> = HashMap::new();
        extra.insert("item_name".into(), json!(item.item_name));
        extra.insert("item_url".into(), json!(item.item_url));
        extra.insert("image_url".into(), json!(item.image()));
        extra.insert("item_price".into(), json!(item.item_price));
        extra.insert("manage_number".into(), json!(record.manage_number));

        self.inventory
            .update_catalog_info(sku_id, &item.item_name, extra, &record.variant_id)?;
        self.inventory.register_sku_to_store(sku_id, store_id)?;

        Ok(true)
    }
}
