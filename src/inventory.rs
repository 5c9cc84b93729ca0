//! Inventory service: the sole writer of events, snapshots, SKU masters and
//! store-SKU links.
//!
//! Event append and snapshot update happen in one transaction; the oversell
//! check aborts both. Token uniqueness at the storage layer is the dedup
//! primitive: callers interpret `DuplicateToken` as "already applied".

use crate::error::{InventoryError, InventoryResult};
use crate::models::{
    Environment, EventDraft, EventSource, EventType, InventoryEvent, InventorySnapshot,
    RecordStatus, SkuMaster, Store, StoreSku, StoreSkuView, SYSTEM_ERROR_SKU,
};
use crate::sku;
use crate::store::{self, InventoryStore};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct InventoryService {
    store: InventoryStore,
}

impl InventoryService {
    pub fn new(store: InventoryStore) -> Self {
        Self { store }
    }

    /// Append an event, atomically with its snapshot effect.
    ///
    /// The draft's `sku_id` is normalized; a missing token is replaced with
    /// a random 64-hex one. When `update_snapshot` is set and the event type
    /// is stock-altering, the snapshot accumulator moves by `quantity`; a
    /// move below zero for a SKU with `allow_oversell = false` fails with
    /// [`InventoryError::Oversell`] and nothing is written.
    pub fn create_event(&self, draft: EventDraft) -> InventoryResult<InventoryEvent> {
        self.store.with_tx(|conn| self.create_event_in(conn, draft))
    }

    /// Transaction-scoped variant used by the order poller to apply a whole
    /// batch atomically.
    pub(crate) fn create_event_in(
        &self,
        conn: &Connection,
        draft: EventDraft,
    ) -> InventoryResult<InventoryEvent> {
        let sku_id = sku::normalize(&draft.sku_id);
        let token = draft.token.unwrap_or_else(sku::generate_token);

        let event = InventoryEvent {
            event_id: Uuid::new_v4(),
            event_type: draft.event_type,
            sku_id,
            quantity: draft.quantity,
            store_id: draft.store_id,
            platform_status: draft.platform_status,
            order_id: draft.order_id,
            operator: draft.operator,
            reason: draft.reason,
            source: draft.source,
            token: Some(token),
            metadata: draft.metadata,
            created_at: Utc::now(),
        };

        store::insert_event(conn, &event)?;

        if draft.update_snapshot && event.event_type.is_stock_altering() {
            self.apply_to_snapshot(conn, &event)?;
        }

        Ok(event)
    }

    fn apply_to_snapshot(&self, conn: &Connection, event: &InventoryEvent) -> InventoryResult<()> {
        let current = store::get_snapshot(conn, &event.sku_id)?
            .map(|s| s.internal_available)
            .unwrap_or(0);
        let new_quantity = current + event.quantity;

        if new_quantity < 0 {
            let allow_oversell = store::get_sku(conn, &event.sku_id)?
                .map(|s| s.allow_oversell)
                .unwrap_or(false);
            if !allow_oversell {
                warn!(
                    sku_id = %event.sku_id,
                    current,
                    change = event.quantity,
                    "Oversell rejected"
                );
                return Err(InventoryError::Oversell {
                    sku_id: event.sku_id.clone(),
                    current,
                    need: -event.quantity,
                });
            }
        }

        store::upsert_snapshot(conn, &event.sku_id, new_quantity, event.event_id)
    }

    /// Upsert a SKU master row. Existing rows are returned untouched.
    pub fn get_or_create_sku(
        &self,
        sku_id: &str,
        original_sku: Option<&str>,
        sku_name: Option<&str>,
        environment: Environment,
    ) -> InventoryResult<SkuMaster> {
        self.store
            .with_tx(|conn| self.get_or_create_sku_in(conn, sku_id, original_sku, sku_name, environment))
    }

    pub(crate) fn get_or_create_sku_in(
        &self,
        conn: &Connection,
        sku_id: &str,
        original_sku: Option<&str>,
        sku_name: Option<&str>,
        environment: Environment,
    ) -> InventoryResult<SkuMaster> {
        let canonical = sku::normalize(sku_id);

        if let Some(existing) = store::get_sku(conn, &canonical)? {
            return Ok(existing);
        }

        let original = original_sku
            .filter(|s| !s.is_empty())
            .unwrap_or(sku_id)
            .to_string();
        let name = sku_name
            .filter(|s| !s.is_empty())
            .unwrap_or(&canonical)
            .to_string();

        let master = SkuMaster::new(canonical, Some(original), name).with_environment(environment);
        store::insert_sku(conn, &master)?;
        Ok(master)
    }

    /// Idempotent store membership. Returns the link row, whether it was
    /// just created or already present.
    pub fn register_sku_to_store(&self, sku_id: &str, store_id: &str) -> InventoryResult<StoreSku> {
        let canonical = sku::normalize(sku_id);
        self.store.with_tx(|conn| {
            store::link_store_sku(conn, store_id, &canonical)?;
            store::get_store_sku(conn, store_id, &canonical)?.ok_or_else(|| {
                InventoryError::Integrity(format!(
                    "store_sku link missing after insert: {}/{}",
                    store_id, canonical
                ))
            })
        })
    }

    /// Soft delete: flips status to inactive, keeps every row.
    pub fn deactivate_sku(&self, sku_id: &str) -> InventoryResult<bool> {
        let canonical = sku::normalize(sku_id);
        self.store
            .with_conn(|conn| store::update_sku_status(conn, &canonical, RecordStatus::Inactive))
    }

    /// Logical reset: wipes the SKU's events, snapshot, store links and
    /// attribute bags; the master row survives.
    pub fn reset_sku(&self, sku_id: &str) -> InventoryResult<()> {
        let canonical = sku::normalize(sku_id);
        self.store.with_tx(|conn| {
            if store::get_sku(conn, &canonical)?.is_none() {
                return Err(InventoryError::SkuNotFound(canonical.clone()));
            }
            store::reset_sku_children(conn, &canonical)
        })
    }

    /// Set a SKU's stock to an absolute value: logical reset followed by an
    /// INIT_RESET event carrying the new quantity, so the accumulator still
    /// equals the sum of its (now single-entry) history.
    pub fn reset_stock(
        &self,
        sku_id: &str,
        quantity: i64,
        operator: &str,
    ) -> InventoryResult<InventoryEvent> {
        let canonical = sku::normalize(sku_id);
        self.store.with_tx(|conn| {
            if store::get_sku(conn, &canonical)?.is_none() {
                return Err(InventoryError::SkuNotFound(canonical.clone()));
            }
            store::clear_sku_history(conn, &canonical)?;
            self.create_event_in(
                conn,
                EventDraft::new(
                    EventType::InitReset,
                    canonical.clone(),
                    quantity,
                    operator,
                    EventSource::Import,
                )
                .with_metadata(json!({ "reset_type": "stock_reset" })),
            )
        })
    }

    /// Merge catalog-facing details into a SKU: name, extra data entries and
    /// the platform alias. Identity and policy fields are untouched.
    pub fn update_catalog_info(
        &self,
        sku_id: &str,
        sku_name: &str,
        extra: HashMap<String, Value>,
        platform_alias: &str,
    ) -> InventoryResult<SkuMaster> {
        let canonical = sku::normalize(sku_id);
        self.store.with_tx(|conn| {
            let mut master = store::get_sku(conn, &canonical)?
                .ok_or_else(|| InventoryError::SkuNotFound(canonical.clone()))?;

            if !sku_name.is_empty() {
                master.sku_name = sku_name.to_string();
            }
            master.extra_data.extend(extra.clone());
            master
                .aliases
                .insert(crate::models::PLATFORM_ALIAS.to_string(), platform_alias.to_string());

            store::update_sku_catalog(
                conn,
                &canonical,
                &master.sku_name,
                &master.extra_data,
                &master.aliases,
            )?;
            Ok(master)
        })
    }

    /// Record a failed platform call in the event log. Never touches
    /// snapshots and never fails on oversell; system-level errors (no SKU in
    /// hand) attach to the reserved `system_error` SKU.
    pub fn log_api_error(
        &self,
        message: &str,
        operation: &str,
        store_id: Option<&str>,
        sku_id: Option<&str>,
        details: Value,
    ) -> InventoryResult<InventoryEvent> {
        let target_sku = sku_id
            .map(sku::normalize)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| SYSTEM_ERROR_SKU.to_string());

        let mut metadata = json!({
            "error_type": "api_failure",
            "operation": operation,
            "error_details": details,
        });
        if let Some(store_id) = store_id {
            metadata["store_id"] = json!(store_id);
        }

        let event = self.store.with_tx(|conn| {
            self.get_or_create_sku_in(conn, &target_sku, None, None, Environment::Prod)?;

            let mut draft = EventDraft::new(
                EventType::ApiError,
                target_sku.clone(),
                0,
                "system",
                EventSource::System,
            )
            .with_reason(message)
            .with_metadata(metadata.clone())
            .without_snapshot();
            draft.store_id = store_id.map(str::to_string);

            self.create_event_in(conn, draft)
        })?;

        error!(
            operation,
            store_id = store_id.unwrap_or("-"),
            "API error logged: {}",
            message
        );
        Ok(event)
    }

    /// Record a failed platform stock push. Same shape as `log_api_error`
    /// with its own event type so pushes are separable in the failure trace.
    pub fn log_sync_failure(
        &self,
        message: &str,
        sku_id: &str,
        store_id: Option<&str>,
        details: Value,
    ) -> InventoryResult<InventoryEvent> {
        let canonical = sku::normalize(sku_id);
        let metadata = json!({
            "error_type": "sync_failure",
            "operation": "set_inventory",
            "error_details": details,
        });

        self.store.with_tx(|conn| {
            self.get_or_create_sku_in(conn, &canonical, None, None, Environment::Prod)?;

            let mut draft = EventDraft::new(
                EventType::SyncFailure,
                canonical.clone(),
                0,
                "system",
                EventSource::System,
            )
            .with_reason(message)
            .with_metadata(metadata.clone())
            .without_snapshot();
            draft.store_id = store_id.map(str::to_string);

            self.create_event_in(conn, draft)
        })
    }

    // ------------------------------------------------------------------
    // Reads

    pub fn get_sku(&self, sku_id: &str) -> InventoryResult<Option<SkuMaster>> {
        let canonical = sku::normalize(sku_id);
        self.store.with_conn(|conn| store::get_sku(conn, &canonical))
    }

    pub fn get_snapshot(&self, sku_id: &str) -> InventoryResult<Option<InventorySnapshot>> {
        let canonical = sku::normalize(sku_id);
        self.store
            .with_conn(|conn| store::get_snapshot(conn, &canonical))
    }

    pub fn get_events(
        &self,
        sku_id: &str,
        event_type: Option<EventType>,
        limit: usize,
        offset: usize,
    ) -> InventoryResult<Vec<InventoryEvent>> {
        let canonical = sku::normalize(sku_id);
        self.store
            .with_conn(|conn| store::events_for_sku(conn, &canonical, event_type, limit, offset))
    }

    pub fn get_store(&self, store_id: &str) -> InventoryResult<Option<Store>> {
        self.store.with_conn(|conn| store::get_store(conn, store_id))
    }

    pub fn list_active_stores(&self) -> InventoryResult<Vec<Store>> {
        self.store
            .with_conn(|conn| store::list_active_stores(conn, crate::models::PLATFORM_TYPE))
    }

    pub fn get_registered_stores(&self, sku_id: &str) -> InventoryResult<Vec<String>> {
        let canonical = sku::normalize(sku_id);
        self.store
            .with_conn(|conn| store::store_ids_for_sku(conn, &canonical))
    }

    pub fn get_store_skus(&self, store_id: &str) -> InventoryResult<Vec<StoreSkuView>> {
        self.store.with_conn(|conn| store::store_skus(conn, store_id))
    }
}
