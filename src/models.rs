//! Core entities of the inventory engine: SKU master data, stores, the
//! append-only event log, derived snapshots, and the confirm retry queue.
//!
//! Enum variants persist as their canonical string form; reads reject
//! unknown strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Event types recorded in the inventory log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    OrderReceived,
    OrderCancelled,
    OrderConfirmed,
    OrderShipped,
    StockIn,
    Adjustment,
    InitReset,
    ApiError,
    SyncFailure,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderReceived => "ORDER_RECEIVED",
            EventType::OrderCancelled => "ORDER_CANCELLED",
            EventType::OrderConfirmed => "ORDER_CONFIRMED",
            EventType::OrderShipped => "ORDER_SHIPPED",
            EventType::StockIn => "STOCK_IN",
            EventType::Adjustment => "ADJUSTMENT",
            EventType::InitReset => "INIT_RESET",
            EventType::ApiError => "API_ERROR",
            EventType::SyncFailure => "SYNC_FAILURE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ORDER_RECEIVED" => Some(EventType::OrderReceived),
            "ORDER_CANCELLED" => Some(EventType::OrderCancelled),
            "ORDER_CONFIRMED" => Some(EventType::OrderConfirmed),
            "ORDER_SHIPPED" => Some(EventType::OrderShipped),
            "STOCK_IN" => Some(EventType::StockIn),
            "ADJUSTMENT" => Some(EventType::Adjustment),
            "INIT_RESET" => Some(EventType::InitReset),
            "API_ERROR" => Some(EventType::ApiError),
            "SYNC_FAILURE" => Some(EventType::SyncFailure),
            _ => None,
        }
    }

    /// Whether events of this type feed the snapshot accumulator.
    /// Observational events (API_ERROR, SYNC_FAILURE) and the zero-quantity
    /// confirmation marker never touch snapshots.
    pub fn is_stock_altering(&self) -> bool {
        !matches!(
            self,
            EventType::ApiError | EventType::SyncFailure | EventType::OrderConfirmed
        )
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Api,
    Manual,
    Import,
    System,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Api => "api",
            EventSource::Manual => "manual",
            EventSource::Import => "import",
            EventSource::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "api" => Some(EventSource::Api),
            "manual" => Some(EventSource::Manual),
            "import" => Some(EventSource::Import),
            "system" => Some(EventSource::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Prod,
    Test,
    Dev,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Test => "test",
            Environment::Dev => "dev",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prod" => Some(Environment::Prod),
            "test" => Some(Environment::Test),
            "dev" => Some(Environment::Dev),
            _ => None,
        }
    }
}

/// Shared active/inactive lifecycle flag for SKUs and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RecordStatus::Active),
            "inactive" => Some(RecordStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    Failed,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStatus::Pending => "pending",
            RetryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RetryStatus::Pending),
            "failed" => Some(RetryStatus::Failed),
            _ => None,
        }
    }
}

/// Alias namespace under which the marketplace-side SKU spelling is kept.
pub const PLATFORM_ALIAS: &str = "platform";

/// `stores.platform_type` value for stores served by the marketplace client.
pub const PLATFORM_TYPE: &str = "platform";

/// Reserved SKU id that system-level error events attach to.
pub const SYSTEM_ERROR_SKU: &str = "system_error";

/// A sellable variant. `sku_id` is always the canonical (normalized) form;
/// `original_sku` keeps the spelling first observed externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuMaster {
    pub sku_id: String,
    pub original_sku: Option<String>,
    pub sku_name: String,
    pub allow_oversell: bool,
    pub environment: Environment,
    pub status: RecordStatus,
    pub extra_data: HashMap<String, Value>,
    pub aliases: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SkuMaster {
    pub fn new(sku_id: String, original_sku: Option<String>, sku_name: String) -> Self {
        let now = Utc::now();
        Self {
            sku_id,
            original_sku,
            sku_name,
            allow_oversell: false,
            environment: Environment::Prod,
            status: RecordStatus::Active,
            extra_data: HashMap::new(),
            aliases: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_oversell(mut self, allow: bool) -> Self {
        self.allow_oversell = allow;
        self
    }

    /// The spelling pushed to the marketplace:
    /// platform alias, else original spelling, else the canonical id.
    pub fn external_sku(&self) -> &str {
        self.aliases
            .get(PLATFORM_ALIAS)
            .map(String::as_str)
            .or(self.original_sku.as_deref())
            .unwrap_or(&self.sku_id)
    }
}

/// Per-store credential bag, persisted as JSON text in `stores.api_config`.
/// Only the documented keys are read; anything else is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_url: Option<String>,
}

impl ApiConfig {
    pub fn is_empty(&self) -> bool {
        self.service_secret.is_none() && self.license_key.is_none()
    }
}

/// A marketplace storefront. Created administratively, never auto-created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub store_id: String,
    pub store_name: String,
    pub platform_type: String,
    pub api_config: ApiConfig,
    pub status: RecordStatus,
    pub last_sku_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub fn new(store_id: String, store_name: String, platform_type: String) -> Self {
        Self {
            store_id,
            store_name,
            platform_type,
            api_config: ApiConfig::default(),
            status: RecordStatus::Active,
            last_sku_sync_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_api_config(mut self, api_config: ApiConfig) -> Self {
        self.api_config = api_config;
        self
    }
}

/// Membership row linking a SKU to a store it is listed on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSku {
    pub store_id: String,
    pub sku_id: String,
    pub registered_at: DateTime<Utc>,
}

/// Joined view of a store's registered SKUs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSkuView {
    pub store_id: String,
    pub sku_id: String,
    pub sku_name: String,
    pub original_sku: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// One row of the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub sku_id: String,
    pub quantity: i64,
    pub store_id: Option<String>,
    pub platform_status: Option<String>,
    pub order_id: Option<String>,
    pub operator: String,
    pub reason: Option<String>,
    pub source: EventSource,
    pub token: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Materialized accumulator: current on-hand per SKU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub sku_id: String,
    pub internal_available: i64,
    pub last_event_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl InventorySnapshot {
    /// On-hand as pushed to the marketplace, which cannot represent
    /// negative stock.
    pub fn platform_quantity(&self) -> u32 {
        self.internal_available.max(0) as u32
    }
}

/// Durable record of a platform confirm awaiting re-attempt.
/// Scheduler columns are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryEntry {
    pub retry_id: Uuid,
    pub order_number: String,
    pub store_id: String,
    pub retry_count: i64,
    pub max_retries: i64,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<i64>,
    pub next_attempt_at: i64,
    pub status: RetryStatus,
    pub metadata: Value,
    pub created_at: i64,
}

/// Request shape for appending an event; see `InventoryService::create_event`.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub sku_id: String,
    pub quantity: i64,
    pub operator: String,
    pub source: EventSource,
    pub store_id: Option<String>,
    pub platform_status: Option<String>,
    pub order_id: Option<String>,
    pub reason: Option<String>,
    pub metadata: Value,
    pub token: Option<String>,
    pub update_snapshot: bool,
}

impl EventDraft {
    pub fn new(
        event_type: EventType,
        sku_id: impl Into<String>,
        quantity: i64,
        operator: impl Into<String>,
        source: EventSource,
    ) -> Self {
        Self {
            event_type,
            sku_id: sku_id.into(),
            quantity,
            operator: operator.into(),
            source,
            store_id: None,
            platform_status: None,
            order_id: None,
            reason: None,
            metadata: Value::Object(Default::default()),
            token: None,
            update_snapshot: true,
        }
    }

    pub fn with_store(mut self, store_id: impl Into<String>) -> Self {
        self.store_id = Some(store_id.into());
        self
    }

    pub fn with_order(
        mut self,
        order_id: impl Into<String>,
        platform_status: impl Into<String>,
    ) -> Self {
        self.order_id = Some(order_id.into());
        self.platform_status = Some(platform_status.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn without_snapshot(mut self) -> Self {
        self.update_snapshot = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trip() {
        for ty in [
            EventType::OrderReceived,
            EventType::OrderCancelled,
            EventType::OrderConfirmed,
            EventType::OrderShipped,
            EventType::StockIn,
            EventType::Adjustment,
            EventType::InitReset,
            EventType::ApiError,
            EventType::SyncFailure,
        ] {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(EventType::parse("ORDER_TELEPORTED"), None);
    }

    #[test]
    fn observational_events_do_not_alter_stock() {
        assert!(!EventType::ApiError.is_stock_altering());
        assert!(!EventType::SyncFailure.is_stock_altering());
        assert!(!EventType::OrderConfirmed.is_stock_altering());
        assert!(EventType::OrderReceived.is_stock_altering());
        assert!(EventType::OrderCancelled.is_stock_altering());
        assert!(EventType::StockIn.is_stock_altering());
    }

    #[test]
    fn source_strings() {
        assert_eq!(EventSource::Api.as_str(), "api");
        assert_eq!(EventSource::parse("import"), Some(EventSource::Import));
        assert_eq!(EventSource::parse("carrier-pigeon"), None);
    }

    #[test]
    fn external_sku_resolution() {
        let mut sku = SkuMaster::new("abc".into(), Some("ABC".into()), "Widget".into());
        assert_eq!(sku.external_sku(), "ABC");

        sku.aliases
            .insert(PLATFORM_ALIAS.to_string(), "ABC-PLATFORM".to_string());
        assert_eq!(sku.external_sku(), "ABC-PLATFORM");

        let bare = SkuMaster::new("abc".into(), None, "Widget".into());
        assert_eq!(bare.external_sku(), "abc");
    }

    #[test]
    fn platform_quantity_clamps() {
        let snap = InventorySnapshot {
            sku_id: "x".into(),
            internal_available: -3,
            last_event_id: None,
            updated_at: Utc::now(),
        };
        assert_eq!(snap.platform_quantity(), 0);

        let positive = InventorySnapshot {
            internal_available: 7,
            ..snap
        };
        assert_eq!(positive.platform_quantity(), 7);
    }

    #[test]
    fn api_config_parses_documented_keys() {
        let cfg: ApiConfig = serde_json::from_str(
            r#"{"serviceSecret":"sec","licenseKey":"key","shopUrl":"shop","ignored":1}"#,
        )
        .unwrap();
        assert_eq!(cfg.service_secret.as_deref(), Some("sec"));
        assert_eq!(cfg.license_key.as_deref(), Some("key"));
        assert_eq!(cfg.shop_url.as_deref(), Some("shop"));
        assert!(!cfg.is_empty());
        assert!(ApiConfig::default().is_empty());
    }
}
