//! StockSync Backend Library
//!
//! Event-sourced inventory reconciliation core for multi-store marketplace
//! sellers: append-only stock event log with derived snapshots, order
//! polling, confirm retry queue, and platform push synchronization.

pub mod catalog;
pub mod config;
pub mod error;
pub mod inventory;
pub mod models;
pub mod platform;
pub mod polling;
pub mod retry;
pub mod sku;
pub mod store;
pub mod sync;

// Re-export the service surface for binaries and tests
pub use catalog::SkuCatalogSync;
pub use config::AppConfig;
pub use error::{InventoryError, InventoryResult, PlatformError};
pub use inventory::InventoryService;
pub use polling::OrderPoller;
pub use retry::ConfirmRetryQueue;
pub use store::InventoryStore;
pub use sync::PushSynchronizer;
