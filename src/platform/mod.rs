//! Marketplace ("platform") integration: typed client, connector seam and
//! wire types.

pub mod client;
pub mod types;

pub use client::{
    HttpConnector, PlatformApi, PlatformClient, PlatformConnector, PlatformCredentials,
    DEFAULT_API_BASE,
};
pub use types::{InventoryRecord, ItemDetail, OrderDetail, OrderLine};
