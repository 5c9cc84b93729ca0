//! Wire types for the marketplace API.
//!
//! The platform wraps single-element lists as bare objects, so list-valued
//! fields deserialize through [`one_or_many`]. Unknown fields are ignored
//! throughout; only the documented subset is read.

use serde::{Deserialize, Deserializer, Serialize};

/// Accept either a bare object or a list of objects.
pub fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchOrdersResponse {
    #[serde(
        rename = "orderNumberList",
        default,
        deserialize_with = "one_or_many"
    )]
    pub order_number_list: Vec<OrderNumberEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderNumberEntry {
    #[serde(rename = "orderNumber", default)]
    pub order_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetOrdersResponse {
    #[serde(rename = "orderList", default, deserialize_with = "one_or_many")]
    pub orders: Vec<OrderDetail>,
}

/// One order as returned by the detail endpoint. `order_status` is the
/// opaque platform status code ("100" new, "300" confirmed, "900"
/// cancelled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(rename = "orderNumber", default)]
    pub order_number: String,
    #[serde(rename = "orderStatus", default)]
    pub order_status: String,
    #[serde(rename = "orderItemList", default)]
    pub item_list: OrderItemList,
}

impl OrderDetail {
    pub fn lines(&self) -> &[OrderLine] {
        &self.item_list.items
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderItemList {
    #[serde(rename = "orderItem", default, deserialize_with = "one_or_many")]
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    #[serde(rename = "skuNumber", default, skip_serializing_if = "Option::is_none")]
    pub sku_number: Option<String>,
    #[serde(
        rename = "itemManagementNumber",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub item_management_number: Option<String>,
    #[serde(default)]
    pub quantity: i64,
}

impl OrderLine {
    /// The external SKU spelling of this line: the SKU number when present,
    /// else the item management number. Lines with neither are skipped by
    /// the poller.
    pub fn raw_sku(&self) -> Option<&str> {
        self.sku_number
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.item_management_number.as_deref().filter(|s| !s.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryRangeResponse {
    #[serde(default, deserialize_with = "one_or_many")]
    pub inventories: Vec<InventoryRecord>,
}

/// One platform-side inventory row from the range endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryRecord {
    #[serde(rename = "manageNumber", default)]
    pub manage_number: String,
    #[serde(rename = "variantId", default)]
    pub variant_id: String,
    #[serde(default)]
    pub quantity: Option<i64>,
}

/// Item detail subset used by the catalog sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemDetail {
    #[serde(rename = "itemName", default)]
    pub item_name: String,
    #[serde(rename = "itemUrl", default)]
    pub item_url: Option<String>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
    #[serde(rename = "mediumImageUrl", default)]
    pub medium_image_url: Option<String>,
    #[serde(rename = "itemPrice", default)]
    pub item_price: Option<f64>,
}

impl ItemDetail {
    pub fn image(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .or(self.medium_image_url.as_deref())
    }
}
