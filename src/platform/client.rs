//! Typed marketplace client.
//!
//! A session is bound to one credential pair (plus optional shop scoping and
//! forward proxy). Authentication is a single precomputed header,
//! `ESA base64(service_secret:license_key)`. Each request is retried up to
//! three times with doubling backoff on transient trouble (network errors,
//! HTTP 429); 401 is terminal and surfaces as `CredentialExpired`.

use crate::config::AppConfig;
use crate::error::PlatformError;
use crate::models::Store;
use crate::platform::types::{
    GetOrdersResponse, InventoryRangeResponse, InventoryRecord, ItemDetail, OrderDetail,
    SearchOrdersResponse,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.rms.example.com";

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const SEARCH_PAGE_SIZE: usize = 30;
const PLATFORM_DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%S+0000";

/// The operations the rest of the core performs against the marketplace.
/// The poller, retry queue, synchronizer and catalog sync depend on this
/// seam, never on the HTTP client directly.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Order numbers placed inside the window, all pages concatenated.
    async fn search_orders(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        statuses: Option<Vec<i64>>,
    ) -> Result<Vec<String>, PlatformError>;

    /// Order details for up to 100 order numbers (the caller batches).
    async fn get_orders(&self, order_numbers: &[String]) -> Result<Vec<OrderDetail>, PlatformError>;

    /// Side-effectful: moves the order to confirmed on the platform.
    async fn confirm_order(&self, order_number: &str) -> Result<(), PlatformError>;

    /// Set platform-side available stock. Quantity is unsigned: clamping to
    /// zero happens on the caller's side of this seam.
    async fn set_inventory(&self, external_sku: &str, quantity: u32) -> Result<(), PlatformError>;

    /// Platform inventory rows whose quantity lies in the given range.
    async fn list_inventory_range(
        &self,
        min_quantity: i64,
        max_quantity: i64,
    ) -> Result<Vec<InventoryRecord>, PlatformError>;

    async fn get_item(&self, manage_number: &str) -> Result<ItemDetail, PlatformError>;

    /// Probe credential health: (valid, days remaining when known).
    async fn test_auth(&self) -> Result<(bool, Option<i64>), PlatformError>;
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct PlatformCredentials {
    pub service_secret: String,
    pub license_key: String,
    pub shop_url: Option<String>,
    pub proxy: Option<String>,
    pub base_url: String,
}

pub struct PlatformClient {
    http: reqwest::Client,
    auth_header: String,
    shop_url: Option<String>,
    base_url: String,
}

impl PlatformClient {
    pub fn new(credentials: PlatformCredentials) -> Result<Self, PlatformError> {
        if credentials.service_secret.is_empty() || credentials.license_key.is_empty() {
            return Err(PlatformError::CredentialsMissing);
        }

        let auth_header = build_auth_header(&credentials.service_secret, &credentials.license_key);

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("StockSync/1.0 (Inventory Reconciliation)");

        if let Some(proxy_url) = &credentials.proxy {
            info!("Platform client using proxy: {}", proxy_url);
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| PlatformError::Network {
                attempts: 0,
                message: format!("invalid proxy {}: {}", proxy_url, e),
            })?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build().map_err(|e| PlatformError::Network {
            attempts: 0,
            message: format!("failed to build http client: {}", e),
        })?;

        Ok(Self {
            http,
            auth_header,
            shop_url: credentials.shop_url,
            base_url: credentials.base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Add the shop scoping field carried in every request body.
    fn scope_body(&self, mut body: Value) -> Value {
        if let (Some(shop), Some(map)) = (&self.shop_url, body.as_object_mut()) {
            map.insert("shopUrl".to_string(), Value::String(shop.clone()));
        }
        body
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, PlatformError> {
        let url = self.url(path);
        let body = self.scope_body(body);
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 1..=MAX_ATTEMPTS {
            let result = self
                .http
                .post(&url)
                .header(reqwest::header::AUTHORIZATION, &self.auth_header)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) => match self.check_response(response, attempt).await? {
                    Some(value) => return Ok(value),
                    None => {} // rate limited, retry below
                },
                Err(e) => {
                    warn!("Platform request failed (attempt {}): {}", attempt, e);
                    if attempt == MAX_ATTEMPTS {
                        return Err(PlatformError::Network {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                }
            }

            debug!("Retrying in {}ms", backoff);
            sleep(Duration::from_millis(backoff)).await;
            backoff *= 2;
        }

        Err(PlatformError::RateLimited {
            attempts: MAX_ATTEMPTS,
        })
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, PlatformError> {
        let url = self.url(path);
        let mut query: Vec<(&str, String)> = params.to_vec();
        if let Some(shop) = &self.shop_url {
            query.push(("shopUrl", shop.clone()));
        }
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 1..=MAX_ATTEMPTS {
            let result = self
                .http
                .get(&url)
                .header(reqwest::header::AUTHORIZATION, &self.auth_header)
                .header(reqwest::header::ACCEPT, "application/json")
                .query(&query)
                .send()
                .await;

            match result {
                Ok(response) => match self.check_response(response, attempt).await? {
                    Some(value) => return Ok(value),
                    None => {}
                },
                Err(e) => {
                    warn!("Platform request failed (attempt {}): {}", attempt, e);
                    if attempt == MAX_ATTEMPTS {
                        return Err(PlatformError::Network {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                }
            }

            debug!("Retrying in {}ms", backoff);
            sleep(Duration::from_millis(backoff)).await;
            backoff *= 2;
        }

        Err(PlatformError::RateLimited {
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Classify one HTTP response. `Ok(Some(body))` is success, `Ok(None)`
    /// means rate-limited and retryable; everything else is terminal.
    async fn check_response(
        &self,
        response: reqwest::Response,
        attempt: u32,
    ) -> Result<Option<Value>, PlatformError> {
        let status = response.status();

        if status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if text.trim().is_empty() {
                return Ok(Some(Value::Null));
            }
            let value = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text }));
            return Ok(Some(value));
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(PlatformError::CredentialExpired);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited on attempt {}, backing off", attempt);
            if attempt == MAX_ATTEMPTS {
                return Err(PlatformError::RateLimited { attempts: attempt });
            }
            return Ok(None);
        }

        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Failure {
            code: status.as_u16(),
            body,
        })
    }

    async fn search_orders_window(
        &self,
        start: &str,
        end: &str,
        statuses: Option<&[i64]>,
    ) -> Result<Vec<String>, PlatformError> {
        let mut order_numbers = Vec::new();
        let mut page = 1usize;

        loop {
            let mut body = json!({
                "dateType": 1,
                "startDatetime": start,
                "endDatetime": end,
                "PaginationRequestModel": {
                    "requestRecordsAmount": SEARCH_PAGE_SIZE,
                    "requestPage": page,
                    "sortModelList": [
                        { "sortColumn": 1, "sortDirection": 2 }
                    ]
                }
            });
            if let Some(statuses) = statuses {
                body["orderProgressList"] = json!(statuses);
            }

            let response = self.post("/es/2.0/order/searchOrder/", body).await?;
            let parsed: SearchOrdersResponse =
                serde_json::from_value(response).map_err(|e| PlatformError::Decode(e.to_string()))?;

            let fetched = parsed.order_number_list.len();
            order_numbers.extend(
                parsed
                    .order_number_list
                    .into_iter()
                    .map(|entry| entry.order_number)
                    .filter(|o| !o.is_empty()),
            );

            if fetched < SEARCH_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(order_numbers)
    }
}

fn build_auth_header(service_secret: &str, license_key: &str) -> String {
    let encoded = BASE64.encode(format!("{}:{}", service_secret, license_key));
    format!("ESA {}", encoded)
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn search_orders(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        statuses: Option<Vec<i64>>,
    ) -> Result<Vec<String>, PlatformError> {
        let start_str = start.format(PLATFORM_DATETIME_FMT).to_string();
        let end_str = end.format(PLATFORM_DATETIME_FMT).to_string();
        debug!("Searching orders in [{}, {}]", start_str, end_str);
        self.search_orders_window(&start_str, &end_str, statuses.as_deref())
            .await
    }

    async fn get_orders(&self, order_numbers: &[String]) -> Result<Vec<OrderDetail>, PlatformError> {
        let body = json!({ "orderNumberList": order_numbers });
        let response = self.post("/es/2.0/order/getOrder", body).await?;
        let parsed: GetOrdersResponse =
            serde_json::from_value(response).map_err(|e| PlatformError::Decode(e.to_string()))?;
        Ok(parsed.orders)
    }

    async fn confirm_order(&self, order_number: &str) -> Result<(), PlatformError> {
        let body = json!({ "orderNumber": order_number });
        self.post("/es/2.0/order/confirmOrder", body).await?;
        Ok(())
    }

    async fn set_inventory(&self, external_sku: &str, quantity: u32) -> Result<(), PlatformError> {
        let body = json!({
            "inventoryInfoList": {
                "inventoryInfo": {
                    "sku": external_sku,
                    "inventory": quantity,
                    "inventoryType": "0"
                }
            }
        });
        self.post("/es/2.0/inventory/set", body).await?;
        Ok(())
    }

    async fn list_inventory_range(
        &self,
        min_quantity: i64,
        max_quantity: i64,
    ) -> Result<Vec<InventoryRecord>, PlatformError> {
        debug!(
            "Fetching platform inventory range {}-{}",
            min_quantity, max_quantity
        );
        let response = self
            .get(
                "/es/2.0/inventories/bulk-get/range",
                &[
                    ("minQuantity", min_quantity.to_string()),
                    ("maxQuantity", max_quantity.to_string()),
                ],
            )
            .await?;
        let parsed: InventoryRangeResponse =
            serde_json::from_value(response).map_err(|e| PlatformError::Decode(e.to_string()))?;
        Ok(parsed.inventories)
    }

    async fn get_item(&self, manage_number: &str) -> Result<ItemDetail, PlatformError> {
        let response = self
            .get(
                &format!("/es/2.0/items/manage-numbers/{}", manage_number),
                &[],
            )
            .await?;

        // Some deployments wrap the payload under an "item" key.
        let payload = match response.get("item") {
            Some(inner) => inner.clone(),
            None => response,
        };
        serde_json::from_value(payload).map_err(|e| PlatformError::Decode(e.to_string()))
    }

    async fn test_auth(&self) -> Result<(bool, Option<i64>), PlatformError> {
        match self
            .search_orders_window(
                "2020-01-01T00:00:00+0000",
                "2020-01-01T01:00:00+0000",
                None,
            )
            .await
        {
            Ok(_) => Ok((true, None)),
            Err(PlatformError::CredentialExpired) => Ok((false, Some(0))),
            Err(_) => Ok((false, None)),
        }
    }
}

/// Builds a [`PlatformApi`] session for a store, falling back to
/// process-level default credentials where the store's `api_config` is
/// silent. Components hold the connector, not a client, because each store
/// carries its own credentials.
pub trait PlatformConnector: Send + Sync {
    fn connect(&self, store: &Store) -> Result<Arc<dyn PlatformApi>, PlatformError>;
}

pub struct HttpConnector {
    default_service_secret: Option<String>,
    default_license_key: Option<String>,
    proxy: Option<String>,
    base_url: String,
}

impl HttpConnector {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_service_secret: config.platform_service_secret.clone(),
            default_license_key: config.platform_license_key.clone(),
            proxy: config.platform_proxy.clone(),
            base_url: config.platform_api_base.clone(),
        }
    }
}

impl PlatformConnector for HttpConnector {
    fn connect(&self, store: &Store) -> Result<Arc<dyn PlatformApi>, PlatformError> {
        let service_secret = store
            .api_config
            .service_secret
            .clone()
            .or_else(|| self.default_service_secret.clone());
        let license_key = store
            .api_config
            .license_key
            .clone()
            .or_else(|| self.default_license_key.clone());

        let (Some(service_secret), Some(license_key)) = (service_secret, license_key) else {
            return Err(PlatformError::CredentialsMissing);
        };

        let client = PlatformClient::new(PlatformCredentials {
            service_secret,
            license_key,
            shop_url: store.api_config.shop_url.clone(),
            proxy: self.proxy.clone(),
            base_url: self.base_url.clone(),
        })?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> PlatformCredentials {
        PlatformCredentials {
            service_secret: "service_secret".into(),
            license_key: "license_key".into(),
            shop_url: None,
            proxy: None,
            base_url: DEFAULT_API_BASE.into(),
        }
    }

    #[test]
    fn auth_header_generation() {
        let header = build_auth_header("service_secret", "license_key");
        assert!(header.starts_with("ESA "));
        let expected = BASE64.encode(b"service_secret:license_key");
        assert_eq!(header, format!("ESA {}", expected));
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let mut creds = credentials();
        creds.service_secret.clear();
        assert!(matches!(
            PlatformClient::new(creds),
            Err(PlatformError::CredentialsMissing)
        ));
    }

    #[test]
    fn shop_scoping_is_injected_into_bodies() {
        let mut creds = credentials();
        creds.shop_url = Some("my-shop".into());
        let client = PlatformClient::new(creds).unwrap();
        let body = client.scope_body(json!({ "orderNumber": "O1" }));
        assert_eq!(body["shopUrl"], "my-shop");

        let unscoped = PlatformClient::new(credentials()).unwrap();
        let body = unscoped.scope_body(json!({ "orderNumber": "O1" }));
        assert!(body.get("shopUrl").is_none());
    }
}
