//! Application configuration, read once from the environment at startup and
//! threaded through component constructors.

use crate::models::Environment;
use crate::platform::client::DEFAULT_API_BASE;

/// Process-wide configuration.
///
/// Missing platform credentials are not an error: platform-dependent
/// operations degrade to `CredentialsMissing` results instead of refusing to
/// start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    /// Reserved for a future cache layer; recognized but unused.
    pub redis_url: Option<String>,
    pub environment: Environment,
    pub platform_service_secret: Option<String>,
    pub platform_license_key: Option<String>,
    pub platform_proxy: Option<String>,
    pub platform_api_base: String,
    pub poll_interval_secs: u64,
    pub retry_drain_interval_secs: u64,
    /// 0 disables the periodic full push.
    pub push_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "./stocksync.db".to_string());

        let redis_url = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        let environment = std::env::var("ENVIRONMENT")
            .ok()
            .and_then(|s| Environment::parse(s.trim()))
            .unwrap_or(Environment::Prod);

        let platform_service_secret = std::env::var("PLATFORM_DEFAULT_SERVICE_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let platform_license_key = std::env::var("PLATFORM_DEFAULT_LICENSE_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        let platform_proxy = std::env::var("PLATFORM_PROXY").ok().filter(|s| !s.is_empty());

        let platform_api_base =
            std::env::var("PLATFORM_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        let poll_interval_secs = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let retry_drain_interval_secs = std::env::var("RETRY_DRAIN_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        let push_interval_secs = std::env::var("PUSH_INTERVAL_SECS")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);

        Ok(Self {
            database_path,
            redis_url,
            environment,
            platform_service_secret,
            platform_license_key,
            platform_proxy,
            platform_api_base,
            poll_interval_secs,
            retry_drain_interval_secs,
            push_interval_secs,
        })
    }

    /// True when neither default credential half is configured; per-store
    /// api_config can still supply credentials.
    pub fn platform_defaults_missing(&self) -> bool {
        self.platform_service_secret.is_none() || self.platform_license_key.is_none()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "./stocksync.db".to_string(),
            redis_url: None,
            environment: Environment::Prod,
            platform_service_secret: None,
            platform_license_key: None,
            platform_proxy: None,
            platform_api_base: DEFAULT_API_BASE.to_string(),
            poll_interval_secs: 300,
            retry_drain_interval_secs: 60,
            push_interval_secs: 0,
        }
    }
}
