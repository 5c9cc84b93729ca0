//! Error types for the inventory core.
//!
//! Two domains: [`PlatformError`] covers everything the marketplace client
//! can report, [`InventoryError`] covers the event log, snapshots and the
//! persistence layer. External-facing operations (poller, synchronizer)
//! absorb these into result records instead of propagating them.

use thiserror::Error;

/// Failures surfaced by the platform client. Transient conditions (network
/// errors, HTTP 429) are retried inside the client; what escapes here is
/// terminal for the current attempt.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Neither the store's api_config nor the process defaults carry a
    /// usable credential pair. Platform-dependent operations degrade to
    /// no-ops when they see this.
    #[error("platform credentials are not configured")]
    CredentialsMissing,

    /// HTTP 401. The license key is likely expired; never retried.
    #[error("platform credentials rejected (license key may be expired)")]
    CredentialExpired,

    /// HTTP 429 on every attempt.
    #[error("platform rate limit exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Any other non-2xx response.
    #[error("platform request failed: HTTP {code}: {body}")]
    Failure { code: u16, body: String },

    /// Connection/timeout trouble on every attempt.
    #[error("platform request failed after {attempts} attempts: {message}")]
    Network { attempts: u32, message: String },

    /// 2xx response whose body did not match the expected shape.
    #[error("unexpected platform response: {0}")]
    Decode(String),
}

impl PlatformError {
    /// True for the credential family of failures, which halt polling and
    /// sync for the affected store instead of being logged per call.
    pub fn is_credential(&self) -> bool {
        matches!(
            self,
            PlatformError::CredentialsMissing | PlatformError::CredentialExpired
        )
    }

    /// Numeric status code carried by the failure, when there is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PlatformError::CredentialExpired => Some(401),
            PlatformError::RateLimited { .. } => Some(429),
            PlatformError::Failure { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Failures from the inventory store and service.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The event would push `internal_available` below zero for a SKU with
    /// `allow_oversell = false`. The surrounding transaction is aborted.
    #[error("oversell not allowed for sku {sku_id}: available {current}, requested {need}")]
    Oversell {
        sku_id: String,
        current: i64,
        need: i64,
    },

    /// An event with the same idempotency token already exists. Callers
    /// treat this as "already applied".
    #[error("duplicate idempotency token: {0}")]
    DuplicateToken(String),

    /// Foreign-key or other constraint violation.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A persisted or inbound value did not parse (unknown enum string,
    /// malformed timestamp, malformed JSON bag).
    #[error("malformed value: {0}")]
    Parse(String),

    #[error("store not found: {0}")]
    StoreNotFound(String),

    #[error("sku not found: {0}")]
    SkuNotFound(String),

    #[error(transparent)]
    Db(rusqlite::Error),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type InventoryResult<T> = Result<T, InventoryError>;

impl From<rusqlite::Error> for InventoryError {
    /// Lift SQLite constraint failures into the typed taxonomy; the token
    /// unique index and the pending-retry unique index both surface as
    /// [`InventoryError::DuplicateToken`], FK violations as
    /// [`InventoryError::Integrity`].
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, Some(message)) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                if message.contains("inventory_events.token")
                    || message.contains("uq_retry_pending")
                {
                    return InventoryError::DuplicateToken(message.clone());
                }
                return InventoryError::Integrity(message.clone());
            }
        }
        InventoryError::Db(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_classification() {
        assert!(PlatformError::CredentialsMissing.is_credential());
        assert!(PlatformError::CredentialExpired.is_credential());
        assert!(!PlatformError::RateLimited { attempts: 3 }.is_credential());
        assert!(!PlatformError::Failure {
            code: 500,
            body: "boom".into()
        }
        .is_credential());
    }

    #[test]
    fn status_codes() {
        assert_eq!(PlatformError::CredentialExpired.status_code(), Some(401));
        assert_eq!(
            PlatformError::RateLimited { attempts: 3 }.status_code(),
            Some(429)
        );
        assert_eq!(PlatformError::CredentialsMissing.status_code(), None);
    }
}
