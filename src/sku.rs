//! SKU canonicalization and idempotency token helpers.
//!
//! Every `sku_id` that enters or leaves the core passes through
//! [`normalize`]; the externally observed spelling survives only in
//! `SkuMaster.original_sku` and the platform alias.

use rand::RngCore;

/// Canonicalize an external SKU string: trim surrounding whitespace and
/// lowercase. Empty input stays empty.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Generate a random 64-hex idempotency token for events that carry no
/// deterministic dedup token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
