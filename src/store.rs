//! Durable inventory store: event log, snapshots, SKU master, store-SKU
//! links and the confirm retry queue, on SQLite.
//!
//! The only invariants enforced at this layer are the relational ones:
//! foreign keys, event-token uniqueness, one pending retry per
//! (order_number, store_id), one snapshot per SKU. Everything else (oversell,
//! accumulator math, normalization) lives in the inventory service.
//!
//! Row helpers operate on a borrowed [`Connection`] so they compose inside a
//! batch transaction opened through [`InventoryStore::with_tx`].

use crate::error::{InventoryError, InventoryResult};
use crate::models::{
    ApiConfig, Environment, EventSource, EventType, InventoryEvent, InventorySnapshot,
    RecordStatus, RetryEntry, RetryStatus, SkuMaster, Store, StoreSku, StoreSkuView,
};
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sku_master (
    sku_id TEXT PRIMARY KEY,
    original_sku TEXT,
    sku_name TEXT NOT NULL,
    allow_oversell INTEGER NOT NULL DEFAULT 0,
    environment TEXT NOT NULL DEFAULT 'prod',
    status TEXT NOT NULL DEFAULT 'active',
    extra_data TEXT NOT NULL DEFAULT '{}',
    aliases TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_sku_master_environment
    ON sku_master(environment);

CREATE TABLE IF NOT EXISTS stores (
    store_id TEXT PRIMARY KEY,
    store_name TEXT NOT NULL,
    platform_type TEXT NOT NULL,
    api_config TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'active',
    last_sku_sync_at TEXT,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS store_sku (
    store_id TEXT NOT NULL REFERENCES stores(store_id) ON DELETE CASCADE,
    sku_id TEXT NOT NULL REFERENCES sku_master(sku_id) ON DELETE CASCADE,
    registered_at TEXT NOT NULL,
    PRIMARY KEY (store_id, sku_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS inventory_events (
    event_id TEXT PRIMARY KEY,
    event_type TEXT NOT NULL,
    sku_id TEXT NOT NULL REFERENCES sku_master(sku_id),
    quantity INTEGER NOT NULL,
    store_id TEXT REFERENCES stores(store_id),
    platform_status TEXT,
    order_id TEXT,
    operator TEXT NOT NULL,
    reason TEXT,
    source TEXT NOT NULL,
    token TEXT UNIQUE,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_events_sku_id ON inventory_events(sku_id);
CREATE INDEX IF NOT EXISTS idx_events_created_at ON inventory_events(created_at);

CREATE TABLE IF NOT EXISTS inventory_snapshots (
    sku_id TEXT PRIMARY KEY REFERENCES sku_master(sku_id),
    internal_available INTEGER NOT NULL,
    last_event_id TEXT REFERENCES inventory_events(event_id),
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS order_confirm_retry (
    retry_id TEXT PRIMARY KEY,
    order_number TEXT NOT NULL,
    store_id TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    last_error TEXT,
    last_attempt_at INTEGER,
    next_attempt_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_retry_status ON order_confirm_retry(status);
CREATE INDEX IF NOT EXISTS idx_retry_next_attempt ON order_confirm_retry(next_attempt_at);

-- At most one pending entry per (order_number, store_id); failed entries are
-- historical and never revived.
CREATE UNIQUE INDEX IF NOT EXISTS uq_retry_pending
    ON order_confirm_retry(order_number, store_id) WHERE status = 'pending';
"#;

/// Handle to the SQLite-backed inventory store.
#[derive(Clone)]
pub struct InventoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl InventoryStore {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        Self::init(conn, db_path)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, db_path: &str) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("Inventory database initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run read or autocommit-write statements against the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> InventoryResult<T>,
    ) -> InventoryResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a single transaction. Any error rolls the whole
    /// transaction back. The connection lock spans the closure; callers must
    /// not await inside it.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Connection) -> InventoryResult<T>,
    ) -> InventoryResult<T> {
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(InventoryError::from)?;
        match f(&conn) {
            Ok(value) => {
                conn.execute("COMMIT", []).map_err(InventoryError::from)?;
                Ok(value)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SKU master

pub fn insert_sku(conn: &Connection, sku: &SkuMaster) -> InventoryResult<()> {
    conn.execute(
        "INSERT INTO sku_master
         (sku_id, original_sku, sku_name, allow_oversell, environment, status,
          extra_data, aliases, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            sku.sku_id,
            sku.original_sku,
            sku.sku_name,
            sku.allow_oversell as i64,
            sku.environment.as_str(),
            sku.status.as_str(),
            serde_json::to_string(&sku.extra_data)?,
            serde_json::to_string(&sku.aliases)?,
            sku.created_at.to_rfc3339(),
            sku.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_sku(conn: &Connection, sku_id: &str) -> InventoryResult<Option<SkuMaster>> {
    let mut stmt = conn.prepare_cached(
        "SELECT sku_id, original_sku, sku_name, allow_oversell, environment, status,
                extra_data, aliases, created_at, updated_at
         FROM sku_master WHERE sku_id = ?1 LIMIT 1",
    )?;
    let mut rows = stmt.query([sku_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_sku(row)?)),
        None => Ok(None),
    }
}

pub fn update_sku_status(
    conn: &Connection,
    sku_id: &str,
    status: RecordStatus,
) -> InventoryResult<bool> {
    let changed = conn.execute(
        "UPDATE sku_master SET status = ?1, updated_at = ?2 WHERE sku_id = ?3",
        params![status.as_str(), Utc::now().to_rfc3339(), sku_id],
    )?;
    Ok(changed > 0)
}

/// Overwrite the catalog-facing fields of a SKU (name, extra_data, aliases).
/// Identity fields and the oversell policy are untouched.
pub fn update_sku_catalog(
    conn: &Connection,
    sku_id: &str,
    sku_name: &str,
    extra_data: &HashMap<String, Value>,
    aliases: &HashMap<String, String>,
) -> InventoryResult<bool> {
    let changed = conn.execute(
        "UPDATE sku_master
         SET sku_name = ?1, extra_data = ?2, aliases = ?3, updated_at = ?4
         WHERE sku_id = ?5",
        params![
            sku_name,
            serde_json::to_string(extra_data)?,
            serde_json::to_string(aliases)?,
            Utc::now().to_rfc3339(),
            sku_id,
        ],
    )?;
    Ok(changed > 0)
}

/// Drop a SKU's event history and snapshot, leaving master, links and
/// attribute bags alone. Used when stock is re-initialized to an absolute
/// value.
pub fn clear_sku_history(conn: &Connection, sku_id: &str) -> InventoryResult<()> {
    conn.execute(
        "DELETE FROM inventory_snapshots WHERE sku_id = ?1",
        [sku_id],
    )?;
    conn.execute("DELETE FROM inventory_events WHERE sku_id = ?1", [sku_id])?;
    Ok(())
}

/// Logical SKU reset: drop every dependent row and blank the attribute bags.
/// The master row itself survives. Together with [`clear_sku_history`] this
/// is the only path that deletes event rows.
pub fn reset_sku_children(conn: &Connection, sku_id: &str) -> InventoryResult<()> {
    clear_sku_history(conn, sku_id)?;
    conn.execute("DELETE FROM store_sku WHERE sku_id = ?1", [sku_id])?;
    conn.execute(
        "UPDATE sku_master
         SET extra_data = '{}', aliases = '{}', updated_at = ?1
         WHERE sku_id = ?2",
        params![Utc::now().to_rfc3339(), sku_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Stores

pub fn insert_store(conn: &Connection, store: &Store) -> InventoryResult<()> {
    conn.execute(
        "INSERT INTO stores
         (store_id, store_name, platform_type, api_config, status,
          last_sku_sync_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            store.store_id,
            store.store_name,
            store.platform_type,
            serde_json::to_string(&store.api_config)?,
            store.status.as_str(),
            store.last_sku_sync_at.map(|t| t.to_rfc3339()),
            store.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_store(conn: &Connection, store_id: &str) -> InventoryResult<Option<Store>> {
    let mut stmt = conn.prepare_cached(
        "SELECT store_id, store_name, platform_type, api_config, status,
                last_sku_sync_at, created_at
         FROM stores WHERE store_id = ?1 LIMIT 1",
    )?;
    let mut rows = stmt.query([store_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_store(row)?)),
        None => Ok(None),
    }
}

/// Active stores of the given platform type, in stable id order.
pub fn list_active_stores(conn: &Connection, platform_type: &str) -> InventoryResult<Vec<Store>> {
    let mut stmt = conn.prepare_cached(
        "SELECT store_id, store_name, platform_type, api_config, status,
                last_sku_sync_at, created_at
         FROM stores
         WHERE status = 'active' AND platform_type = ?1
         ORDER BY store_id",
    )?;
    let stores = stmt
        .query_map([platform_type], row_to_store)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stores)
}

pub fn set_store_synced_at(
    conn: &Connection,
    store_id: &str,
    at: DateTime<Utc>,
) -> InventoryResult<bool> {
    let changed = conn.execute(
        "UPDATE stores SET last_sku_sync_at = ?1 WHERE store_id = ?2",
        params![at.to_rfc3339(), store_id],
    )?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Store-SKU membership

/// Idempotent membership insert. Returns true when a new link was created.
pub fn link_store_sku(conn: &Connection, store_id: &str, sku_id: &str) -> InventoryResult<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO store_sku (store_id, sku_id, registered_at)
         VALUES (?1, ?2, ?3)",
        params![store_id, sku_id, Utc::now().to_rfc3339()],
    )?;
    Ok(changed > 0)
}

pub fn get_store_sku(
    conn: &Connection,
    store_id: &str,
    sku_id: &str,
) -> InventoryResult<Option<StoreSku>> {
    let mut stmt = conn.prepare_cached(
        "SELECT store_id, sku_id, registered_at
         FROM store_sku WHERE store_id = ?1 AND sku_id = ?2 LIMIT 1",
    )?;
    let mut rows = stmt.query(params![store_id, sku_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(StoreSku {
            store_id: row.get(0)?,
            sku_id: row.get(1)?,
            registered_at: parse_ts(&row.get::<_, String>(2)?)?,
        })),
        None => Ok(None),
    }
}

pub fn store_ids_for_sku(conn: &Connection, sku_id: &str) -> InventoryResult<Vec<String>> {
    let mut stmt = conn
        .prepare_cached("SELECT store_id FROM store_sku WHERE sku_id = ?1 ORDER BY store_id")?;
    let ids = stmt
        .query_map([sku_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub fn sku_ids_for_store(conn: &Connection, store_id: &str) -> InventoryResult<Vec<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT sku_id FROM store_sku WHERE store_id = ?1 ORDER BY sku_id")?;
    let ids = stmt
        .query_map([store_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub fn store_skus(conn: &Connection, store_id: &str) -> InventoryResult<Vec<StoreSkuView>> {
    let mut stmt = conn.prepare_cached(
        "SELECT ss.store_id, ss.sku_id, m.sku_name, m.original_sku, ss.registered_at
         FROM store_sku ss
         JOIN sku_master m ON m.sku_id = ss.sku_id
         WHERE ss.store_id = ?1
         ORDER BY ss.sku_id",
    )?;
    let views = stmt
        .query_map([store_id], |row| {
            Ok(StoreSkuView {
                store_id: row.get(0)?,
                sku_id: row.get(1)?,
                sku_name: row.get(2)?,
                original_sku: row.get(3)?,
                registered_at: parse_ts(&row.get::<_, String>(4)?)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(views)
}

// ---------------------------------------------------------------------------
// Event log

/// Append one event. A token collision surfaces as
/// [`InventoryError::DuplicateToken`]; a missing SKU or store as
/// [`InventoryError::Integrity`].
pub fn insert_event(conn: &Connection, event: &InventoryEvent) -> InventoryResult<()> {
    conn.execute(
        "INSERT INTO inventory_events
         (event_id, event_type, sku_id, quantity, store_id, platform_status,
          order_id, operator, reason, source, token, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            event.event_id.to_string(),
            event.event_type.as_str(),
            event.sku_id,
            event.quantity,
            event.store_id,
            event.platform_status,
            event.order_id,
            event.operator,
            event.reason,
            event.source.as_str(),
            event.token,
            serde_json::to_string(&event.metadata)?,
            event.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_event_by_token(
    conn: &Connection,
    token: &str,
) -> InventoryResult<Option<InventoryEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM inventory_events WHERE token = ?1 LIMIT 1",
        EVENT_COLUMNS
    ))?;
    let mut rows = stmt.query([token])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_event(row)?)),
        None => Ok(None),
    }
}

/// Events for a SKU, newest first, optionally filtered by type.
pub fn events_for_sku(
    conn: &Connection,
    sku_id: &str,
    event_type: Option<EventType>,
    limit: usize,
    offset: usize,
) -> InventoryResult<Vec<InventoryEvent>> {
    let events = match event_type {
        Some(ty) => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM inventory_events
                 WHERE sku_id = ?1 AND event_type = ?2
                 ORDER BY created_at DESC, event_id
                 LIMIT ?3 OFFSET ?4",
                EVENT_COLUMNS
            ))?;
            let result = stmt.query_map(
                params![sku_id, ty.as_str(), limit as i64, offset as i64],
                row_to_event,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
            result
        }
        None => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM inventory_events
                 WHERE sku_id = ?1
                 ORDER BY created_at DESC, event_id
                 LIMIT ?2 OFFSET ?3",
                EVENT_COLUMNS
            ))?;
            let result = stmt.query_map(params![sku_id, limit as i64, offset as i64], row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            result
        }
    };
    Ok(events)
}

/// Sum of stock-altering event quantities for a SKU. Used by tests and
/// consistency checks against the materialized snapshot.
pub fn event_quantity_sum(conn: &Connection, sku_id: &str) -> InventoryResult<i64> {
    let sum: i64 = conn.query_row(
        "SELECT COALESCE(SUM(quantity), 0) FROM inventory_events
         WHERE sku_id = ?1
           AND event_type NOT IN ('API_ERROR', 'SYNC_FAILURE', 'ORDER_CONFIRMED')",
        [sku_id],
        |row| row.get(0),
    )?;
    Ok(sum)
}

// ---------------------------------------------------------------------------
// Snapshots

pub fn get_snapshot(conn: &Connection, sku_id: &str) -> InventoryResult<Option<InventorySnapshot>> {
    let mut stmt = conn.prepare_cached(
        "SELECT sku_id, internal_available, last_event_id, updated_at
         FROM inventory_snapshots WHERE sku_id = ?1 LIMIT 1",
    )?;
    let mut rows = stmt.query([sku_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_snapshot(row)?)),
        None => Ok(None),
    }
}

/// Set the accumulator value for a SKU, creating the snapshot row on first
/// stock-altering event.
pub fn upsert_snapshot(
    conn: &Connection,
    sku_id: &str,
    internal_available: i64,
    last_event_id: Uuid,
) -> InventoryResult<()> {
    conn.execute(
        "INSERT INTO inventory_snapshots (sku_id, internal_available, last_event_id, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(sku_id) DO UPDATE SET
            internal_available = excluded.internal_available,
            last_event_id = excluded.last_event_id,
            updated_at = excluded.updated_at",
        params![
            sku_id,
            internal_available,
            last_event_id.to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Confirm retry queue

pub fn insert_retry(conn: &Connection, entry: &RetryEntry) -> InventoryResult<()> {
    conn.execute(
        "INSERT INTO order_confirm_retry
         (retry_id, order_number, store_id, retry_count, max_retries, last_error,
          last_attempt_at, next_attempt_at, status, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.retry_id.to_string(),
            entry.order_number,
            entry.store_id,
            entry.retry_count,
            entry.max_retries,
            entry.last_error,
            entry.last_attempt_at,
            entry.next_attempt_at,
            entry.status.as_str(),
            serde_json::to_string(&entry.metadata)?,
            entry.created_at,
        ],
    )?;
    Ok(())
}

pub fn pending_retry_exists(
    conn: &Connection,
    order_number: &str,
    store_id: &str,
) -> InventoryResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM order_confirm_retry
         WHERE order_number = ?1 AND store_id = ?2 AND status = 'pending'",
        params![order_number, store_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Entries due for another confirm attempt at `now` (unix seconds).
pub fn due_retries(conn: &Connection, now: i64) -> InventoryResult<Vec<RetryEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT retry_id, order_number, store_id, retry_count, max_retries, last_error,
                last_attempt_at, next_attempt_at, status, metadata, created_at
         FROM order_confirm_retry
         WHERE status = 'pending' AND next_attempt_at <= ?1 AND retry_count < max_retries
         ORDER BY next_attempt_at, order_number",
    )?;
    let entries = stmt
        .query_map([now], row_to_retry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn retries_for_order(
    conn: &Connection,
    order_number: &str,
    store_id: &str,
) -> InventoryResult<Vec<RetryEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT retry_id, order_number, store_id, retry_count, max_retries, last_error,
                last_attempt_at, next_attempt_at, status, metadata, created_at
         FROM order_confirm_retry
         WHERE order_number = ?1 AND store_id = ?2
         ORDER BY created_at",
    )?;
    let entries = stmt
        .query_map(params![order_number, store_id], row_to_retry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Record a failed attempt: bump the count, stamp the error, and either
/// reschedule or terminate.
pub fn update_retry_attempt(
    conn: &Connection,
    retry_id: Uuid,
    retry_count: i64,
    last_error: &str,
    last_attempt_at: i64,
    next_attempt_at: i64,
    status: RetryStatus,
) -> InventoryResult<bool> {
    let changed = conn.execute(
        "UPDATE order_confirm_retry
         SET retry_count = ?1, last_error = ?2, last_attempt_at = ?3,
             next_attempt_at = ?4, status = ?5
         WHERE retry_id = ?6",
        params![
            retry_count,
            last_error,
            last_attempt_at,
            next_attempt_at,
            status.as_str(),
            retry_id.to_string(),
        ],
    )?;
    Ok(changed > 0)
}

pub fn mark_retry_failed(conn: &Connection, retry_id: Uuid) -> InventoryResult<bool> {
    let changed = conn.execute(
        "UPDATE order_confirm_retry SET status = 'failed' WHERE retry_id = ?1",
        [retry_id.to_string()],
    )?;
    Ok(changed > 0)
}

pub fn delete_retry(conn: &Connection, retry_id: Uuid) -> InventoryResult<bool> {
    let changed = conn.execute(
        "DELETE FROM order_confirm_retry WHERE retry_id = ?1",
        [retry_id.to_string()],
    )?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Row mapping

const EVENT_COLUMNS: &str = "event_id, event_type, sku_id, quantity, store_id, platform_status, \
                             order_id, operator, reason, source, token, metadata, created_at";

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn bad_value(what: &str, value: &str) -> rusqlite::Error {
    decode_err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("unrecognized {}: {}", what, value),
    ))
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(decode_err)
}

fn parse_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(decode_err)
}

#[inline]
fn row_to_sku(row: &rusqlite::Row) -> rusqlite::Result<SkuMaster> {
    let environment: String = row.get(4)?;
    let status: String = row.get(5)?;
    let extra_data: String = row.get(6)?;
    let aliases: String = row.get(7)?;

    Ok(SkuMaster {
        sku_id: row.get(0)?,
        original_sku: row.get(1)?,
        sku_name: row.get(2)?,
        allow_oversell: row.get::<_, i64>(3)? != 0,
        environment: Environment::parse(&environment)
            .ok_or_else(|| bad_value("environment", &environment))?,
        status: RecordStatus::parse(&status).ok_or_else(|| bad_value("status", &status))?,
        extra_data: serde_json::from_str(&extra_data).map_err(decode_err)?,
        aliases: serde_json::from_str(&aliases).map_err(decode_err)?,
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
        updated_at: parse_ts(&row.get::<_, String>(9)?)?,
    })
}

#[inline]
fn row_to_store(row: &rusqlite::Row) -> rusqlite::Result<Store> {
    let api_config: String = row.get(3)?;
    let status: String = row.get(4)?;
    let last_sync: Option<String> = row.get(5)?;

    Ok(Store {
        store_id: row.get(0)?,
        store_name: row.get(1)?,
        platform_type: row.get(2)?,
        api_config: serde_json::from_str::<ApiConfig>(&api_config).map_err(decode_err)?,
        status: RecordStatus::parse(&status).ok_or_else(|| bad_value("status", &status))?,
        last_sku_sync_at: last_sync.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
    })
}

#[inline]
fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<InventoryEvent> {
    let event_type: String = row.get(1)?;
    let source: String = row.get(9)?;
    let metadata: String = row.get(11)?;

    Ok(InventoryEvent {
        event_id: parse_uuid(&row.get::<_, String>(0)?)?,
        event_type: EventType::parse(&event_type)
            .ok_or_else(|| bad_value("event_type", &event_type))?,
        sku_id: row.get(2)?,
        quantity: row.get(3)?,
        store_id: row.get(4)?,
        platform_status: row.get(5)?,
        order_id: row.get(6)?,
        operator: row.get(7)?,
        reason: row.get(8)?,
        source: EventSource::parse(&source).ok_or_else(|| bad_value("source", &source))?,
        token: row.get(10)?,
        metadata: serde_json::from_str(&metadata).map_err(decode_err)?,
        created_at: parse_ts(&row.get::<_, String>(12)?)?,
    })
}

#[inline]
fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<InventorySnapshot> {
    let last_event: Option<String> = row.get(2)?;
    Ok(InventorySnapshot {
        sku_id: row.get(0)?,
        internal_available: row.get(1)?,
        last_event_id: last_event.as_deref().map(parse_uuid).transpose()?,
        updated_at: parse_ts(&row.get::<_, String>(3)?)?,
    })
}

#[inline]
fn row_to_retry(row: &rusqlite::Row) -> rusqlite::Result<RetryEntry> {
    let status: String = row.get(8)?;
    let metadata: String = row.get(9)?;
    Ok(RetryEntry {
        retry_id: parse_uuid(&row.get::<_, String>(0)?)?,
        order_number: row.get(1)?,
        store_id: row.get(2)?,
        retry_count: row.get(3)?,
        max_retries: row.get(4)?,
        last_error: row.get(5)?,
        last_attempt_at: row.get(6)?,
        next_attempt_at: row.get(7)?,
        status: RetryStatus::parse(&status).ok_or_else(|| bad_value("retry status", &status))?,
        metadata: serde_json::from_str(&metadata).map_err(decode_err)?,
        created_at: row.get(10)?,
    })
}
