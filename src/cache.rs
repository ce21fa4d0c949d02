//! File-backed incremental snapshot of the purchase tables.
//!
//! Offline tooling (the reverify sweep, reporting) works against JSON
//! snapshots instead of holding long scans open on the live database. Each
//! sync pulls only rows updated since the snapshot's high-water mark, using
//! the same capped incremental queries a replica would. Dates are stored as
//! ISO-8601 strings so the files stay greppable.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::queries::{self, UPDATED_PAGE_LIMIT};
use crate::error::Result;
use crate::models::{IapSource, ProductId, Purchase, PurchaseStatus};

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Purchase row as it appears in the snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPurchase {
    pub source: IapSource,
    pub product_id: ProductId,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub original_order_id: String,
    pub status: PurchaseStatus,
    pub expiry_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paddle_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_url: Option<String>,
}

impl CachedPurchase {
    fn from_row(purchase: &Purchase, create_date: Option<i64>) -> Self {
        Self {
            source: purchase.source,
            product_id: purchase.product_id,
            order_id: purchase.order_id.clone(),
            token: purchase.token.clone(),
            original_order_id: purchase.original_order_id.clone(),
            status: purchase.status,
            expiry_date: ms_to_dt(purchase.expiry_date),
            end_date: ms_to_dt(purchase.end_date),
            update_date: ms_to_dt(purchase.update_date),
            create_date: create_date.map(ms_to_dt),
            paddle_user_id: purchase.paddle_user_id.clone(),
            random_id: purchase.random_id.clone(),
            receipt_url: purchase.receipt_url.clone(),
            update_url: purchase.update_url.clone(),
            cancel_url: purchase.cancel_url.clone(),
        }
    }

    fn to_purchase(&self) -> Purchase {
        Purchase {
            source: self.source,
            product_id: self.product_id,
            order_id: self.order_id.clone(),
            token: self.token.clone(),
            original_order_id: self.original_order_id.clone(),
            status: self.status,
            expiry_date: self.expiry_date.timestamp_millis(),
            end_date: self.end_date.timestamp_millis(),
            update_date: self.update_date.timestamp_millis(),
            paddle_user_id: self.paddle_user_id.clone(),
            random_id: self.random_id.clone(),
            receipt_url: self.receipt_url.clone(),
            update_url: self.update_url.clone(),
            cancel_url: self.cancel_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPurchaseUser {
    pub purchase_id: String,
    pub user_id: String,
    pub update_date: DateTime<Utc>,
}

/// One purchase with its snapshot metadata, ready for the sweep.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub purchase_id: String,
    pub purchase: Purchase,
    pub create_date: Option<i64>,
    pub user_ids: Vec<String>,
}

fn load_json<T: Default + for<'de> Deserialize<'de>>(path: &str) -> T {
    if !Path::new(path).exists() {
        return T::default();
    }
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                // The snapshot is rebuildable; a corrupt file just means a
                // full resync.
                tracing::warn!("Unreadable cache file {}, rebuilding: {}", path, err);
                T::default()
            }
        },
        Err(err) => {
            tracing::warn!("Cannot read cache file {}, rebuilding: {}", path, err);
            T::default()
        }
    }
}

fn save_json<T: Serialize>(path: &str, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn sync_purchases(
    conn: &Connection,
    map: &mut HashMap<String, CachedPurchase>,
) -> Result<usize> {
    let mut since = map
        .values()
        .map(|p| p.update_date.timestamp_millis())
        .max()
        .unwrap_or(0);
    let mut synced = 0;

    loop {
        let rows = queries::get_updated_purchases(conn, since)?;
        if rows.is_empty() {
            break;
        }

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(queries::purchase_id(
                row.source,
                row.token.as_deref(),
                Some(&row.original_order_id),
            )?);
        }
        let extras: HashMap<String, i64> = queries::get_purchase_extras(conn, &ids)?
            .into_iter()
            .map(|e| (e.purchase_id, e.create_date))
            .collect();

        let page_len = rows.len();
        for (id, row) in ids.into_iter().zip(rows) {
            since = since.max(row.update_date);
            // First-seen time never regresses: keep the snapshot's value
            // when the extras row is missing.
            let create_date = extras
                .get(&id)
                .copied()
                .or_else(|| map.get(&id).and_then(|p| p.create_date.map(|d| d.timestamp_millis())));
            map.insert(id, CachedPurchase::from_row(&row, create_date));
            synced += 1;
        }

        if page_len < UPDATED_PAGE_LIMIT as usize {
            break;
        }
    }

    Ok(synced)
}

fn sync_purchase_users(conn: &Connection, users: &mut Vec<CachedPurchaseUser>) -> Result<usize> {
    let mut map: HashMap<(String, String), CachedPurchaseUser> = users
        .drain(..)
        .map(|u| ((u.purchase_id.clone(), u.user_id.clone()), u))
        .collect();
    let mut since = map
        .values()
        .map(|u| u.update_date.timestamp_millis())
        .max()
        .unwrap_or(0);
    let mut synced = 0;

    loop {
        let rows = queries::get_updated_purchase_users(conn, since)?;
        let page_len = rows.len();
        for row in rows {
            since = since.max(row.update_date);
            map.insert(
                (row.purchase_id.clone(), row.user_id.clone()),
                CachedPurchaseUser {
                    purchase_id: row.purchase_id,
                    user_id: row.user_id,
                    update_date: ms_to_dt(row.update_date),
                },
            );
            synced += 1;
        }
        if page_len < UPDATED_PAGE_LIMIT as usize {
            break;
        }
    }

    *users = map.into_values().collect();
    users.sort_by(|a, b| {
        (a.purchase_id.as_str(), a.user_id.as_str())
            .cmp(&(b.purchase_id.as_str(), b.user_id.as_str()))
    });
    Ok(synced)
}

/// Pull rows updated since the last sync into the snapshot files.
pub fn sync(conn: &Connection, config: &Config) -> Result<()> {
    let mut purchases: HashMap<String, CachedPurchase> = load_json(&config.purchase_cache_path);
    let purchases_synced = sync_purchases(conn, &mut purchases)?;
    save_json(&config.purchase_cache_path, &purchases)?;

    let mut users: Vec<CachedPurchaseUser> = load_json(&config.purchase_user_cache_path);
    let users_synced = sync_purchase_users(conn, &mut users)?;
    save_json(&config.purchase_user_cache_path, &users)?;

    tracing::info!(
        "Cache sync: {} purchases, {} purchase users",
        purchases_synced,
        users_synced
    );
    Ok(())
}

/// Read the snapshot, optionally syncing it first, and join users onto
/// their purchases.
pub fn get_purchases(conn: &Connection, config: &Config, do_sync: bool) -> Result<Vec<CacheEntry>> {
    if do_sync {
        sync(conn, config)?;
    }

    let purchases: HashMap<String, CachedPurchase> = load_json(&config.purchase_cache_path);
    let users: Vec<CachedPurchaseUser> = load_json(&config.purchase_user_cache_path);

    let mut users_by_purchase: HashMap<&str, Vec<String>> = HashMap::new();
    for user in &users {
        users_by_purchase
            .entry(user.purchase_id.as_str())
            .or_default()
            .push(user.user_id.clone());
    }

    let mut entries: Vec<CacheEntry> = purchases
        .into_iter()
        .map(|(id, cached)| {
            let user_ids = users_by_purchase.remove(id.as_str()).unwrap_or_default();
            CacheEntry {
                purchase: cached.to_purchase(),
                create_date: cached.create_date.map(|d| d.timestamp_millis()),
                purchase_id: id,
                user_ids,
            }
        })
        .collect();
    entries.sort_by(|a, b| a.purchase_id.cmp(&b.purchase_id));
    Ok(entries)
}
