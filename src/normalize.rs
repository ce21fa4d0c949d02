//! Client-facing reduction of stored purchases.
//!
//! Storage keeps every row it has ever seen; what a client receives is
//! filtered to its app and recent activity, then deduplicated to one
//! best purchase per product.

use std::collections::HashMap;

use crate::models::{AppId, ProductId, Purchase};
use crate::util::MS_PER_DAY;

/// A purchase whose access ended this long ago no longer matters to a
/// client.
pub const STALE_AFTER_MS: i64 = 45 * MS_PER_DAY;

/// Tokens can run to kilobytes (App Store receipts); clients only need a
/// recognizable prefix.
pub const TOKEN_MAX_LEN: usize = 128;

/// Keep only purchases that belong to `app_id` and whose access either is
/// ongoing or ended within the staleness window.
pub fn filter_purchases(purchases: Vec<Purchase>, app_id: AppId, now: i64) -> Vec<Purchase> {
    purchases
        .into_iter()
        .filter(|p| p.product_id.app_id() == app_id)
        .filter(|p| now - p.end_date <= STALE_AFTER_MS)
        .collect()
}

fn rank(p: &Purchase) -> (u8, i64) {
    // Lower is better. Ties on status break toward the later access end.
    (p.status.priority(), -p.end_date)
}

/// Reduce to at most one purchase per product: the one with the
/// most-favorable status, later end date winning ties. Output tokens are
/// truncated for transport.
pub fn get_normalized_purchases(purchases: Vec<Purchase>) -> Vec<Purchase> {
    let mut best: HashMap<ProductId, Purchase> = HashMap::new();
    for p in purchases {
        match best.get(&p.product_id) {
            Some(current) if rank(current) <= rank(&p) => {}
            _ => {
                best.insert(p.product_id, p);
            }
        }
    }

    let mut result: Vec<Purchase> = best.into_values().collect();
    for p in &mut result {
        if let Some(token) = &mut p.token {
            if token.len() > TOKEN_MAX_LEN {
                token.truncate(TOKEN_MAX_LEN);
            }
        }
    }
    // Most relevant first: the purchase whose access runs the longest.
    result.sort_by(|a, b| b.end_date.cmp(&a.end_date));
    result
}
