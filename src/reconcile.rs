//! Re-verification of stored purchases against the vendors.
//!
//! Two entry points: `force_reverify_user` serves an interactive status
//! request, `run_reverify_sweep` walks the purchase cache offline. Both
//! funnel through `reverify_purchase`, which asks the owning vendor for the
//! current subscription state and applies the answer through the store.
//!
//! Vendor calls and store writes are kept strictly apart: the gateway is
//! awaited first, then the answer is applied on the blocking pool, so no
//! database connection is ever alive across a suspension point.

use rusqlite::Connection;

use crate::cache::{self, CacheEntry};
use crate::config::Config;
use crate::db::{queries, with_store, DbPool};
use crate::error::Result;
use crate::models::{
    AppId, IapSource, PartialPurchase, Purchase, PurchaseStatus, VerifyStatus,
};
use crate::normalize::{filter_purchases, get_normalized_purchases};
use crate::util::{now_ms, random_log_key, MS_PER_DAY};
use crate::vendors::{self, GatewayOutcome, Gateways, PlanCache, RawVendorData};

/// Quiet period for grace purchases: Play keeps retrying payment on its own
/// schedule for up to this long past the access end, so asking earlier only
/// reads back the same answer.
pub const GRACE_RECHECK_AFTER_MS: i64 = 14 * MS_PER_DAY;

/// Quiet period for account-hold purchases; Play's recovery window.
pub const ON_HOLD_RECHECK_AFTER_MS: i64 = 45 * MS_PER_DAY;

/// A purchase that expired this close to its first sighting was a refund or
/// a sandbox run; the sweep stops asking about it.
const EARLY_EXPIRY_IGNORE_MS: i64 = 2 * MS_PER_DAY;

/// Whether a stored purchase could still change state and is worth asking
/// the vendor about.
///
/// A purchase whose access end is still ahead has nothing new to report; it
/// is picked up on the first sweep after the end passes. Recovery states get
/// their quiet period first, expired purchases are settled for good, and an
/// `Unknown` status is always worth another question.
pub fn needs_reverify(purchase: &Purchase, now: i64) -> bool {
    if purchase.status == PurchaseStatus::Unknown {
        return true;
    }
    if now <= purchase.end_date {
        return false;
    }
    match purchase.status {
        PurchaseStatus::Expired => false,
        PurchaseStatus::Grace => now - purchase.end_date > GRACE_RECHECK_AFTER_MS,
        PurchaseStatus::OnHold => now - purchase.end_date > ON_HOLD_RECHECK_AFTER_MS,
        _ => true,
    }
}

/// Ask the owning vendor for the current state of one purchase and apply
/// the answer. Returns what the vendor said and the updated row, if any.
///
/// UNKNOWN leaves stored state untouched by construction; only a definitive
/// vendor answer writes.
pub async fn reverify_purchase(
    pool: &DbPool,
    gateways: &Gateways,
    plans: &PlanCache,
    log_key: &str,
    purchase: &Purchase,
    user_id: Option<&str>,
    now: i64,
) -> Result<(VerifyStatus, Option<Purchase>)> {
    let outcome = match purchase.source {
        IapSource::Manual => {
            tracing::debug!("({}) Manual purchase, nothing to reverify", log_key);
            return Ok((VerifyStatus::Valid, None));
        }
        IapSource::AppStore => {
            let token = match purchase.token.as_deref() {
                Some(t) => t,
                None => {
                    tracing::warn!("({}) App Store purchase without stored receipt", log_key);
                    return Ok((VerifyStatus::Unknown, None));
                }
            };
            gateways
                .appstore
                .verify_receipt(log_key, purchase.product_id, token)
                .await
        }
        IapSource::PlayStore => {
            let token = match purchase.token.as_deref() {
                Some(t) => t,
                None => {
                    tracing::warn!("({}) Play Store purchase without token", log_key);
                    return Ok((VerifyStatus::Unknown, None));
                }
            };
            gateways
                .playstore
                .verify_subscription(log_key, purchase.product_id, token)
                .await
        }
        IapSource::Paddle => {
            let paddle_user_id = match purchase.paddle_user_id.as_deref() {
                Some(u) => u,
                None => {
                    tracing::warn!("({}) Paddle purchase without paddle user id", log_key);
                    return Ok((VerifyStatus::Unknown, None));
                }
            };
            let subscription_ids: Vec<u64> = purchase
                .original_order_id
                .parse::<u64>()
                .into_iter()
                .collect();
            gateways
                .paddle
                .verify_subscription(
                    log_key,
                    purchase.product_id,
                    purchase.token.as_deref().unwrap_or_default(),
                    paddle_user_id,
                    Some(&subscription_ids),
                )
                .await
        }
    };
    let outcome = match outcome {
        GatewayOutcome::Valid(raw) => GatewayOutcome::Valid(plans.attach(raw)),
        other => other,
    };

    let log_key = log_key.to_string();
    let purchase = purchase.clone();
    let user_id = user_id.map(String::from);
    with_store(pool, move |conn| {
        apply_vendor_answer(conn, &log_key, &purchase, user_id.as_deref(), outcome, now)
    })
    .await
}

/// Synchronous half of `reverify_purchase`: merge a vendor answer into the
/// store.
fn apply_vendor_answer(
    conn: &Connection,
    log_key: &str,
    purchase: &Purchase,
    user_id: Option<&str>,
    outcome: GatewayOutcome,
    now: i64,
) -> Result<(VerifyStatus, Option<Purchase>)> {
    let raw = match outcome {
        GatewayOutcome::Valid(raw) => raw,
        GatewayOutcome::Invalid => return Ok((VerifyStatus::Invalid, None)),
        GatewayOutcome::Unknown => return Ok((VerifyStatus::Unknown, None)),
    };

    match purchase.source {
        IapSource::Manual => Ok((VerifyStatus::Valid, None)),
        IapSource::AppStore => {
            let parsed = vendors::parse(log_key, &raw, now)?;
            let latest_receipt = match &raw {
                RawVendorData::AppStore { latest_receipt, .. } => latest_receipt.as_deref(),
                _ => None,
            };
            let updated = queries::update_purchase(
                conn,
                log_key,
                IapSource::AppStore,
                latest_receipt.or(purchase.token.as_deref()),
                &parsed,
            )?;
            Ok((VerifyStatus::Valid, Some(updated)))
        }
        IapSource::PlayStore => {
            let (product_id, data) = match &raw {
                RawVendorData::PlayStore { product_id, data } => (*product_id, data),
                _ => {
                    tracing::error!("({}) Play Store gateway returned foreign payload", log_key);
                    return Ok((VerifyStatus::Error, None));
                }
            };
            let token = purchase.token.as_deref().unwrap_or_default();
            if let Some(ack_result) = &data.ack_result {
                queries::save_acknowledge_log(
                    conn,
                    log_key,
                    user_id,
                    product_id,
                    token,
                    data.acknowledgement_state,
                    data.payment_state,
                    ack_result,
                )?;
            }
            let parsed = vendors::parse(log_key, &raw, now)?;
            let linked = data.linked_purchase_token.as_deref();
            let updated = match linked.filter(|l| !l.is_empty() && *l != token) {
                Some(linked_token) => queries::invalidate_purchase(
                    conn,
                    log_key,
                    IapSource::PlayStore,
                    token,
                    linked_token,
                    &parsed,
                )?,
                None => queries::update_purchase(
                    conn,
                    log_key,
                    IapSource::PlayStore,
                    Some(token),
                    &parsed,
                )?,
            };
            Ok((VerifyStatus::Valid, Some(updated)))
        }
        IapSource::Paddle => {
            let parsed = vendors::parse(log_key, &raw, now)?;
            let patch = PartialPurchase {
                product_id: Some(parsed.product_id),
                order_id: Some(parsed.order_id.clone()),
                token: parsed.token.clone(),
                status: Some(parsed.status),
                expiry_date: Some(parsed.expiry_date),
                end_date: Some(parsed.end_date),
                ..Default::default()
            };
            let updated = queries::update_partial_purchase(
                conn,
                log_key,
                user_id,
                &parsed.original_order_id,
                &patch,
            )?;
            Ok((VerifyStatus::Valid, Some(updated)))
        }
    }
}

/// Re-verify every purchase a user holds in one app, then return the
/// freshly normalized view. Forced: even purchases the sweep would leave
/// alone get asked about again.
///
/// Aggregation: any definitive vendor answer lets the request succeed with
/// current data; only an all-transient round reports UNKNOWN so the client
/// keeps its local state and retries.
pub async fn force_reverify_user(
    pool: &DbPool,
    gateways: &Gateways,
    plans: &PlanCache,
    log_key: &str,
    user_id: &str,
    app_id: AppId,
    now: i64,
) -> Result<(VerifyStatus, Vec<Purchase>)> {
    let owner = user_id.to_string();
    let purchases = with_store(pool, move |conn| queries::get_purchases(conn, &owner)).await?;
    let candidates = filter_purchases(purchases, app_id, now);

    let mut any_valid = false;
    let mut any_unknown = false;
    for purchase in &candidates {
        if purchase.source == IapSource::Manual {
            continue;
        }
        match reverify_purchase(pool, gateways, plans, log_key, purchase, Some(user_id), now)
            .await
        {
            Ok((VerifyStatus::Valid, _)) => any_valid = true,
            Ok((VerifyStatus::Invalid, _)) => {}
            Ok((VerifyStatus::Unknown, _)) | Ok((VerifyStatus::Error, _)) => any_unknown = true,
            Err(err) => {
                tracing::warn!("({}) Reverify failed: {}", log_key, err);
                any_unknown = true;
            }
        }
    }

    if any_unknown && !any_valid {
        return Ok((VerifyStatus::Unknown, Vec::new()));
    }

    let owner = user_id.to_string();
    let reloaded = with_store(pool, move |conn| queries::get_purchases(conn, &owner)).await?;
    let filtered = filter_purchases(reloaded, app_id, now);
    Ok((VerifyStatus::Valid, get_normalized_purchases(filtered)))
}

#[derive(Debug, Default)]
pub struct SweepStats {
    pub checked: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

fn sweep_should_skip(entry: &CacheEntry, config: &Config, now: i64) -> bool {
    if config.ignored_purchase_ids.contains(&entry.purchase_id) {
        return true;
    }
    // A shared purchase is only dropped when every holder is ignored.
    if !entry.user_ids.is_empty()
        && entry
            .user_ids
            .iter()
            .all(|u| config.ignored_user_ids.contains(u))
    {
        return true;
    }
    if let Some(paddle_user_id) = &entry.purchase.paddle_user_id {
        if config.ignored_paddle_user_ids.contains(paddle_user_id) {
            return true;
        }
    }
    if entry.purchase.source == IapSource::Manual {
        return true;
    }
    // Refunds and sandbox runs expire right after creation; asking the
    // vendor about them again yields nothing. Purchases first recorded
    // after their access end (end before create) are not that shape.
    if let Some(create_date) = entry.create_date {
        let lived = entry.purchase.end_date - create_date;
        if now > entry.purchase.end_date && (0..=EARLY_EXPIRY_IGNORE_MS).contains(&lived) {
            return true;
        }
    }
    !needs_reverify(&entry.purchase, now)
}

/// Walk the file-backed purchase cache and re-verify everything that could
/// still change state. Run from the CLI, not the request path.
pub async fn run_reverify_sweep(
    pool: &DbPool,
    gateways: &Gateways,
    plans: &PlanCache,
    config: &Config,
) -> Result<SweepStats> {
    let now = now_ms();
    let entries = {
        let conn = pool.get()?;
        cache::get_purchases(&conn, config, true)?
    };

    let mut stats = SweepStats::default();
    for entry in &entries {
        if sweep_should_skip(entry, config, now) {
            stats.skipped += 1;
            continue;
        }

        let log_key = random_log_key();
        let user_id = entry.user_ids.first().map(String::as_str);
        stats.checked += 1;
        match reverify_purchase(pool, gateways, plans, &log_key, &entry.purchase, user_id, now)
            .await
        {
            Ok((status, updated)) => {
                if updated.is_some() {
                    stats.updated += 1;
                }
                tracing::info!(
                    "({}) Reverified {}: {}",
                    log_key,
                    entry.purchase_id,
                    status
                );
            }
            Err(err) => {
                stats.failed += 1;
                tracing::error!(
                    "({}) Reverify of {} failed: {}",
                    log_key,
                    entry.purchase_id,
                    err
                );
            }
        }
    }

    tracing::info!(
        "Sweep done: {} checked, {} updated, {} skipped, {} failed",
        stats.checked,
        stats.updated,
        stats.skipped,
        stats.failed
    );
    Ok(stats)
}
