//! Paddle subscription payloads.
//!
//! Paddle is the odd vendor out: it reports no access-end date once a
//! subscription is `deleted`, so the parser reconstructs one from the last
//! payment and the plan's billing interval. Webhooks may also carry only a
//! subset of fields (a cancellation event has no product id), which is what
//! the partial parse path is for.

use std::collections::HashMap;

use chrono::{DateTime, Days, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ParsedPurchase, PartialPurchase, ProductId, PurchaseStatus};
use crate::util::MS_PER_DAY;

use super::plan_cache::{PaddlePlan, PlanInterval};

/// Trial length assumed when the subscription plan is unavailable.
pub const DEFAULT_TRIAL_MS: i64 = 14 * MS_PER_DAY;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_TRIALING: &str = "trialing";
pub const STATUS_PAST_DUE: &str = "past_due";
pub const STATUS_PAUSED: &str = "paused";
pub const STATUS_DELETED: &str = "deleted";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddleData {
    /// Per-payment order id; mutates on renewal.
    pub order_id: String,
    /// Checkout id presented by the client; stored as the token.
    pub checkout_id: String,
    /// Stable subscription id; the identity key for this vendor.
    pub subscription_id: String,
    /// Vendor subscription state (`active`, `trialing`, `past_due`,
    /// `paused`, `deleted`).
    pub status: String,
    pub product_id: ProductId,
    #[serde(default)]
    pub plan_id: Option<u64>,
    #[serde(default)]
    pub paddle_user_id: Option<String>,
    /// Payout time of the most recent payment, epoch ms.
    pub payout_date: i64,
    /// Amount of the most recent payment; zero means the subscription never
    /// left its trial.
    pub payment_amount: f64,
    /// Scheduled next payment, epoch ms, when the vendor reports one.
    #[serde(default)]
    pub next_payout_date: Option<i64>,
    #[serde(default)]
    pub receipt_url: Option<String>,
}

/// Decision table for Paddle subscription states. Paddle reports no dates
/// alongside the state, so this table is date-free; the parser applies the
/// date-dependent overrides.
pub fn classify(status: &str) -> PurchaseStatus {
    match status {
        STATUS_ACTIVE | STATUS_TRIALING => PurchaseStatus::Active,
        STATUS_PAST_DUE => PurchaseStatus::Grace,
        STATUS_PAUSED => PurchaseStatus::Paused,
        STATUS_DELETED => PurchaseStatus::Expired,
        _ => PurchaseStatus::Unknown,
    }
}

/// Advance an epoch-ms instant by one billing cycle of `plan`, or by one
/// year when no plan metadata is available.
fn add_billing_interval(from_ms: i64, plan: Option<&PaddlePlan>) -> i64 {
    let from: DateTime<Utc> = match Utc.timestamp_millis_opt(from_ms).single() {
        Some(dt) => dt,
        None => return from_ms,
    };
    let advanced = match plan {
        Some(plan) => match plan.interval {
            PlanInterval::Day => from.checked_add_days(Days::new(plan.period as u64)),
            PlanInterval::Month => from.checked_add_months(Months::new(plan.period)),
            PlanInterval::Year => from.checked_add_months(Months::new(plan.period * 12)),
        },
        None => from.checked_add_months(Months::new(12)),
    };
    advanced.map(|dt| dt.timestamp_millis()).unwrap_or(from_ms)
}

fn trial_end(payout_date: i64, plan: Option<&PaddlePlan>) -> i64 {
    match plan.and_then(|p| p.trial_days) {
        Some(days) => payout_date + days as i64 * MS_PER_DAY,
        None => payout_date + DEFAULT_TRIAL_MS,
    }
}

/// Reconstruct the effective access end for a Paddle subscription.
///
/// For `deleted` subscriptions whose last payment was zero the user was on
/// a trial: access ends one trial length after the payout. For paid
/// cancellations the paid period runs one more billing cycle past the last
/// payout. Everything else keeps access until the next scheduled payment.
pub fn derive_end_date(data: &PaddleData, plan: Option<&PaddlePlan>) -> i64 {
    if data.status == STATUS_DELETED {
        if data.payment_amount == 0.0 {
            return trial_end(data.payout_date, plan);
        }
        return add_billing_interval(data.payout_date, plan);
    }

    match data.next_payout_date {
        Some(next) => next,
        None => add_billing_interval(data.payout_date, plan),
    }
}

pub fn parse(
    log_key: &str,
    data: &PaddleData,
    plan: Option<&PaddlePlan>,
    now: i64,
) -> Result<ParsedPurchase> {
    if data.subscription_id.is_empty() {
        return Err(AppError::BadRequest("Missing subscription_id".to_string()));
    }

    let end_date = derive_end_date(data, plan);
    let mut status = classify(&data.status);

    if status == PurchaseStatus::Unknown {
        tracing::warn!(
            "({}) Unknown Paddle status: {} for {}",
            log_key,
            data.status,
            data.subscription_id
        );
    }

    // A deleted subscription with a reconstructed end still in the future is
    // a cancellation taking effect at period end, not an immediate expiry.
    if status == PurchaseStatus::Expired && now <= end_date {
        status = PurchaseStatus::NoRenew;
    }
    // The reverse: reported active but the computed period already lapsed.
    if status == PurchaseStatus::Active && now > end_date {
        status = PurchaseStatus::NoRenew;
    }

    Ok(ParsedPurchase {
        product_id: data.product_id,
        order_id: data.order_id.clone(),
        original_order_id: data.subscription_id.clone(),
        token: Some(data.checkout_id.clone()),
        status,
        expiry_date: end_date,
        end_date,
    })
}

/// Paddle webhook timestamps: `YYYY-MM-DD HH:MM:SS` or bare `YYYY-MM-DD`,
/// implicitly UTC.
fn parse_webhook_date(value: &str) -> Option<i64> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt).timestamp_millis());
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let dt = d.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&dt).timestamp_millis());
    }
    None
}

/// The `passthrough` field carries whatever the client attached at checkout;
/// ours is a JSON object holding the pre-registered correlation id.
fn parse_passthrough_random_id(value: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(value).ok()?;
    parsed
        .get("randomId")
        .and_then(|v| v.as_str())
        .map(String::from)
}

/// Parse a (possibly sparse) Paddle webhook into a patch to merge over the
/// stored purchase. Returns the stable subscription id the purchase identity
/// derives from, plus the patch.
pub fn parse_partial(
    log_key: &str,
    fields: &HashMap<String, String>,
) -> Result<(String, PartialPurchase)> {
    let original_order_id = fields
        .get("subscription_id")
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| AppError::BadRequest("Missing subscription_id".to_string()))?;

    let mut patch = PartialPurchase::default();

    if let Some(plan) = fields.get("subscription_plan_id") {
        match plan.parse::<u64>().ok().and_then(ProductId::from_paddle_plan) {
            Some(product_id) => patch.product_id = Some(product_id),
            None => {
                tracing::warn!("({}) Unknown Paddle plan id: {}", log_key, plan);
            }
        }
    }
    if let Some(order_id) = fields.get("order_id") {
        patch.order_id = Some(order_id.clone());
    }
    if let Some(checkout_id) = fields.get("checkout_id") {
        patch.token = Some(checkout_id.clone());
    }

    let cancellation = fields
        .get("cancellation_effective_date")
        .and_then(|v| parse_webhook_date(v));
    let next_bill = fields.get("next_bill_date").and_then(|v| parse_webhook_date(v));

    if let Some(expiry) = cancellation.or(next_bill) {
        let mut status = fields
            .get("status")
            .map(|s| classify(s))
            .unwrap_or(PurchaseStatus::Unknown);
        // A cancellation with an effective date in the future keeps access
        // until that date; the subscription just will not renew.
        if cancellation.is_some() && status == PurchaseStatus::Active {
            status = PurchaseStatus::NoRenew;
        }

        patch.status = Some(status);
        patch.expiry_date = Some(expiry);
        patch.end_date = Some(expiry);
    }

    if let Some(user_id) = fields.get("user_id") {
        patch.paddle_user_id = Some(user_id.clone());
    }
    if let Some(passthrough) = fields.get("passthrough") {
        patch.random_id = parse_passthrough_random_id(passthrough);
    }
    if let Some(url) = fields.get("receipt_url") {
        patch.receipt_url = Some(url.clone());
    }
    if let Some(url) = fields.get("update_url") {
        patch.update_url = Some(url.clone());
    }
    if let Some(url) = fields.get("cancel_url") {
        patch.cancel_url = Some(url.clone());
    }

    Ok((original_order_id, patch))
}
