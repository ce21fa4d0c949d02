//! App Store subscription payloads.
//!
//! The gateway hands us one auto-renewable subscription already reduced
//! from Apple's receipt/notification formats. `expire_date` is the raw
//! expiry; `current_end_date` is the effective access end and already
//! includes any grace-period extension, so the two differ for this vendor.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ParsedPurchase, ProductId, PurchaseStatus};

/// Vendor subscription states as reported for App Store receipts.
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_GRACE_PERIOD: &str = "grace_period";
pub const STATUS_BILLING_RETRY: &str = "billing_retry_period";

const TERMINAL_STATUSES: &[&str] = &[
    "voluntary_cancel",
    "involuntary_cancel",
    "refunded",
    "upgraded",
    "other_not_active",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStoreData {
    /// Vendor subscription state (`active`, `grace_period`, ...)
    pub status: String,
    #[serde(default)]
    pub will_auto_renew: bool,
    pub product_id: String,
    /// Transaction id of the latest renewal; mutates on every renewal.
    pub latest_transaction_id: String,
    /// Stable across renewals; the identity key for this vendor.
    pub original_transaction_id: String,
    /// Raw expiry, epoch ms. Excludes grace period.
    pub expire_date: i64,
    /// Effective access end, epoch ms. Includes grace period.
    pub current_end_date: i64,
}

/// Decision table for App Store states. All boundaries are epoch-ms
/// comparisons on `current_end_date`.
pub fn classify(data: &AppStoreData, now: i64) -> PurchaseStatus {
    match data.status.as_str() {
        STATUS_ACTIVE => {
            if data.will_auto_renew {
                PurchaseStatus::Active
            } else {
                PurchaseStatus::NoRenew
            }
        }
        STATUS_GRACE_PERIOD | STATUS_BILLING_RETRY => {
            if now <= data.current_end_date {
                PurchaseStatus::Grace
            } else {
                PurchaseStatus::OnHold
            }
        }
        s if TERMINAL_STATUSES.contains(&s) => {
            if now > data.current_end_date {
                PurchaseStatus::Expired
            } else {
                PurchaseStatus::Unknown
            }
        }
        _ => PurchaseStatus::Unknown,
    }
}

pub fn parse(log_key: &str, data: &AppStoreData, now: i64) -> Result<ParsedPurchase> {
    let product_id: ProductId = data.product_id.parse().map_err(|_| {
        AppError::BadRequest(format!("Unknown productId: {}", data.product_id))
    })?;

    let status = classify(data, now);
    if status == PurchaseStatus::Unknown {
        tracing::warn!(
            "({}) Unknown App Store status: {} for {}",
            log_key,
            data.status,
            data.original_transaction_id
        );
    }

    // The grace period only ever extends access.
    let end_date = data.current_end_date.max(data.expire_date);

    Ok(ParsedPurchase {
        product_id,
        order_id: data.latest_transaction_id.clone(),
        original_order_id: data.original_transaction_id.clone(),
        token: None,
        status,
        expiry_date: data.expire_date,
        end_date,
    })
}
