//! Play Store subscription payloads.
//!
//! The gateway forwards Google's `SubscriptionPurchase` resource. The
//! purchase token is the identity key for this vendor; the order id gains a
//! `..N` suffix on every renewal.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ParsedPurchase, ProductId, PurchaseStatus};

// paymentState values from the Play Developer API.
const PAYMENT_PENDING: i64 = 0;
const PAYMENT_RECEIVED: i64 = 1;
const PAYMENT_FREE_TRIAL: i64 = 2;
const PAYMENT_PENDING_DEFERRED: i64 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayStoreData {
    pub order_id: String,
    /// Absent once the subscription is expired.
    #[serde(default)]
    pub payment_state: Option<i64>,
    #[serde(default)]
    pub auto_renewing: bool,
    /// Google reports this as a decimal string.
    pub expiry_time_millis: String,
    /// Set when this purchase supersedes an earlier one (plan change).
    #[serde(default)]
    pub linked_purchase_token: Option<String>,
    #[serde(default)]
    pub acknowledgement_state: Option<i64>,
    /// Filled by the gateway after it attempts acknowledgement
    /// (`DoneAck`, `CantAck`, `CantAck_<http status>`); `None` when no
    /// acknowledgement was needed.
    #[serde(default)]
    pub ack_result: Option<String>,
}

impl PlayStoreData {
    pub fn expiry_ms(&self) -> i64 {
        self.expiry_time_millis.parse().unwrap_or(0)
    }
}

fn is_paid_state(payment_state: Option<i64>) -> bool {
    matches!(
        payment_state,
        Some(PAYMENT_RECEIVED) | Some(PAYMENT_FREE_TRIAL) | Some(PAYMENT_PENDING_DEFERRED)
    )
}

/// Decision table for Play Store states. Boundaries are epoch-ms
/// comparisons on `expiryTimeMillis`.
pub fn classify(data: &PlayStoreData, now: i64) -> PurchaseStatus {
    let expiry = data.expiry_ms();
    let in_period = now <= expiry;

    if is_paid_state(data.payment_state) {
        if in_period {
            return if data.auto_renewing {
                PurchaseStatus::Active
            } else {
                PurchaseStatus::NoRenew
            };
        }
        if data.auto_renewing {
            return PurchaseStatus::Paused;
        }
    }

    if data.payment_state == Some(PAYMENT_PENDING) && data.auto_renewing {
        return if in_period {
            PurchaseStatus::Grace
        } else {
            PurchaseStatus::OnHold
        };
    }

    if !data.auto_renewing && !in_period {
        return PurchaseStatus::Expired;
    }

    PurchaseStatus::Unknown
}

/// The base order id is stable across renewals; Google appends `..N` for
/// each renewal cycle.
pub fn base_order_id(order_id: &str) -> &str {
    match order_id.find("..") {
        Some(idx) => &order_id[..idx],
        None => order_id,
    }
}

pub fn parse(
    log_key: &str,
    product_id: ProductId,
    data: &PlayStoreData,
    now: i64,
) -> Result<ParsedPurchase> {
    if data.order_id.is_empty() {
        return Err(AppError::BadRequest("Missing orderId".to_string()));
    }

    let status = classify(data, now);
    if status == PurchaseStatus::Unknown {
        tracing::warn!(
            "({}) Unknown Play Store state: paymentState={:?} autoRenewing={} for {}",
            log_key,
            data.payment_state,
            data.auto_renewing,
            data.order_id
        );
    }

    let expiry = data.expiry_ms();

    Ok(ParsedPurchase {
        product_id,
        order_id: data.order_id.clone(),
        original_order_id: base_order_id(&data.order_id).to_string(),
        token: None,
        status,
        expiry_date: expiry,
        end_date: expiry,
    })
}
