//! Per-vendor payload parsing and status classification.
//!
//! Each vendor exposes incompatible renewal/grace semantics; this module
//! maps them into the one normalized `PurchaseStatus`/`ParsedPurchase`
//! model so the rest of the system never branches on vendor quirks.

pub mod appstore;
mod gateway;
pub mod paddle;
pub mod plan_cache;
pub mod playstore;

pub use gateway::*;
pub use plan_cache::{PaddlePlan, PlanCache, PlanInterval};

use crate::error::Result;
use crate::models::{IapSource, ParsedPurchase, PurchaseStatus};

use appstore::AppStoreData;
use paddle::PaddleData;
use playstore::PlayStoreData;

/// Output of a vendor gateway's verification call, plus whatever request
/// context the parser needs (Play's API response does not echo the product
/// id; Paddle plan metadata rides along from the plan cache).
#[derive(Debug, Clone)]
pub enum RawVendorData {
    AppStore {
        data: AppStoreData,
        /// Most recent receipt returned by Apple; becomes the stored token.
        latest_receipt: Option<String>,
    },
    PlayStore {
        product_id: crate::models::ProductId,
        data: PlayStoreData,
    },
    Paddle {
        data: PaddleData,
        plan: Option<PaddlePlan>,
    },
}

impl RawVendorData {
    pub fn source(&self) -> IapSource {
        match self {
            RawVendorData::AppStore { .. } => IapSource::AppStore,
            RawVendorData::PlayStore { .. } => IapSource::PlayStore,
            RawVendorData::Paddle { .. } => IapSource::Paddle,
        }
    }
}

/// Normalize a vendor verify/notify payload into a `ParsedPurchase`.
///
/// Dispatches to the vendor-specific parser; `Manual` purchases have no
/// vendor payload and cannot be parsed.
pub fn parse(log_key: &str, raw: &RawVendorData, now: i64) -> Result<ParsedPurchase> {
    let parsed = match raw {
        RawVendorData::AppStore { data, .. } => appstore::parse(log_key, data, now)?,
        RawVendorData::PlayStore { product_id, data } => {
            playstore::parse(log_key, *product_id, data, now)?
        }
        RawVendorData::Paddle { data, plan } => paddle::parse(log_key, data, plan.as_ref(), now)?,
    };

    check_consistency(log_key, &parsed, now);
    Ok(parsed)
}

/// Soft consistency check: the classified status should agree with whether
/// `now` is before or after the effective access end. Vendor data oddities
/// are logged for out-of-band investigation, never failed on.
fn check_consistency(log_key: &str, parsed: &ParsedPurchase, now: i64) {
    let has_access = now <= parsed.end_date;
    if parsed.status.implies_access() != has_access
        && parsed.status != PurchaseStatus::Unknown
    {
        tracing::warn!(
            "({}) Status {} disagrees with endDate {} (now {})",
            log_key,
            parsed.status,
            parsed.end_date,
            now
        );
    }
}
