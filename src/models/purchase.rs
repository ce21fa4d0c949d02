use serde::{Deserialize, Serialize};

use super::{IapSource, ProductId, PurchaseStatus};

/// One row per (vendor, identity key). The identity key is the token for
/// PlayStore and the original order id for everything else; see
/// `db::queries::purchase_id`.
///
/// `expiry_date` is the vendor-reported raw expiry. `end_date` is the
/// effective access end including any grace-period extension, so
/// `end_date >= expiry_date` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub source: IapSource,
    pub product_id: ProductId,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub original_order_id: String,
    pub status: PurchaseStatus,
    pub expiry_date: i64,
    pub end_date: i64,
    pub update_date: i64,

    // Paddle-only extras
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

/// Many-to-many join between purchases and user identities. One purchase may
/// be shared by several users (household, re-installs); one user may hold
/// several purchases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseUser {
    pub purchase_id: String,
    pub user_id: String,
    pub update_date: i64,
}

/// Created exactly once per purchase id, never overwritten: preserves the
/// true first-seen time even when the Purchase row is replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseExtra {
    pub purchase_id: String,
    pub create_date: i64,
}
