use super::{ProductId, PurchaseStatus};

/// Canonical result of parsing one vendor verify/notify payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPurchase {
    pub product_id: ProductId,
    pub order_id: String,
    pub original_order_id: String,
    /// None for AppStore notification-only updates; the store keeps the
    /// previously seen token in that case.
    pub token: Option<String>,
    pub status: PurchaseStatus,
    pub expiry_date: i64,
    pub end_date: i64,
}

/// Sparse patch from a Paddle webhook; merged over whatever the store
/// already holds for the purchase id. Unset fields leave the stored value
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialPurchase {
    pub product_id: Option<ProductId>,
    pub order_id: Option<String>,
    pub token: Option<String>,
    pub status: Option<PurchaseStatus>,
    pub expiry_date: Option<i64>,
    pub end_date: Option<i64>,
    pub paddle_user_id: Option<String>,
    pub random_id: Option<String>,
    pub receipt_url: Option<String>,
    pub update_url: Option<String>,
    pub cancel_url: Option<String>,
}
