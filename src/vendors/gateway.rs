//! Vendor client boundary.
//!
//! The concrete vendor SDK/API work (Apple JWS chain verification, Play
//! Developer API calls, Paddle signature checks) lives behind these traits;
//! the core consumes their parsed output only. The INVALID/UNKNOWN split
//! matters: INVALID is a definitive vendor rejection, UNKNOWN a transient
//! failure that must leave stored state untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::ProductId;

use super::RawVendorData;

#[derive(Debug, Clone)]
pub enum GatewayOutcome {
    Valid(RawVendorData),
    Invalid,
    Unknown,
}

#[async_trait]
pub trait AppStoreGateway: Send + Sync {
    /// Verify a receipt with Apple and reduce it to the single
    /// auto-renewable subscription it should carry.
    async fn verify_receipt(
        &self,
        log_key: &str,
        product_id: ProductId,
        token: &str,
    ) -> GatewayOutcome;

    /// Verify and decode a signed server notification (JWS).
    async fn decode_notification(&self, log_key: &str, signed_payload: &str) -> GatewayOutcome;
}

#[async_trait]
pub trait PlayStoreGateway: Send + Sync {
    /// Fetch the subscription state for a purchase token, acknowledging the
    /// purchase if the vendor still expects it.
    async fn verify_subscription(
        &self,
        log_key: &str,
        product_id: ProductId,
        token: &str,
    ) -> GatewayOutcome;
}

#[async_trait]
pub trait PaddleGateway: Send + Sync {
    /// Look up the caller's transactions and reduce them to the most
    /// relevant subscription for this product/checkout. Passing
    /// `subscription_ids` restricts the lookup to specific subscriptions
    /// (used by the reverify sweep).
    async fn verify_subscription(
        &self,
        log_key: &str,
        product_id: ProductId,
        token: &str,
        paddle_user_id: &str,
        subscription_ids: Option<&[u64]>,
    ) -> GatewayOutcome;

    /// Check a webhook's signature against the vendor public key.
    fn verify_webhook_signature(&self, fields: &HashMap<String, String>) -> bool;
}

/// Shared handle to every vendor client, wired at the composition root.
#[derive(Clone)]
pub struct Gateways {
    pub appstore: Arc<dyn AppStoreGateway>,
    pub playstore: Arc<dyn PlayStoreGateway>,
    pub paddle: Arc<dyn PaddleGateway>,
}

/// Stand-in for a vendor whose credentials are not configured. Every call
/// reports UNKNOWN, the same answer the system gives while a vendor client
/// cannot authenticate: callers keep stored state and retry later.
pub struct NullGateway;

#[async_trait]
impl AppStoreGateway for NullGateway {
    async fn verify_receipt(
        &self,
        log_key: &str,
        _product_id: ProductId,
        _token: &str,
    ) -> GatewayOutcome {
        tracing::warn!("({}) App Store gateway not configured, return UNKNOWN", log_key);
        GatewayOutcome::Unknown
    }

    async fn decode_notification(&self, log_key: &str, _signed_payload: &str) -> GatewayOutcome {
        tracing::warn!("({}) App Store gateway not configured, return UNKNOWN", log_key);
        GatewayOutcome::Unknown
    }
}

#[async_trait]
impl PlayStoreGateway for NullGateway {
    async fn verify_subscription(
        &self,
        log_key: &str,
        _product_id: ProductId,
        _token: &str,
    ) -> GatewayOutcome {
        tracing::warn!("({}) Play Store gateway not configured, return UNKNOWN", log_key);
        GatewayOutcome::Unknown
    }
}

#[async_trait]
impl PaddleGateway for NullGateway {
    async fn verify_subscription(
        &self,
        log_key: &str,
        _product_id: ProductId,
        _token: &str,
        _paddle_user_id: &str,
        _subscription_ids: Option<&[u64]>,
    ) -> GatewayOutcome {
        tracing::warn!("({}) Paddle gateway not configured, return UNKNOWN", log_key);
        GatewayOutcome::Unknown
    }

    fn verify_webhook_signature(&self, _fields: &HashMap<String, String>) -> bool {
        false
    }
}

impl Gateways {
    /// All-null wiring; replaced per vendor as credentials are configured.
    pub fn unconfigured() -> Self {
        let null = Arc::new(NullGateway);
        Self {
            appstore: null.clone(),
            playstore: null.clone(),
            paddle: null,
        }
    }
}
