#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;

use subsync::db::{init_db, AppState, DbPool};
use subsync::models::{ParsedPurchase, ProductId, PurchaseStatus};
use subsync::vendors::{
    AppStoreGateway, GatewayOutcome, Gateways, PaddleGateway, PlayStoreGateway,
};

pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_db(&conn).unwrap();
    conn
}

/// Connection pool over a temp-file database, for code paths that hand
/// store work to the blocking pool. Returns the tempfile so it outlives
/// the pool.
pub fn setup_test_pool() -> (DbPool, tempfile::NamedTempFile) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let pool = subsync::db::create_pool(db_file.path().to_str().unwrap()).unwrap();
    let conn = pool.get().unwrap();
    init_db(&conn).unwrap();
    drop(conn);
    (pool, db_file)
}

pub fn parsed_purchase(status: PurchaseStatus, expiry_date: i64) -> ParsedPurchase {
    ParsedPurchase {
        product_id: ProductId::LumenboardSupporter,
        order_id: "1000000000000001".to_string(),
        original_order_id: "1000000000000000".to_string(),
        token: None,
        status,
        expiry_date,
        end_date: expiry_date,
    }
}

pub fn parsed_play_purchase(order_id: &str, status: PurchaseStatus, expiry_date: i64) -> ParsedPurchase {
    ParsedPurchase {
        product_id: ProductId::LumenboardSupporter,
        order_id: order_id.to_string(),
        original_order_id: order_id.split("..").next().unwrap_or(order_id).to_string(),
        token: None,
        status,
        expiry_date,
        end_date: expiry_date,
    }
}

/// Gateway double answering every call with one canned outcome.
pub struct FixedGateway(pub GatewayOutcome);

#[async_trait]
impl AppStoreGateway for FixedGateway {
    async fn verify_receipt(
        &self,
        _log_key: &str,
        _product_id: ProductId,
        _token: &str,
    ) -> GatewayOutcome {
        self.0.clone()
    }

    async fn decode_notification(&self, _log_key: &str, _signed_payload: &str) -> GatewayOutcome {
        self.0.clone()
    }
}

#[async_trait]
impl PlayStoreGateway for FixedGateway {
    async fn verify_subscription(
        &self,
        _log_key: &str,
        _product_id: ProductId,
        _token: &str,
    ) -> GatewayOutcome {
        self.0.clone()
    }
}

#[async_trait]
impl PaddleGateway for FixedGateway {
    async fn verify_subscription(
        &self,
        _log_key: &str,
        _product_id: ProductId,
        _token: &str,
        _paddle_user_id: &str,
        _subscription_ids: Option<&[u64]>,
    ) -> GatewayOutcome {
        self.0.clone()
    }

    fn verify_webhook_signature(&self, _fields: &HashMap<String, String>) -> bool {
        true
    }
}

pub fn fixed_gateways(
    appstore: GatewayOutcome,
    playstore: GatewayOutcome,
    paddle: GatewayOutcome,
) -> Gateways {
    Gateways {
        appstore: Arc::new(FixedGateway(appstore)),
        playstore: Arc::new(FixedGateway(playstore)),
        paddle: Arc::new(FixedGateway(paddle)),
    }
}

/// Full application state over a temp-file database, for router tests.
/// Returns the tempfile so it outlives the pool.
pub fn setup_test_state(gateways: Gateways) -> (AppState, tempfile::NamedTempFile) {
    let (pool, db_file) = setup_test_pool();
    let state = AppState {
        db: pool,
        gateways,
        plan_cache: Arc::new(subsync::vendors::PlanCache::new()),
        allowed_origins: Arc::new(vec!["http://localhost:8080".to_string()]),
    };
    (state, db_file)
}
