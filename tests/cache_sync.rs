mod common;

use subsync::cache;
use subsync::config::Config;
use subsync::db::queries;
use subsync::models::{IapSource, ProductId, PurchaseStatus};
use subsync::reconcile::run_reverify_sweep;
use subsync::util::{now_ms, MS_PER_DAY};
use subsync::vendors::playstore::PlayStoreData;
use subsync::vendors::{GatewayOutcome, PlanCache, RawVendorData};

use common::{fixed_gateways, parsed_play_purchase, setup_test_db, setup_test_pool};

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: String::new(),
        purchase_cache_path: dir
            .path()
            .join("purchases.json")
            .to_string_lossy()
            .into_owned(),
        purchase_user_cache_path: dir
            .path()
            .join("purchase_users.json")
            .to_string_lossy()
            .into_owned(),
        allowed_origins: Vec::new(),
        ignored_purchase_ids: Vec::new(),
        ignored_user_ids: Vec::new(),
        ignored_paddle_user_ids: Vec::new(),
    }
}

fn seed(
    conn: &rusqlite::Connection,
    token: &str,
    order: &str,
    user: &str,
    status: PurchaseStatus,
    expiry: i64,
) {
    let parsed = parsed_play_purchase(order, status, expiry);
    queries::add_purchase(conn, "testkey", IapSource::PlayStore, user, Some(token), &parsed)
        .unwrap();
}

fn valid_play_gateways(expiry: i64) -> subsync::vendors::Gateways {
    let raw = RawVendorData::PlayStore {
        product_id: ProductId::LumenboardSupporter,
        data: PlayStoreData {
            order_id: "GPA.1111-1111..1".to_string(),
            payment_state: Some(1),
            auto_renewing: true,
            expiry_time_millis: expiry.to_string(),
            linked_purchase_token: None,
            acknowledgement_state: Some(1),
            ack_result: None,
        },
    };
    fixed_gateways(
        GatewayOutcome::Unknown,
        GatewayOutcome::Valid(raw),
        GatewayOutcome::Unknown,
    )
}

fn unknown_gateways() -> subsync::vendors::Gateways {
    fixed_gateways(
        GatewayOutcome::Unknown,
        GatewayOutcome::Unknown,
        GatewayOutcome::Unknown,
    )
}

#[test]
fn sync_builds_and_extends_the_snapshot() {
    let conn = setup_test_db();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let expiry = now_ms() + 30 * MS_PER_DAY;

    seed(&conn, "t1", "GPA.1111-1111", "user-a", PurchaseStatus::Active, expiry);
    seed(&conn, "t2", "GPA.2222-2222", "user-a", PurchaseStatus::Active, expiry);

    let entries = cache::get_purchases(&conn, &config, true).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.create_date.is_some()));
    assert!(entries.iter().all(|e| e.user_ids == vec!["user-a".to_string()]));

    // Incremental: a later purchase appears on the next sync.
    seed(&conn, "t3", "GPA.3333-3333", "user-a", PurchaseStatus::Active, expiry);
    let entries = cache::get_purchases(&conn, &config, true).unwrap();
    assert_eq!(entries.len(), 3);

    // Reading without sync serves the snapshot as-is.
    seed(&conn, "t4", "GPA.4444-4444", "user-a", PurchaseStatus::Active, expiry);
    let entries = cache::get_purchases(&conn, &config, false).unwrap();
    assert_eq!(entries.len(), 3);
}

#[test]
fn corrupt_snapshot_is_rebuilt() {
    let conn = setup_test_db();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let expiry = now_ms() + 30 * MS_PER_DAY;

    seed(&conn, "t1", "GPA.1111-1111", "user-a", PurchaseStatus::Active, expiry);
    cache::sync(&conn, &config).unwrap();

    std::fs::write(&config.purchase_cache_path, "{ not json").unwrap();
    let entries = cache::get_purchases(&conn, &config, true).unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn sweep_rechecks_a_stale_grace_purchase() {
    let (pool, _db) = setup_test_pool();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let now = now_ms();

    {
        let conn = pool.get().unwrap();
        seed(
            &conn,
            "t1",
            "GPA.1111-1111",
            "user-a",
            PurchaseStatus::Grace,
            now - 20 * MS_PER_DAY,
        );
    }

    let gateways = valid_play_gateways(now + 35 * MS_PER_DAY);
    let plans = PlanCache::new();
    let stats = run_reverify_sweep(&pool, &gateways, &plans, &config)
        .await
        .unwrap();
    assert_eq!(stats.checked, 1);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.failed, 0);

    let conn = pool.get().unwrap();
    let stored = queries::get_purchase(&conn, "PlayStore_t1").unwrap().unwrap();
    assert_eq!(stored.end_date, now + 35 * MS_PER_DAY);
    assert_eq!(stored.status, PurchaseStatus::Active);
}

#[tokio::test]
async fn sweep_leaves_healthy_purchases_alone() {
    let (pool, _db) = setup_test_pool();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let now = now_ms();

    {
        let conn = pool.get().unwrap();
        seed(
            &conn,
            "t1",
            "GPA.1111-1111",
            "user-a",
            PurchaseStatus::Active,
            now + 20 * MS_PER_DAY,
        );
    }

    let gateways = valid_play_gateways(now + 35 * MS_PER_DAY);
    let plans = PlanCache::new();
    let stats = run_reverify_sweep(&pool, &gateways, &plans, &config)
        .await
        .unwrap();
    assert_eq!(stats.checked, 0);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn sweep_defers_grace_inside_the_quiet_period() {
    let (pool, _db) = setup_test_pool();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let now = now_ms();

    {
        let conn = pool.get().unwrap();
        seed(
            &conn,
            "t1",
            "GPA.1111-1111",
            "user-a",
            PurchaseStatus::Grace,
            now - 5 * MS_PER_DAY,
        );
    }

    let plans = PlanCache::new();
    let stats = run_reverify_sweep(&pool, &unknown_gateways(), &plans, &config)
        .await
        .unwrap();
    assert_eq!(stats.checked, 0);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn sweep_rechecks_unknown_status_regardless_of_end_date() {
    let (pool, _db) = setup_test_pool();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let now = now_ms();

    {
        let conn = pool.get().unwrap();
        seed(
            &conn,
            "t1",
            "GPA.1111-1111",
            "user-a",
            PurchaseStatus::Unknown,
            now + 5 * MS_PER_DAY,
        );
    }

    let plans = PlanCache::new();
    let stats = run_reverify_sweep(&pool, &unknown_gateways(), &plans, &config)
        .await
        .unwrap();
    assert_eq!(stats.checked, 1);
}

#[tokio::test]
async fn sweep_honors_ignore_lists_and_settled_expiries() {
    let (pool, _db) = setup_test_pool();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    let now = now_ms();

    {
        let conn = pool.get().unwrap();
        // Would be rechecked if it were not on the ignore list.
        seed(
            &conn,
            "t1",
            "GPA.1111-1111",
            "user-a",
            PurchaseStatus::Grace,
            now - 20 * MS_PER_DAY,
        );
        seed(
            &conn,
            "t2",
            "GPA.2222-2222",
            "user-a",
            PurchaseStatus::Expired,
            now - 60 * MS_PER_DAY,
        );
    }
    config.ignored_purchase_ids = vec!["PlayStore_t1".to_string()];

    let plans = PlanCache::new();
    let stats = run_reverify_sweep(&pool, &unknown_gateways(), &plans, &config)
        .await
        .unwrap();
    assert_eq!(stats.checked, 0);
    assert_eq!(stats.skipped, 2);
}

#[tokio::test]
async fn sweep_skips_only_when_every_holder_is_ignored() {
    let (pool, _db) = setup_test_pool();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    let now = now_ms();

    {
        let conn = pool.get().unwrap();
        // Sole holder ignored: skipped.
        seed(
            &conn,
            "t1",
            "GPA.1111-1111",
            "user-a",
            PurchaseStatus::Grace,
            now - 20 * MS_PER_DAY,
        );
        // Shared with a non-ignored holder: still checked.
        seed(
            &conn,
            "t2",
            "GPA.2222-2222",
            "user-a",
            PurchaseStatus::Grace,
            now - 20 * MS_PER_DAY,
        );
        seed(
            &conn,
            "t2",
            "GPA.2222-2222",
            "user-b",
            PurchaseStatus::Grace,
            now - 20 * MS_PER_DAY,
        );
    }
    config.ignored_user_ids = vec!["user-a".to_string()];

    let gateways = valid_play_gateways(now + 35 * MS_PER_DAY);
    let plans = PlanCache::new();
    let stats = run_reverify_sweep(&pool, &gateways, &plans, &config)
        .await
        .unwrap();
    assert_eq!(stats.checked, 1);
    assert_eq!(stats.skipped, 1);
}
