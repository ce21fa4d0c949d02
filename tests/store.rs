mod common;

use subsync::db::queries;
use subsync::models::{
    AppId, IapSource, PartialPurchase, ProductId, PurchaseStatus,
};

use common::{parsed_purchase, setup_test_db};

#[test]
fn purchase_id_is_deterministic_per_source() {
    let play = queries::purchase_id(IapSource::PlayStore, Some("tok-1"), Some("GPA.1234")).unwrap();
    assert_eq!(play, "PlayStore_tok-1");

    let apple =
        queries::purchase_id(IapSource::AppStore, None, Some("1000000000000000")).unwrap();
    assert_eq!(apple, "AppStore_1000000000000000");

    let paddle = queries::purchase_id(IapSource::Paddle, Some("checkout-9"), Some("424242")).unwrap();
    assert_eq!(paddle, "Paddle_424242");
}

#[test]
fn purchase_id_requires_the_right_key() {
    assert!(queries::purchase_id(IapSource::PlayStore, None, Some("GPA.1234")).is_err());
    assert!(queries::purchase_id(IapSource::PlayStore, Some(""), Some("GPA.1234")).is_err());
    assert!(queries::purchase_id(IapSource::AppStore, Some("receipt"), None).is_err());
}

#[test]
fn add_purchase_creates_row_extra_and_user() {
    let conn = setup_test_db();
    let parsed = parsed_purchase(PurchaseStatus::Active, 2_000_000);

    let purchase = queries::add_purchase(
        &conn,
        "testkey",
        IapSource::AppStore,
        "user-a",
        Some("receipt-data"),
        &parsed,
    )
    .unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Active);
    assert_eq!(purchase.token.as_deref(), Some("receipt-data"));

    let id = "AppStore_1000000000000000";
    assert!(queries::get_purchase(&conn, id).unwrap().is_some());
    assert!(queries::get_purchase_extra(&conn, id).unwrap().is_some());

    let mine = queries::get_purchases(&conn, "user-a").unwrap();
    assert_eq!(mine.len(), 1);
    assert!(queries::get_purchases(&conn, "user-b").unwrap().is_empty());
}

#[test]
fn add_purchase_rejects_paddle() {
    let conn = setup_test_db();
    let parsed = parsed_purchase(PurchaseStatus::Active, 2_000_000);
    let result = queries::add_purchase(
        &conn,
        "testkey",
        IapSource::Paddle,
        "user-a",
        Some("checkout-1"),
        &parsed,
    );
    assert!(result.is_err());
}

#[test]
fn update_with_null_token_keeps_stored_token() {
    let conn = setup_test_db();
    let parsed = parsed_purchase(PurchaseStatus::Active, 2_000_000);
    queries::add_purchase(
        &conn,
        "testkey",
        IapSource::AppStore,
        "user-a",
        Some("original-receipt"),
        &parsed,
    )
    .unwrap();

    // A server notification carries no receipt.
    let notified = parsed_purchase(PurchaseStatus::NoRenew, 2_000_000);
    let updated =
        queries::update_purchase(&conn, "testkey", IapSource::AppStore, None, &notified).unwrap();

    assert_eq!(updated.status, PurchaseStatus::NoRenew);
    assert_eq!(updated.token.as_deref(), Some("original-receipt"));
}

#[test]
fn update_create_date_is_written_once() {
    let conn = setup_test_db();
    let parsed = parsed_purchase(PurchaseStatus::Active, 2_000_000);
    queries::add_purchase(
        &conn,
        "testkey",
        IapSource::AppStore,
        "user-a",
        Some("receipt"),
        &parsed,
    )
    .unwrap();

    let id = "AppStore_1000000000000000";
    let first = queries::get_purchase_extra(&conn, id).unwrap().unwrap();

    queries::update_purchase(&conn, "testkey", IapSource::AppStore, None, &parsed).unwrap();
    let second = queries::get_purchase_extra(&conn, id).unwrap().unwrap();
    assert_eq!(first.create_date, second.create_date);
}

#[test]
fn partial_update_merges_over_stored_fields() {
    let conn = setup_test_db();

    let initial = PartialPurchase {
        product_id: Some(ProductId::LumenboardSupporter),
        order_id: Some("5551234-001".to_string()),
        token: Some("checkout-1".to_string()),
        status: Some(PurchaseStatus::Active),
        expiry_date: Some(3_000_000),
        end_date: Some(3_000_000),
        paddle_user_id: Some("99001".to_string()),
        update_url: Some("https://vendor.example/update".to_string()),
        ..Default::default()
    };
    queries::update_partial_purchase(&conn, "testkey", Some("user-a"), "424242", &initial)
        .unwrap();

    // A cancellation event carries only status and dates.
    let cancellation = PartialPurchase {
        status: Some(PurchaseStatus::NoRenew),
        expiry_date: Some(4_000_000),
        end_date: Some(4_000_000),
        ..Default::default()
    };
    let merged =
        queries::update_partial_purchase(&conn, "testkey", None, "424242", &cancellation).unwrap();

    assert_eq!(merged.status, PurchaseStatus::NoRenew);
    assert_eq!(merged.end_date, 4_000_000);
    assert_eq!(merged.product_id, ProductId::LumenboardSupporter);
    assert_eq!(merged.order_id, "5551234-001");
    assert_eq!(merged.token.as_deref(), Some("checkout-1"));
    assert_eq!(merged.paddle_user_id.as_deref(), Some("99001"));
    assert_eq!(
        merged.update_url.as_deref(),
        Some("https://vendor.example/update")
    );
}

#[test]
fn partial_update_without_stored_row_needs_a_product() {
    let conn = setup_test_db();
    let patch = PartialPurchase {
        status: Some(PurchaseStatus::NoRenew),
        end_date: Some(4_000_000),
        ..Default::default()
    };
    let result = queries::update_partial_purchase(&conn, "testkey", None, "424242", &patch);
    assert!(result.is_err());
}

#[test]
fn partial_update_resolves_user_through_pre_registration() {
    let conn = setup_test_db();
    queries::add_paddle_pre(&conn, "user-a", "aZ09bQxY").unwrap();

    let patch = PartialPurchase {
        product_id: Some(ProductId::LumenboardSupporter),
        status: Some(PurchaseStatus::Active),
        expiry_date: Some(3_000_000),
        end_date: Some(3_000_000),
        random_id: Some("aZ09bQxY".to_string()),
        ..Default::default()
    };
    queries::update_partial_purchase(&conn, "testkey", None, "424242", &patch).unwrap();

    let mine = queries::get_purchases(&conn, "user-a").unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].original_order_id, "424242");
}

#[test]
fn invalidate_supersedes_and_carries_create_date() {
    let conn = setup_test_db();

    let parsed_old = common::parsed_play_purchase("GPA.1111-1111", PurchaseStatus::Active, 2_000_000);
    queries::add_purchase(
        &conn,
        "testkey",
        IapSource::PlayStore,
        "user-a",
        Some("old-token"),
        &parsed_old,
    )
    .unwrap();
    let old_extra = queries::get_purchase_extra(&conn, "PlayStore_old-token")
        .unwrap()
        .unwrap();

    let parsed_new = common::parsed_play_purchase("GPA.2222-2222", PurchaseStatus::Active, 9_000_000);
    queries::invalidate_purchase(
        &conn,
        "testkey",
        IapSource::PlayStore,
        "new-token",
        "old-token",
        &parsed_new,
    )
    .unwrap();

    assert!(queries::get_purchase(&conn, "PlayStore_old-token")
        .unwrap()
        .is_none());
    let replacement = queries::get_purchase(&conn, "PlayStore_new-token")
        .unwrap()
        .unwrap();
    assert_eq!(replacement.end_date, 9_000_000);

    let new_extra = queries::get_purchase_extra(&conn, "PlayStore_new-token")
        .unwrap()
        .unwrap();
    assert_eq!(new_extra.create_date, old_extra.create_date);

    // The user follows the purchase to its new identity.
    let mine = queries::get_purchases(&conn, "user-a").unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].token.as_deref(), Some("new-token"));
}

#[test]
fn invalidate_is_idempotent() {
    let conn = setup_test_db();

    let parsed_old = common::parsed_play_purchase("GPA.1111-1111", PurchaseStatus::Active, 2_000_000);
    queries::add_purchase(
        &conn,
        "testkey",
        IapSource::PlayStore,
        "user-a",
        Some("old-token"),
        &parsed_old,
    )
    .unwrap();

    let parsed_new = common::parsed_play_purchase("GPA.2222-2222", PurchaseStatus::Active, 9_000_000);
    for _ in 0..2 {
        queries::invalidate_purchase(
            &conn,
            "testkey",
            IapSource::PlayStore,
            "new-token",
            "old-token",
            &parsed_new,
        )
        .unwrap();
    }

    let users = queries::get_purchase_users(&conn, "PlayStore_new-token").unwrap();
    assert_eq!(users.len(), 1);
    assert!(queries::get_purchase(&conn, "PlayStore_old-token")
        .unwrap()
        .is_none());
}

#[test]
fn updated_queries_return_rows_in_update_order() {
    let conn = setup_test_db();
    for (token, order) in [("t1", "GPA.1111-1111"), ("t2", "GPA.2222-2222")] {
        let parsed = common::parsed_play_purchase(order, PurchaseStatus::Active, 2_000_000);
        queries::add_purchase(
            &conn,
            "testkey",
            IapSource::PlayStore,
            "user-a",
            Some(token),
            &parsed,
        )
        .unwrap();
    }

    let all = queries::get_updated_purchases(&conn, 0).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].update_date <= all[1].update_date);

    let later = queries::get_updated_purchases(&conn, all[1].update_date).unwrap();
    assert!(later.is_empty());
}

#[test]
fn delete_all_scopes_to_app_and_sole_ownership() {
    let conn = setup_test_db();

    // Solo purchase in the requester's app: deleted outright.
    let solo = parsed_purchase(PurchaseStatus::Active, 2_000_000);
    queries::add_purchase(
        &conn,
        "testkey",
        IapSource::AppStore,
        "user-a",
        Some("receipt-solo"),
        &solo,
    )
    .unwrap();

    // Shared purchase: only the requester's association goes.
    let shared = common::parsed_play_purchase("GPA.3333-3333", PurchaseStatus::Active, 2_000_000);
    for user in ["user-a", "user-b"] {
        queries::add_purchase(
            &conn,
            "testkey",
            IapSource::PlayStore,
            user,
            Some("shared-token"),
            &shared,
        )
        .unwrap();
    }

    // Purchase in the other app: untouched.
    let other_app = subsync::models::ParsedPurchase {
        product_id: ProductId::QuillpadSupporter,
        order_id: "2000000000000001".to_string(),
        original_order_id: "2000000000000000".to_string(),
        token: None,
        status: PurchaseStatus::Active,
        expiry_date: 2_000_000,
        end_date: 2_000_000,
    };
    queries::add_purchase(
        &conn,
        "testkey",
        IapSource::AppStore,
        "user-a",
        Some("receipt-other"),
        &other_app,
    )
    .unwrap();

    queries::delete_all(&conn, "testkey", "user-a", AppId::Lumenboard).unwrap();

    assert!(queries::get_purchase(&conn, "AppStore_1000000000000000")
        .unwrap()
        .is_none());
    assert!(queries::get_purchase(&conn, "PlayStore_shared-token")
        .unwrap()
        .is_some());
    assert!(queries::get_purchase(&conn, "AppStore_2000000000000000")
        .unwrap()
        .is_some());

    let remaining = queries::get_purchases(&conn, "user-a").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].product_id, ProductId::QuillpadSupporter);

    let theirs = queries::get_purchases(&conn, "user-b").unwrap();
    assert_eq!(theirs.len(), 1);
}

#[test]
fn paddle_pre_roundtrip() {
    let conn = setup_test_db();
    queries::add_paddle_pre(&conn, "user-a", "ranD0mId").unwrap();
    assert_eq!(
        queries::get_paddle_pre_user(&conn, "ranD0mId").unwrap(),
        Some("user-a".to_string())
    );
    assert_eq!(queries::get_paddle_pre_user(&conn, "missing").unwrap(), None);
}
