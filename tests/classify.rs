use subsync::models::PurchaseStatus;
use subsync::util::MS_PER_DAY;
use subsync::vendors::appstore::{self, AppStoreData};
use subsync::vendors::paddle::{self, PaddleData};
use subsync::vendors::playstore::{self, PlayStoreData};
use subsync::vendors::{PaddlePlan, PlanInterval};

fn appstore_data(status: &str, will_auto_renew: bool, end: i64) -> AppStoreData {
    AppStoreData {
        status: status.to_string(),
        will_auto_renew,
        product_id: "com.lumenboard.supporter".to_string(),
        latest_transaction_id: "1000000000000001".to_string(),
        original_transaction_id: "1000000000000000".to_string(),
        expire_date: end - MS_PER_DAY,
        current_end_date: end,
    }
}

#[test]
fn appstore_active_splits_on_renewal_intent() {
    let now = 1_000_000;
    let data = appstore_data("active", true, now + MS_PER_DAY);
    assert_eq!(appstore::classify(&data, now), PurchaseStatus::Active);

    let data = appstore_data("active", false, now + MS_PER_DAY);
    assert_eq!(appstore::classify(&data, now), PurchaseStatus::NoRenew);
}

#[test]
fn appstore_grace_boundary_is_inclusive() {
    let end = 10 * MS_PER_DAY;
    let data = appstore_data("grace_period", true, end);
    assert_eq!(appstore::classify(&data, end - 1000), PurchaseStatus::Grace);
    assert_eq!(appstore::classify(&data, end), PurchaseStatus::Grace);
    assert_eq!(appstore::classify(&data, end + 1000), PurchaseStatus::OnHold);
}

#[test]
fn appstore_billing_retry_follows_grace_rules() {
    let end = 10 * MS_PER_DAY;
    let data = appstore_data("billing_retry_period", true, end);
    assert_eq!(appstore::classify(&data, end - 1000), PurchaseStatus::Grace);
    assert_eq!(appstore::classify(&data, end + 1000), PurchaseStatus::OnHold);
}

#[test]
fn appstore_cancel_before_end_is_not_yet_expired() {
    let end = 10 * MS_PER_DAY;
    let data = appstore_data("voluntary_cancel", false, end);
    assert_eq!(appstore::classify(&data, end + 1000), PurchaseStatus::Expired);
    // A terminal state inside the paid period is vendor data we do not
    // fully understand; never report it as lapsed early.
    assert_eq!(appstore::classify(&data, end - 1000), PurchaseStatus::Unknown);
}

#[test]
fn appstore_parse_end_date_includes_grace_extension() {
    let now = 1_000_000;
    let mut data = appstore_data("grace_period", true, 20 * MS_PER_DAY);
    data.expire_date = 10 * MS_PER_DAY;
    let parsed = appstore::parse("testkey", &data, now).unwrap();
    assert_eq!(parsed.expiry_date, 10 * MS_PER_DAY);
    assert_eq!(parsed.end_date, 20 * MS_PER_DAY);
}

fn playstore_data(payment_state: Option<i64>, auto_renewing: bool, expiry: i64) -> PlayStoreData {
    PlayStoreData {
        order_id: "GPA.1111-1111-1111-11111..2".to_string(),
        payment_state,
        auto_renewing,
        expiry_time_millis: expiry.to_string(),
        linked_purchase_token: None,
        acknowledgement_state: Some(1),
        ack_result: None,
    }
}

#[test]
fn playstore_paid_states_split_on_renewal_intent() {
    let now = 1_000_000;
    let data = playstore_data(Some(1), true, now + MS_PER_DAY);
    assert_eq!(playstore::classify(&data, now), PurchaseStatus::Active);

    let data = playstore_data(Some(1), false, now + MS_PER_DAY);
    assert_eq!(playstore::classify(&data, now), PurchaseStatus::NoRenew);

    // Free trial and deferred payments count as paid.
    let data = playstore_data(Some(2), true, now + MS_PER_DAY);
    assert_eq!(playstore::classify(&data, now), PurchaseStatus::Active);
    let data = playstore_data(Some(3), true, now + MS_PER_DAY);
    assert_eq!(playstore::classify(&data, now), PurchaseStatus::Active);
}

#[test]
fn playstore_paid_past_expiry_with_renewal_is_paused() {
    let now = 10 * MS_PER_DAY;
    let data = playstore_data(Some(1), true, now - MS_PER_DAY);
    assert_eq!(playstore::classify(&data, now), PurchaseStatus::Paused);
}

#[test]
fn playstore_pending_payment_is_grace_then_on_hold() {
    let expiry = 10 * MS_PER_DAY;
    let data = playstore_data(Some(0), true, expiry);
    assert_eq!(playstore::classify(&data, expiry - 1000), PurchaseStatus::Grace);
    assert_eq!(playstore::classify(&data, expiry + 1000), PurchaseStatus::OnHold);
}

#[test]
fn playstore_lapsed_without_renewal_is_expired() {
    let now = 10 * MS_PER_DAY;
    let data = playstore_data(None, false, now - MS_PER_DAY);
    assert_eq!(playstore::classify(&data, now), PurchaseStatus::Expired);
}

#[test]
fn playstore_parse_strips_renewal_suffix() {
    let now = 1_000_000;
    let data = playstore_data(Some(1), true, now + MS_PER_DAY);
    let parsed = playstore::parse(
        "testkey",
        subsync::models::ProductId::LumenboardSupporter,
        &data,
        now,
    )
    .unwrap();
    assert_eq!(parsed.order_id, "GPA.1111-1111-1111-11111..2");
    assert_eq!(parsed.original_order_id, "GPA.1111-1111-1111-11111");
}

fn paddle_data(status: &str, payout_date: i64, payment_amount: f64) -> PaddleData {
    PaddleData {
        order_id: "5551234-001".to_string(),
        checkout_id: "11111111-aaaa".to_string(),
        subscription_id: "424242".to_string(),
        status: status.to_string(),
        product_id: subsync::models::ProductId::LumenboardSupporter,
        plan_id: Some(58231),
        paddle_user_id: Some("99001".to_string()),
        payout_date,
        payment_amount,
        next_payout_date: None,
        receipt_url: None,
    }
}

fn monthly_plan() -> PaddlePlan {
    PaddlePlan {
        id: 58231,
        interval: PlanInterval::Month,
        period: 1,
        trial_days: Some(14),
    }
}

#[test]
fn paddle_deleted_trial_ends_one_trial_length_after_payout() {
    let payout = 100 * MS_PER_DAY;
    let data = paddle_data("deleted", payout, 0.0);
    let end = paddle::derive_end_date(&data, Some(&monthly_plan()));
    assert_eq!(end, payout + 14 * MS_PER_DAY);
}

#[test]
fn paddle_deleted_trial_uses_default_trial_without_plan() {
    let payout = 100 * MS_PER_DAY;
    let data = paddle_data("deleted", payout, 0.0);
    let end = paddle::derive_end_date(&data, None);
    assert_eq!(end, payout + paddle::DEFAULT_TRIAL_MS);
}

#[test]
fn paddle_deleted_paid_runs_one_more_billing_cycle() {
    // 2024-01-15 00:00:00 UTC
    let payout = 1_705_276_800_000;
    let data = paddle_data("deleted", payout, 4.99);
    let end = paddle::derive_end_date(&data, Some(&monthly_plan()));
    // 2024-02-15 00:00:00 UTC
    assert_eq!(end, 1_707_955_200_000);
}

#[test]
fn paddle_live_subscription_keeps_access_until_next_payment() {
    let mut data = paddle_data("active", 100 * MS_PER_DAY, 4.99);
    data.next_payout_date = Some(130 * MS_PER_DAY);
    assert_eq!(
        paddle::derive_end_date(&data, Some(&monthly_plan())),
        130 * MS_PER_DAY
    );
}

#[test]
fn paddle_parse_reclassifies_deleted_with_future_end_as_no_renew() {
    let payout = 100 * MS_PER_DAY;
    let data = paddle_data("deleted", payout, 4.99);
    let now = payout + MS_PER_DAY;
    let parsed = paddle::parse("testkey", &data, Some(&monthly_plan()), now).unwrap();
    assert_eq!(parsed.status, PurchaseStatus::NoRenew);
    assert!(parsed.end_date > now);
}

#[test]
fn paddle_parse_reclassifies_lapsed_active_as_no_renew() {
    let mut data = paddle_data("active", 100 * MS_PER_DAY, 4.99);
    data.next_payout_date = Some(130 * MS_PER_DAY);
    let now = 131 * MS_PER_DAY;
    let parsed = paddle::parse("testkey", &data, Some(&monthly_plan()), now).unwrap();
    assert_eq!(parsed.status, PurchaseStatus::NoRenew);
}

#[test]
fn paddle_statuses_map_to_lifecycle() {
    assert_eq!(paddle::classify("active"), PurchaseStatus::Active);
    assert_eq!(paddle::classify("trialing"), PurchaseStatus::Active);
    assert_eq!(paddle::classify("past_due"), PurchaseStatus::Grace);
    assert_eq!(paddle::classify("paused"), PurchaseStatus::Paused);
    assert_eq!(paddle::classify("deleted"), PurchaseStatus::Expired);
    assert_eq!(paddle::classify("who-knows"), PurchaseStatus::Unknown);
}
