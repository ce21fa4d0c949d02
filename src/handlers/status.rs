//! Signed user-scoped endpoints: subscription status and data erasure.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::db::{queries, with_store, AppState};
use crate::error::Result;
use crate::models::{AppId, Purchase, VerifyStatus};
use crate::normalize::{filter_purchases, get_normalized_purchases};
use crate::reconcile;
use crate::util::{get_referrer, now_ms, random_log_key};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub user_id: String,
    pub app_id: AppId,
    /// Caller proof; see `crypto::verify_caller`.
    pub signature: String,
    /// Re-verify against the vendors before answering.
    #[serde(default, alias = "doForce")]
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: VerifyStatus,
    pub purchases: Vec<Purchase>,
}

fn check_referrer(
    log_key: &str,
    state: &AppState,
    headers: &HeaderMap,
) -> Option<StatusResponse> {
    let referrer = crate::util::get_referrer(headers)?;
    if state.allowed_origins.contains(&referrer) {
        return None;
    }
    tracing::warn!("({}) Unexpected referrer: {}", log_key, referrer);
    Some(StatusResponse {
        status: VerifyStatus::Error,
        purchases: Vec::new(),
    })
}

pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StatusRequest>,
) -> Result<Json<StatusResponse>> {
    let log_key = random_log_key();
    tracing::info!(
        "({}) /status: app {} user {} force {}",
        log_key,
        req.app_id,
        req.user_id,
        req.force
    );

    if let Some(rejected) = check_referrer(&log_key, &state, &headers) {
        return Ok(Json(rejected));
    }
    crypto::verify_caller(&req.user_id, &req.signature)?;

    let now = now_ms();

    let response = if req.force {
        let (status, purchases) = reconcile::force_reverify_user(
            &state.db,
            &state.gateways,
            &state.plan_cache,
            &log_key,
            &req.user_id,
            req.app_id,
            now,
        )
        .await?;
        StatusResponse { status, purchases }
    } else {
        let user_id = req.user_id.clone();
        let purchases =
            with_store(&state.db, move |conn| queries::get_purchases(conn, &user_id)).await?;
        let filtered = filter_purchases(purchases, req.app_id, now);
        StatusResponse {
            status: VerifyStatus::Valid,
            purchases: get_normalized_purchases(filtered),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAllRequest {
    pub user_id: String,
    pub app_id: AppId,
    pub signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAllResponse {
    pub status: VerifyStatus,
}

pub async fn delete_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteAllRequest>,
) -> Result<Json<DeleteAllResponse>> {
    let log_key = random_log_key();
    tracing::info!(
        "({}) /delete-all: app {} user {}",
        log_key,
        req.app_id,
        req.user_id
    );

    if let Some(referrer) = get_referrer(&headers) {
        if !state.allowed_origins.contains(&referrer) {
            tracing::warn!("({}) Unexpected referrer: {}", log_key, referrer);
            return Ok(Json(DeleteAllResponse {
                status: VerifyStatus::Error,
            }));
        }
    }
    crypto::verify_caller(&req.user_id, &req.signature)?;

    let key = log_key.clone();
    let user_id = req.user_id.clone();
    with_store(&state.db, move |conn| {
        queries::delete_all(conn, &key, &user_id, req.app_id)
    })
    .await?;

    Ok(Json(DeleteAllResponse {
        status: VerifyStatus::Valid,
    }))
}
