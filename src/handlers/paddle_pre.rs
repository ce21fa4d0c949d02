//! Paddle checkout pre-registration.
//!
//! Before opening a Paddle checkout the client registers a random
//! correlation id against its user id, then puts the same id into the
//! checkout passthrough. When the resulting webhooks arrive, the stored
//! mapping is how the purchase finds its user.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::VerifyStatus;
use crate::util::{get_referrer, random_log_key};

const RANDOM_ID_MIN_LEN: usize = 6;
const RANDOM_ID_MAX_LEN: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddlePreRequest {
    pub user_id: String,
    pub random_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddlePreResponse {
    pub status: VerifyStatus,
}

pub async fn paddle_pre(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PaddlePreRequest>,
) -> Result<Json<PaddlePreResponse>> {
    let log_key = random_log_key();
    tracing::info!("({}) /paddle/pre: user {}", log_key, req.user_id);

    if let Some(referrer) = get_referrer(&headers) {
        if !state.allowed_origins.contains(&referrer) {
            tracing::warn!("({}) Unexpected referrer: {}", log_key, referrer);
            return Ok(Json(PaddlePreResponse {
                status: VerifyStatus::Error,
            }));
        }
    }

    if req.user_id.is_empty() {
        return Err(AppError::BadRequest("Missing userId".to_string()));
    }
    let id_ok = (RANDOM_ID_MIN_LEN..=RANDOM_ID_MAX_LEN).contains(&req.random_id.len())
        && req.random_id.chars().all(|c| c.is_ascii_alphanumeric());
    if !id_ok {
        return Err(AppError::BadRequest("Invalid randomId".to_string()));
    }

    let conn = state.db.get()?;
    queries::add_paddle_pre(&conn, &req.user_id, &req.random_id)?;

    Ok(Json(PaddlePreResponse {
        status: VerifyStatus::Valid,
    }))
}
