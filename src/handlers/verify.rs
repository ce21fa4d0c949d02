//! Client receipt verification.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::{queries, with_store, AppState};
use crate::error::{AppError, Result};
use crate::models::{IapSource, PartialPurchase, ProductId, Purchase, VerifyStatus};
use crate::util::{get_referrer, now_ms, random_log_key};
use crate::vendors::{self, GatewayOutcome, RawVendorData};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub source: IapSource,
    pub user_id: String,
    pub product_id: ProductId,
    /// App Store receipt, Play Store purchase token, or Paddle checkout id.
    pub token: String,
    /// Required for Paddle; identifies the subscription owner at the vendor.
    #[serde(default)]
    pub paddle_user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub status: VerifyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase: Option<Purchase>,
}

fn raw_payload(raw: &RawVendorData) -> Result<serde_json::Value> {
    let value = match raw {
        RawVendorData::AppStore { data, .. } => serde_json::to_value(data)?,
        RawVendorData::PlayStore { data, .. } => serde_json::to_value(data)?,
        RawVendorData::Paddle { data, .. } => serde_json::to_value(data)?,
    };
    Ok(value)
}

pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>> {
    let log_key = random_log_key();
    tracing::info!(
        "({}) /verify: source {} product {} user {}",
        log_key,
        req.source,
        req.product_id,
        req.user_id
    );

    // Browser callers must come from a known origin. Native clients send no
    // referrer and pass through.
    if let Some(referrer) = get_referrer(&headers) {
        if !state.allowed_origins.contains(&referrer) {
            tracing::warn!("({}) Unexpected referrer: {}", log_key, referrer);
            return Ok(Json(VerifyResponse {
                status: VerifyStatus::Error,
                purchase: None,
            }));
        }
    }

    if !req.source.is_client_verifiable() {
        return Err(AppError::InvalidSource(req.source.to_string()));
    }
    if req.token.is_empty() {
        return Err(AppError::BadRequest("Missing token".to_string()));
    }

    let outcome = match req.source {
        IapSource::AppStore => {
            state
                .gateways
                .appstore
                .verify_receipt(&log_key, req.product_id, &req.token)
                .await
        }
        IapSource::PlayStore => {
            state
                .gateways
                .playstore
                .verify_subscription(&log_key, req.product_id, &req.token)
                .await
        }
        IapSource::Paddle => {
            let paddle_user_id = req
                .paddle_user_id
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| AppError::BadRequest("Missing paddleUserId".to_string()))?;
            state
                .gateways
                .paddle
                .verify_subscription(&log_key, req.product_id, &req.token, paddle_user_id, None)
                .await
        }
        IapSource::Manual => {
            return Err(AppError::InvalidSource(req.source.to_string()));
        }
    };

    let response = match outcome {
        GatewayOutcome::Valid(raw) => {
            let raw = state.plan_cache.attach(raw);
            let now = now_ms();
            let parsed = vendors::parse(&log_key, &raw, now)?;

            let key = log_key.clone();
            let source = req.source;
            let product_id = req.product_id;
            let user_id = req.user_id.clone();
            let token = req.token.clone();
            let purchase = with_store(&state.db, move |conn| {
                queries::save_verify_log(
                    conn,
                    &key,
                    source,
                    Some(&user_id),
                    product_id,
                    Some(&token),
                    &raw_payload(&raw)?,
                )?;

                match &raw {
                    // Paddle purchases are created by the webhook; a client
                    // verify merges into whatever is already stored.
                    RawVendorData::Paddle { data, .. } => {
                        let patch = PartialPurchase {
                            product_id: Some(parsed.product_id),
                            order_id: Some(parsed.order_id.clone()),
                            token: parsed.token.clone(),
                            status: Some(parsed.status),
                            expiry_date: Some(parsed.expiry_date),
                            end_date: Some(parsed.end_date),
                            paddle_user_id: data.paddle_user_id.clone(),
                            receipt_url: data.receipt_url.clone(),
                            ..Default::default()
                        };
                        queries::update_partial_purchase(
                            conn,
                            &key,
                            Some(&user_id),
                            &parsed.original_order_id,
                            &patch,
                        )
                    }
                    RawVendorData::PlayStore { product_id: play_product, data } => {
                        if let Some(ack_result) = &data.ack_result {
                            queries::save_acknowledge_log(
                                conn,
                                &key,
                                Some(&user_id),
                                *play_product,
                                &token,
                                data.acknowledgement_state,
                                data.payment_state,
                                ack_result,
                            )?;
                        }
                        // A Play payload naming a superseded token retires
                        // the old purchase before this one is recorded.
                        if let Some(linked) = data
                            .linked_purchase_token
                            .as_deref()
                            .filter(|l| !l.is_empty() && *l != token)
                        {
                            queries::invalidate_purchase(
                                conn,
                                &key,
                                IapSource::PlayStore,
                                &token,
                                linked,
                                &parsed,
                            )?;
                        }
                        queries::add_purchase(conn, &key, source, &user_id, Some(&token), &parsed)
                    }
                    RawVendorData::AppStore { latest_receipt, .. } => {
                        let stored = latest_receipt.as_deref().unwrap_or(token.as_str());
                        queries::add_purchase(conn, &key, source, &user_id, Some(stored), &parsed)
                    }
                }
            })
            .await?;

            VerifyResponse {
                status: VerifyStatus::Valid,
                purchase: Some(purchase),
            }
        }
        GatewayOutcome::Invalid => {
            tracing::info!("({}) Vendor rejected the receipt", log_key);
            VerifyResponse {
                status: VerifyStatus::Invalid,
                purchase: None,
            }
        }
        GatewayOutcome::Unknown => {
            tracing::warn!("({}) Vendor verification unavailable", log_key);
            VerifyResponse {
                status: VerifyStatus::Unknown,
                purchase: None,
            }
        }
    };

    Ok(Json(response))
}
