//! Vendor server notifications.
//!
//! Every webhook answers 200 regardless of processing outcome: a non-200
//! makes the vendor retry, and a payload this service cannot process will
//! not process better the fifth time. Failures land in the log instead.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Form, Json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use crate::db::{queries, with_store, AppState};
use crate::error::{AppError, Result};
use crate::models::{IapSource, ProductId};
use crate::util::{now_ms, random_log_key};
use crate::vendors::{self, paddle, GatewayOutcome, RawVendorData};

pub async fn appstore_notify(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let log_key = random_log_key();
    if let Err(err) = handle_appstore(&state, &log_key, &body).await {
        tracing::error!("({}) App Store notification failed: {}", log_key, err);
    }
    StatusCode::OK
}

async fn handle_appstore(state: &AppState, log_key: &str, body: &serde_json::Value) -> Result<()> {
    let signed_payload = body
        .get("signedPayload")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BadRequest("Missing signedPayload".to_string()))?;

    match state
        .gateways
        .appstore
        .decode_notification(log_key, signed_payload)
        .await
    {
        GatewayOutcome::Valid(raw) => {
            let now = now_ms();
            let parsed = vendors::parse(log_key, &raw, now)?;
            let payload = match &raw {
                RawVendorData::AppStore { data, .. } => serde_json::to_value(data)?,
                _ => serde_json::Value::Null,
            };

            let key = log_key.to_string();
            let (original_order_id, status) = with_store(&state.db, move |conn| {
                queries::save_notify_log(
                    conn,
                    &key,
                    IapSource::AppStore,
                    None,
                    Some(&parsed.original_order_id),
                    &payload,
                )?;
                // Notifications carry no receipt; the stored one stays.
                queries::update_purchase(conn, &key, IapSource::AppStore, None, &parsed)?;
                Ok((parsed.original_order_id, parsed.status))
            })
            .await?;
            tracing::info!(
                "({}) App Store notification applied: {} -> {}",
                log_key,
                original_order_id,
                status
            );
            Ok(())
        }
        GatewayOutcome::Invalid => {
            tracing::warn!("({}) App Store notification failed verification", log_key);
            Ok(())
        }
        GatewayOutcome::Unknown => {
            tracing::warn!("({}) App Store notification not decodable now", log_key);
            Ok(())
        }
    }
}

/// Pub/Sub push envelope wrapping a Play developer notification.
#[derive(Debug, Deserialize)]
pub(crate) struct PubSubEnvelope {
    message: PubSubMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PubSubMessage {
    /// Base64 of the developer notification JSON.
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayDeveloperNotification {
    #[serde(default)]
    subscription_notification: Option<PlaySubscriptionNotification>,
    #[serde(default)]
    test_notification: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaySubscriptionNotification {
    purchase_token: String,
    /// The subscription product id, despite the name.
    subscription_id: String,
}

pub async fn playstore_notify(
    State(state): State<AppState>,
    Json(body): Json<PubSubEnvelope>,
) -> StatusCode {
    let log_key = random_log_key();
    if let Err(err) = handle_playstore(&state, &log_key, &body).await {
        tracing::error!("({}) Play Store notification failed: {}", log_key, err);
    }
    StatusCode::OK
}

async fn handle_playstore(state: &AppState, log_key: &str, body: &PubSubEnvelope) -> Result<()> {
    let decoded = BASE64
        .decode(&body.message.data)
        .map_err(|err| AppError::BadRequest(format!("Invalid Pub/Sub data: {}", err)))?;
    let notification: PlayDeveloperNotification = serde_json::from_slice(&decoded)?;

    if notification.test_notification.is_some() {
        tracing::info!("({}) Play Store test notification", log_key);
        return Ok(());
    }
    let subscription = match &notification.subscription_notification {
        Some(s) => s,
        None => {
            tracing::info!("({}) Play Store notification without subscription", log_key);
            return Ok(());
        }
    };

    let key = log_key.to_string();
    let token = subscription.purchase_token.clone();
    let payload: serde_json::Value = serde_json::from_slice(&decoded)?;
    with_store(&state.db, move |conn| {
        queries::save_notify_log(conn, &key, IapSource::PlayStore, Some(&token), None, &payload)
    })
    .await?;

    let product_id: ProductId = match subscription.subscription_id.parse() {
        Ok(p) => p,
        Err(_) => {
            tracing::warn!(
                "({}) Play Store notification for unknown product: {}",
                log_key,
                subscription.subscription_id
            );
            return Ok(());
        }
    };

    match state
        .gateways
        .playstore
        .verify_subscription(log_key, product_id, &subscription.purchase_token)
        .await
    {
        GatewayOutcome::Valid(RawVendorData::PlayStore { product_id, data }) => {
            let now = now_ms();
            let raw = RawVendorData::PlayStore {
                product_id,
                data: data.clone(),
            };
            let parsed = vendors::parse(log_key, &raw, now)?;

            let key = log_key.to_string();
            let token = subscription.purchase_token.clone();
            let (original_order_id, status) = with_store(&state.db, move |conn| {
                if let Some(ack_result) = &data.ack_result {
                    queries::save_acknowledge_log(
                        conn,
                        &key,
                        None,
                        product_id,
                        &token,
                        data.acknowledgement_state,
                        data.payment_state,
                        ack_result,
                    )?;
                }
                match data
                    .linked_purchase_token
                    .as_deref()
                    .filter(|l| !l.is_empty() && *l != token)
                {
                    Some(linked_token) => {
                        queries::invalidate_purchase(
                            conn,
                            &key,
                            IapSource::PlayStore,
                            &token,
                            linked_token,
                            &parsed,
                        )?;
                    }
                    None => {
                        queries::update_purchase(
                            conn,
                            &key,
                            IapSource::PlayStore,
                            Some(&token),
                            &parsed,
                        )?;
                    }
                }
                Ok((parsed.original_order_id, parsed.status))
            })
            .await?;
            tracing::info!(
                "({}) Play Store notification applied: {} -> {}",
                log_key,
                original_order_id,
                status
            );
            Ok(())
        }
        GatewayOutcome::Valid(_) => Err(AppError::Internal(
            "Play Store gateway returned foreign payload".to_string(),
        )),
        GatewayOutcome::Invalid => {
            tracing::warn!("({}) Play Store rejected the notified token", log_key);
            Ok(())
        }
        GatewayOutcome::Unknown => {
            tracing::warn!("({}) Play Store verification unavailable", log_key);
            Ok(())
        }
    }
}

pub async fn paddle_notify(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> StatusCode {
    let log_key = random_log_key();
    if let Err(err) = handle_paddle(&state, &log_key, &fields).await {
        tracing::error!("({}) Paddle notification failed: {}", log_key, err);
    }
    StatusCode::OK
}

async fn handle_paddle(
    state: &AppState,
    log_key: &str,
    fields: &HashMap<String, String>,
) -> Result<()> {
    if !state.gateways.paddle.verify_webhook_signature(fields) {
        tracing::warn!("({}) Paddle webhook signature rejected", log_key);
        return Ok(());
    }

    let alert = fields.get("alert_name").cloned().unwrap_or_else(|| "?".to_string());
    let (original_order_id, patch) = paddle::parse_partial(log_key, fields)?;
    let payload = serde_json::to_value(fields)?;

    let key = log_key.to_string();
    let subscription_id = original_order_id.clone();
    let purchase = with_store(&state.db, move |conn| {
        queries::save_notify_log(
            conn,
            &key,
            IapSource::Paddle,
            patch.token.as_deref(),
            Some(&subscription_id),
            &payload,
        )?;
        queries::update_partial_purchase(conn, &key, None, &subscription_id, &patch)
    })
    .await?;
    tracing::info!(
        "({}) Paddle {} applied: {} -> {}",
        log_key,
        alert,
        original_order_id,
        purchase.status
    );
    Ok(())
}
