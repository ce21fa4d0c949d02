//! HTTP surface.
//!
//! Two route groups: CORS-gated client endpoints (verify, status, erasure,
//! Paddle pre-registration) and vendor webhook endpoints, which are
//! server-to-server and carry their own authentication.

mod notify;
mod paddle_pre;
mod status;
mod verify;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::AppState;

pub use status::{DeleteAllRequest, StatusRequest, StatusResponse};
pub use verify::{VerifyRequest, VerifyResponse};

async fn greeting() -> &'static str {
    "Subscription service ready.\n"
}

pub fn build_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let client_routes = Router::new()
        .route("/verify", post(verify::verify))
        .route("/status", post(status::status))
        .route("/delete-all", post(status::delete_all))
        .route("/paddle/pre", post(paddle_pre::paddle_pre))
        .layer(cors);

    let webhook_routes = Router::new()
        .route("/appstore/notify", post(notify::appstore_notify))
        .route("/playstore/notify", post(notify::playstore_notify))
        .route("/paddle/notify", post(notify::paddle_notify));

    Router::new()
        .route("/", get(greeting))
        .merge(client_routes)
        .merge(webhook_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
