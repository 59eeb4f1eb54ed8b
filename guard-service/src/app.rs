use std::sync::Arc;

use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Extension, Json, Router};
use jwt_guard::{require_jwt, AuthContext, JwtValidator};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// `/whoami` sits behind [`require_jwt`]; `/healthz` stays open.
pub fn build_router(validator: Arc<JwtValidator>, allowed_origins: &[String]) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        .route("/whoami", get(whoami))
        .route_layer(from_fn_with_state(validator, require_jwt))
        .route("/healthz", get(|| async { "ok" }))
        .layer(cors)
}

async fn whoami(Extension(auth): Extension<AuthContext>) -> Json<Value> {
    Json(auth.into_claims().raw)
}
