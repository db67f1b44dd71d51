pub mod admin;
pub mod auth;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod requests;
pub mod response;
pub mod transactions;
pub mod users;
pub mod validation;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Credential and one-time-code endpoints (public, strict limit)
    let auth_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/google", post(auth::google_login))
        .route("/api/auth/verify-email", post(auth::verify_email))
        .route("/api/auth/resend-verification", post(auth::resend_verification))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/users/pin/forgot", post(users::forgot_pin))
        .route("/api/users/pin/reset", post(users::reset_pin))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Endpoints that move money
    let payment_routes = Router::new()
        .route("/api/transactions/transfer", post(transactions::transfer))
        .route("/api/transactions/deposit", post(transactions::deposit))
        .route("/api/requests/:id", patch(requests::update_request))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_payment,
        ));

    let api_routes = Router::new()
        // Profile and PIN
        .route("/api/users/me", get(users::me).put(users::update_me))
        .route("/api/users/me/password", post(users::change_password))
        .route("/api/users/me/pin", post(users::set_pin))
        .route("/api/users/me/pin/change", post(users::change_pin))
        .route("/api/users/me/pin/verify", post(users::verify_pin))
        .route("/api/users/me/qr", get(users::qr_code))
        .route("/api/users/:id/verify", get(users::verify_account))
        // Ledger
        .route("/api/transactions", get(transactions::list_transactions))
        .route("/api/transactions/:id", get(transactions::get_transaction))
        // Payment requests
        .route(
            "/api/requests",
            get(requests::list_requests).post(requests::create_request),
        )
        // Back office
        .route("/api/admin/users", get(admin::list_users))
        .route(
            "/api/admin/users/:id",
            get(admin::get_user).patch(admin::update_user),
        )
        .route("/api/admin/deposits/pending", get(admin::pending_deposits))
        .route("/api/admin/deposits/:id/settle", post(admin::settle_deposit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .merge(auth_routes)
        .merge(payment_routes)
        .merge(api_routes)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(cors_layer(&state.config.server.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any origin when none are configured
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let cache = state.cache.is_healthy().await;

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database && cache { "ok" } else { "degraded" },
            "database": database,
            "cache": {
                "backend": state.cache.backend(),
                "healthy": cache,
            },
        })),
    )
}
