//! HTTP routes

pub mod auth;
pub mod billing;
pub mod business;
pub mod onboarding;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use callally_shared::Business;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::{require_auth, AuthUser},
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Build the full router. Layers that wrap every route (CORS, tracing,
/// security headers) are applied by the caller.
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/api/webhooks/vapi", post(webhooks::vapi_webhook));

    let protected = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/logout", post(auth::logout))
        // Onboarding
        .route("/api/onboarding/{business_id}", get(onboarding::get_onboarding))
        .route(
            "/api/onboarding/{business_id}/step",
            post(onboarding::save_step),
        )
        .route(
            "/api/onboarding/{business_id}/complete",
            post(onboarding::complete_onboarding),
        )
        // Dashboard
        .route(
            "/api/business/{business_id}",
            get(business::get_business).patch(business::update_business),
        )
        .route("/api/business/{business_id}/stats", get(business::get_stats))
        .route("/api/business/{business_id}/calls", get(business::list_calls))
        .route(
            "/api/business/{business_id}/calls/{call_id}",
            get(business::get_call),
        )
        .route(
            "/api/business/{business_id}/test-call",
            post(business::start_test_call),
        )
        .route(
            "/api/business/{business_id}/appointments",
            get(business::list_appointments).post(business::create_appointment),
        )
        .route(
            "/api/business/{business_id}/appointments/{appointment_id}",
            patch(business::update_appointment).delete(business::delete_appointment),
        )
        .route("/api/business/{business_id}/sms", get(business::list_sms))
        .route(
            "/api/business/{business_id}/integrations",
            get(business::list_integrations),
        )
        // Billing
        .route(
            "/api/business/{business_id}/billing/checkout",
            post(billing::create_checkout),
        )
        .route(
            "/api/business/{business_id}/billing/portal",
            post(billing::create_portal),
        )
        .route(
            "/api/business/{business_id}/billing/cancel",
            post(billing::cancel_subscription),
        )
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ));

    Router::new().merge(public).merge(protected).with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "CallAlly API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Load a business the caller owns. Someone else's business is reported as
/// missing, never as forbidden.
pub(crate) async fn owned_business(
    state: &AppState,
    auth_user: &AuthUser,
    business_id: Uuid,
) -> ApiResult<Business> {
    state
        .store
        .get_business_for_user(business_id, auth_user.user_id)
        .await?
        .ok_or_else(ApiError::business_not_found)
}
