//! Provider webhooks
//!
//! Both endpoints authenticate the sender before looking at the body, and
//! acknowledge structurally valid events even when no tenant matches.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use callally_billing::{BillingError, WebhookOutcome};
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    reconcile::VoiceWebhook,
    security::verify_vapi_secret,
    state::AppState,
};

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing signature".to_string()))?;

    let event = state
        .billing_webhooks
        .verify_event(&body, signature)
        .map_err(|e| match e {
            BillingError::WebhookSignatureInvalid => {
                tracing::warn!("Billing webhook signature verification failed");
                ApiError::BadRequest("Invalid signature".to_string())
            }
            other => {
                tracing::warn!(error = %other, "Billing webhook payload rejected");
                ApiError::BadRequest("Invalid payload".to_string())
            }
        })?;

    let outcome = state
        .billing_webhooks
        .handle_event(&event)
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;

    match outcome {
        WebhookOutcome::Applied { business_id } => tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            business_id = %business_id,
            "Billing event applied"
        ),
        WebhookOutcome::NoMatchingBusiness => tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Billing event for unknown customer dropped"
        ),
        WebhookOutcome::Unchanged { .. } | WebhookOutcome::Ignored => {}
    }

    Ok(Json(json!({ "received": true })))
}

pub async fn vapi_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    if !verify_vapi_secret(state.config.vapi.webhook_secret.as_deref(), &headers) {
        tracing::warn!("Voice webhook rejected: bad or missing secret");
        return Err(ApiError::Unauthorized("Invalid webhook secret".to_string()));
    }

    let webhook: VoiceWebhook = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Malformed voice webhook");
        ApiError::BadRequest("Invalid payload".to_string())
    })?;

    let reply = state.voice_webhooks.handle(webhook).await?;
    Ok(Json(reply.into_json()))
}
