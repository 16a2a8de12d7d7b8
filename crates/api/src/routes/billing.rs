//! Plan changes and self-service billing

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use callally_billing::{BillingError, BillingProvider};
use callally_shared::Plan;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiJson, ApiResult},
    routes::owned_business,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: Plan,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CancelRequest {
    pub at_period_end: bool,
}

fn billing(state: &AppState) -> ApiResult<&Arc<dyn BillingProvider>> {
    state
        .billing
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("Billing is not configured".to_string()))
}

fn billing_error(business_id: Uuid, operation: &'static str, err: BillingError) -> ApiError {
    match err {
        BillingError::PriceNotConfigured(plan) => {
            ApiError::BadRequest(format!("Plan {} is not available", plan))
        }
        BillingError::InvalidInput(msg) => ApiError::BadRequest(msg),
        other => {
            tracing::error!(
                business_id = %business_id,
                operation = operation,
                error = %other,
                "Billing request failed"
            );
            ApiError::Provider("Billing request failed. Please try again.".to_string())
        }
    }
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    ApiJson(req): ApiJson<CheckoutRequest>,
) -> ApiResult<Json<Value>> {
    let business = owned_business(&state, &auth_user, business_id).await?;
    let billing = billing(&state)?;
    let customer_id = business
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("No billing customer linked".to_string()))?;

    let base = state.config.base_url.trim_end_matches('/');
    let success_url = format!("{}/dashboard?checkout=success", base);
    let cancel_url = format!("{}/dashboard/billing?checkout=cancelled", base);

    let url = billing
        .create_checkout_session(
            customer_id,
            req.plan,
            state.config.trial_days,
            &success_url,
            &cancel_url,
        )
        .await
        .map_err(|e| billing_error(business.id, "checkout", e))?;

    tracing::info!(business_id = %business.id, plan = %req.plan, "Checkout session created");
    Ok(Json(json!({ "url": url })))
}

pub async fn create_portal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let business = owned_business(&state, &auth_user, business_id).await?;
    let billing = billing(&state)?;
    let customer_id = business
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("No billing customer linked".to_string()))?;

    let return_url = format!(
        "{}/dashboard/billing",
        state.config.base_url.trim_end_matches('/')
    );
    let url = billing
        .create_portal_session(customer_id, &return_url)
        .await
        .map_err(|e| billing_error(business.id, "portal", e))?;

    Ok(Json(json!({ "url": url })))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    ApiJson(req): ApiJson<CancelRequest>,
) -> ApiResult<Json<Value>> {
    let mut business = owned_business(&state, &auth_user, business_id).await?;
    let billing = billing(&state)?;
    let subscription_id = business
        .stripe_subscription_id
        .clone()
        .ok_or_else(|| ApiError::BadRequest("No active subscription".to_string()))?;

    billing
        .cancel_subscription(&subscription_id, req.at_period_end)
        .await
        .map_err(|e| billing_error(business.id, "cancel", e))?;

    let message = if req.at_period_end {
        "Subscription will be cancelled at the end of the billing period"
    } else {
        // Same status the deletion webhook will set
        business.subscription_status = Some("cancelled".to_string());
        state.store.save_business(&business).await?;
        "Subscription cancelled"
    };

    tracing::info!(
        business_id = %business.id,
        subscription_id = %subscription_id,
        at_period_end = req.at_period_end,
        "Subscription cancellation requested"
    );
    Ok(Json(json!({ "message": message })))
}
