//! Onboarding wizard routes

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use callally_shared::Business;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiJson, ApiResult},
    onboarding::{saga::ALREADY_COMPLETE, OnboardingResult, OnboardingStep, SagaError, StepRequest},
    routes::owned_business,
    state::AppState,
};

pub async fn get_onboarding(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<Business>> {
    Ok(Json(owned_business(&state, &auth_user, business_id).await?))
}

pub async fn save_step(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    ApiJson(req): ApiJson<StepRequest>,
) -> ApiResult<Json<Business>> {
    let mut business = owned_business(&state, &auth_user, business_id).await?;
    if business.is_active() {
        return Err(ApiError::BadRequest(ALREADY_COMPLETE.to_string()));
    }

    let step = OnboardingStep::parse(req.step, req.data)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let number = step.number();
    step.apply(&mut business);

    let business = state.store.save_business(&business).await?;
    tracing::debug!(
        business_id = %business.id,
        step = number,
        onboarding_step = business.onboarding_step,
        "Onboarding step saved"
    );

    Ok(Json(business))
}

pub async fn complete_onboarding(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<OnboardingResult>> {
    let business = owned_business(&state, &auth_user, business_id).await?;

    let result = state
        .onboarding_saga()
        .complete(business, &auth_user.email)
        .await
        .map_err(|e| match e {
            SagaError::Incomplete => ApiError::BadRequest(e.to_string()),
            SagaError::AssistantFailed(_) => ApiError::Provider(e.to_string()),
            SagaError::Store(store) => store.into(),
        })?;

    Ok(Json(result))
}
