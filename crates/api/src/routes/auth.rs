//! Signup, login and the current-user endpoints

use axum::{extract::State, http::HeaderMap, Extension, Json};
use callally_shared::{Business, BusinessStatus, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{hash_password, validate_password, verify_password, AuthUser},
    error::{ApiError, ApiJson, ApiResult},
    security::enforce_rate_limit,
    state::AppState,
};

const RATE_LIMIT_SCOPE: &str = "auth";
const INVALID_CREDENTIALS: &str = "Invalid email or password";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub business_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub business_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BusinessSummary {
    pub id: Uuid,
    pub name: String,
    pub onboarding_step: i32,
    pub status: BusinessStatus,
    pub subscription_status: Option<String>,
    pub phone_number: Option<String>,
}

impl From<Business> for BusinessSummary {
    fn from(business: Business) -> Self {
        Self {
            id: business.id,
            name: business.name,
            onboarding_step: business.onboarding_step,
            status: business.status,
            subscription_status: business.subscription_status,
            phone_number: business.vapi_phone_number,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub businesses: Vec<BusinessSummary>,
}

// =============================================================================
// Handlers
// =============================================================================

fn token_response(state: &AppState, user_id: Uuid, business_id: Option<Uuid>) -> ApiResult<TokenResponse> {
    let access_token = state.jwt_manager.generate_access_token(user_id).map_err(|e| {
        tracing::error!(user_id = %user_id, error = %e, "Failed to sign access token");
        ApiError::Internal(e.to_string())
    })?;

    Ok(TokenResponse {
        access_token,
        token_type: "bearer",
        business_id,
    })
}

pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SignupRequest>,
) -> ApiResult<Json<TokenResponse>> {
    enforce_rate_limit(&state.rate_limiter, &headers, RATE_LIMIT_SCOPE).await?;

    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }
    validate_password(&req.password).map_err(ApiError::Validation)?;
    let business_name = req.business_name.trim();
    if business_name.is_empty() {
        return Err(ApiError::Validation("Business name is required".to_string()));
    }

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::BadRequest("Email already registered".to_string()));
    }

    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        ApiError::Internal(e.to_string())
    })?;

    let (user, business) = state
        .store
        .create_user_with_business(&email, &password_hash, business_name)
        .await
        .map_err(|e| match e {
            // Lost a race with a concurrent signup for the same address
            StoreError::AlreadyExists { .. } => {
                ApiError::BadRequest("Email already registered".to_string())
            }
            other => other.into(),
        })?;

    tracing::info!(user_id = %user.id, business_id = %business.id, "User signed up");

    Ok(Json(token_response(&state, user.id, Some(business.id))?))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    enforce_rate_limit(&state.rate_limiter, &headers, RATE_LIMIT_SCOPE).await?;

    let user = state
        .store
        .find_user_by_email(&req.email)
        .await?
        .filter(|user| verify_password(&req.password, &user.password_hash))
        .ok_or_else(|| ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

    if !user.is_active {
        tracing::warn!(user_id = %user.id, "Login attempt on disabled account");
        return Err(ApiError::Forbidden("Account is disabled".to_string()));
    }

    state
        .store
        .record_login(user.id, OffsetDateTime::now_utc())
        .await?;

    let business_id = state
        .store
        .list_businesses_for_user(user.id)
        .await?
        .first()
        .map(|b| b.id);

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(token_response(&state, user.id, business_id)?))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<MeResponse>> {
    let user = state
        .store
        .get_user(auth_user.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

    let businesses = state
        .store
        .list_businesses_for_user(user.id)
        .await?
        .into_iter()
        .map(BusinessSummary::from)
        .collect();

    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
        created_at: user.created_at,
        businesses,
    }))
}

/// Tokens are stateless; the client discards its copy.
pub async fn logout(Extension(auth_user): Extension<AuthUser>) -> Json<Value> {
    tracing::debug!(user_id = %auth_user.user_id, "User logged out");
    Json(json!({ "message": "Logged out successfully" }))
}
