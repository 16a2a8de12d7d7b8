//! Dashboard routes: business settings, stats, calls and appointments

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use callally_shared::{
    Appointment, AppointmentStatus, Business, BusinessStats, Call, CallRoutingMode, NewAppointment,
    Page, Paginated, Plan, StatsWindow,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiJson, ApiResult},
    onboarding::steps::{
        validate_appointment_duration, validate_email, validate_rings, validate_voice, StepError,
    },
    routes::owned_business,
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Partial business update. Absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BusinessUpdate {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub service_area: Option<String>,
    pub services: Option<Vec<String>>,
    pub custom_services: Option<String>,
    pub appointment_types: Option<Vec<String>>,
    pub appointment_duration: Option<i32>,
    pub agent_name: Option<String>,
    pub agent_voice: Option<String>,
    pub greeting_style: Option<String>,
    pub weekday_hours: Option<String>,
    pub weekend_hours: Option<String>,
    pub emergency_dispatch: Option<bool>,
    pub emergency_keywords: Option<Vec<String>>,
    pub emergency_phones: Option<Vec<String>>,
    pub call_mode: Option<CallRoutingMode>,
    pub rings_before_ai: Option<i32>,
    pub notification_phone: Option<String>,
}

impl BusinessUpdate {
    fn validate(&self) -> Result<(), StepError> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(StepError::Invalid("Business name cannot be empty".to_string()));
        }
        if self.agent_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(StepError::Invalid("Agent name cannot be empty".to_string()));
        }
        if let Some(email) = self.email.as_deref() {
            validate_email(email)?;
        }
        if let Some(minutes) = self.appointment_duration {
            validate_appointment_duration(minutes)?;
        }
        if let Some(rings) = self.rings_before_ai {
            validate_rings(rings)?;
        }
        if let Some(voice) = self.agent_voice.as_deref() {
            validate_voice(voice)?;
        }
        Ok(())
    }

    fn apply(self, business: &mut Business) {
        fn set<T>(field: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *field = value;
            }
        }

        set(&mut business.name, self.name.map(|n| n.trim().to_string()));
        set(&mut business.industry, self.industry.map(Some));
        set(&mut business.phone, self.phone.map(Some));
        set(&mut business.email, self.email.map(Some));
        set(&mut business.website, self.website.map(Some));
        set(&mut business.address, self.address.map(Some));
        set(&mut business.service_area, self.service_area.map(Some));
        set(&mut business.services, self.services);
        set(&mut business.custom_services, self.custom_services.map(Some));
        set(&mut business.appointment_types, self.appointment_types);
        set(
            &mut business.appointment_duration_minutes,
            self.appointment_duration,
        );
        set(&mut business.agent_name, self.agent_name);
        set(&mut business.agent_voice, self.agent_voice);
        set(&mut business.greeting_style, self.greeting_style);
        set(&mut business.business_hours.weekday, self.weekday_hours);
        set(&mut business.business_hours.weekend, self.weekend_hours);
        set(&mut business.emergency_dispatch, self.emergency_dispatch);
        set(&mut business.emergency_keywords, self.emergency_keywords);
        set(&mut business.emergency_phones, self.emergency_phones);
        set(&mut business.call_mode, self.call_mode);
        set(&mut business.rings_before_ai, self.rings_before_ai);
        set(
            &mut business.notification_phone,
            self.notification_phone.map(Some),
        );
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: BusinessStats,
    pub plan: Plan,
    pub minutes_limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct TestCallQuery {
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentCreate {
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub customer_address: Option<String>,
    pub service_type: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub appointment_date: OffsetDateTime,
    pub duration_minutes: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppointmentUpdate {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub customer_address: Option<String>,
    pub service_type: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub appointment_date: Option<OffsetDateTime>,
    pub duration_minutes: Option<i32>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

/// Render a page under `key`, e.g. `{"calls": [...], "total": 45, ...}`.
fn page_json<T: Serialize>(key: &str, page: Paginated<T>) -> Value {
    let mut body = json!({
        "total": page.total,
        "page": page.page,
        "per_page": page.per_page,
        "has_more": page.has_more,
    });
    body[key] = json!(page.items);
    body
}

fn invalid(err: StepError) -> ApiError {
    ApiError::Validation(err.to_string())
}

// =============================================================================
// Business
// =============================================================================

pub async fn get_business(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<Business>> {
    Ok(Json(owned_business(&state, &auth_user, business_id).await?))
}

pub async fn update_business(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    ApiJson(update): ApiJson<BusinessUpdate>,
) -> ApiResult<Json<Business>> {
    let mut business = owned_business(&state, &auth_user, business_id).await?;

    update.validate().map_err(invalid)?;
    update.apply(&mut business);
    let business = state.store.save_business(&business).await?;

    if let Some(assistant_id) = business.vapi_assistant_id.as_deref() {
        if let Err(e) = state.voice.update_assistant(assistant_id, &business).await {
            tracing::warn!(
                business_id = %business.id,
                assistant_id = %assistant_id,
                error = %e,
                "Failed to push business update to assistant"
            );
        }
    }

    Ok(Json(business))
}

pub async fn get_stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<StatsResponse>> {
    let business = owned_business(&state, &auth_user, business_id).await?;
    let stats = state
        .store
        .business_stats(
            business.id,
            StatsWindow::for_instant(OffsetDateTime::now_utc()),
        )
        .await?;

    Ok(Json(StatsResponse {
        stats,
        plan: business.subscription_plan.unwrap_or(Plan::Starter),
        minutes_limit: business.minutes_limit(),
    }))
}

// =============================================================================
// Calls
// =============================================================================

pub async fn list_calls(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let page = Page::new(query.page, query.per_page)?;
    let business = owned_business(&state, &auth_user, business_id).await?;

    let (calls, total) = state.store.list_calls(business.id, page).await?;
    Ok(Json(page_json("calls", Paginated::new(calls, total, page))))
}

pub async fn get_call(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((business_id, call_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Call>> {
    let business = owned_business(&state, &auth_user, business_id).await?;
    state
        .store
        .get_call(business.id, call_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Call not found".to_string()))
}

pub async fn start_test_call(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    Query(query): Query<TestCallQuery>,
) -> ApiResult<Json<Value>> {
    let business = owned_business(&state, &auth_user, business_id).await?;

    let (Some(assistant_id), Some(phone_id)) = (
        business.vapi_assistant_id.as_deref(),
        business.vapi_phone_id.as_deref(),
    ) else {
        return Err(ApiError::BadRequest(
            "AI assistant not set up yet".to_string(),
        ));
    };

    let call_id = state
        .voice
        .start_test_call(assistant_id, phone_id, &query.phone_number)
        .await
        .map_err(|e| {
            tracing::warn!(business_id = %business.id, error = %e, "Test call failed");
            ApiError::Provider("Failed to initiate test call".to_string())
        })?;

    tracing::info!(business_id = %business.id, call_id = %call_id, "Test call initiated");
    Ok(Json(json!({
        "call_id": call_id,
        "message": "Test call initiated",
    })))
}

// =============================================================================
// Appointments
// =============================================================================

pub async fn list_appointments(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    Query(query): Query<AppointmentQuery>,
) -> ApiResult<Json<Value>> {
    let page = Page::new(query.page, query.per_page)?;
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<AppointmentStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let business = owned_business(&state, &auth_user, business_id).await?;

    let (appointments, total) = state
        .store
        .list_appointments(business.id, status, page)
        .await?;
    Ok(Json(page_json(
        "appointments",
        Paginated::new(appointments, total, page),
    )))
}

pub async fn create_appointment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    ApiJson(req): ApiJson<AppointmentCreate>,
) -> ApiResult<Json<Appointment>> {
    let business = owned_business(&state, &auth_user, business_id).await?;

    if req.customer_name.trim().is_empty() {
        return Err(ApiError::Validation("Customer name is required".to_string()));
    }
    if let Some(email) = req.customer_email.as_deref() {
        validate_email(email).map_err(invalid)?;
    }
    let duration_minutes = req
        .duration_minutes
        .unwrap_or(business.appointment_duration_minutes);
    validate_appointment_duration(duration_minutes).map_err(invalid)?;

    let appointment = state
        .store
        .create_appointment(NewAppointment {
            business_id: business.id,
            call_id: None,
            provider_call_id: None,
            customer_name: req.customer_name.trim().to_string(),
            customer_phone: req.customer_phone,
            customer_email: req.customer_email,
            customer_address: req.customer_address,
            service_type: req.service_type,
            appointment_date: req.appointment_date,
            duration_minutes,
            notes: req.notes,
        })
        .await?;

    Ok(Json(appointment))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((business_id, appointment_id)): Path<(Uuid, Uuid)>,
    ApiJson(req): ApiJson<AppointmentUpdate>,
) -> ApiResult<Json<Appointment>> {
    let business = owned_business(&state, &auth_user, business_id).await?;
    let mut appointment = state
        .store
        .get_appointment(business.id, appointment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Appointment not found".to_string()))?;

    if let Some(next) = req.status {
        if !appointment.status.can_transition_to(next) {
            return Err(ApiError::BadRequest(format!(
                "Cannot change appointment status from {} to {}",
                appointment.status, next
            )));
        }
        appointment.status = next;
    }
    if let Some(name) = req.customer_name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("Customer name is required".to_string()));
        }
        appointment.customer_name = name.trim().to_string();
    }
    if let Some(email) = req.customer_email {
        validate_email(&email).map_err(invalid)?;
        appointment.customer_email = Some(email);
    }
    if let Some(minutes) = req.duration_minutes {
        validate_appointment_duration(minutes).map_err(invalid)?;
        appointment.duration_minutes = minutes;
    }
    if let Some(phone) = req.customer_phone {
        appointment.customer_phone = Some(phone);
    }
    if let Some(address) = req.customer_address {
        appointment.customer_address = Some(address);
    }
    if let Some(service) = req.service_type {
        appointment.service_type = Some(service);
    }
    if let Some(date) = req.appointment_date {
        appointment.appointment_date = date;
    }
    if let Some(notes) = req.notes {
        appointment.notes = Some(notes);
    }

    let appointment = state.store.save_appointment(&appointment).await?;
    Ok(Json(appointment))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((business_id, appointment_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    let business = owned_business(&state, &auth_user, business_id).await?;

    if !state
        .store
        .delete_appointment(business.id, appointment_id)
        .await?
    {
        return Err(ApiError::NotFound("Appointment not found".to_string()));
    }

    Ok(Json(json!({ "message": "Appointment deleted" })))
}

// =============================================================================
// SMS and integrations
// =============================================================================

pub async fn list_sms(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let page = Page::new(query.page, query.per_page)?;
    let business = owned_business(&state, &auth_user, business_id).await?;

    let (messages, total) = state.store.list_sms_messages(business.id, page).await?;
    Ok(Json(page_json("messages", Paginated::new(messages, total, page))))
}

pub async fn list_integrations(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let business = owned_business(&state, &auth_user, business_id).await?;
    let integrations = state.store.list_integrations(business.id).await?;
    Ok(Json(json!({ "integrations": integrations })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use callally_shared::BusinessHours;

    #[test]
    fn test_update_validation() {
        let update: BusinessUpdate =
            serde_json::from_value(json!({ "rings_before_ai": 0 })).unwrap();
        assert!(update.validate().is_err());

        let update: BusinessUpdate =
            serde_json::from_value(json!({ "agent_voice": "robot" })).unwrap();
        assert!(update.validate().is_err());

        let update: BusinessUpdate = serde_json::from_value(json!({ "name": "  " })).unwrap();
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_update_applies_only_present_fields() {
        let mut business = Business::new(Uuid::new_v4(), "Acme", Some("a@b.com".into()));
        business.phone = Some("+1555".into());

        let update: BusinessUpdate = serde_json::from_value(json!({
            "name": "Acme Plumbing",
            "weekend_hours": "10am-2pm",
            "call_mode": "direct"
        }))
        .unwrap();
        update.validate().unwrap();
        update.apply(&mut business);

        assert_eq!(business.name, "Acme Plumbing");
        assert_eq!(business.phone.as_deref(), Some("+1555"));
        assert_eq!(
            business.business_hours,
            BusinessHours {
                weekday: "9am-5pm".into(),
                weekend: "10am-2pm".into()
            }
        );
        assert_eq!(business.call_mode, CallRoutingMode::Direct);
    }

    #[test]
    fn test_page_json_uses_key() {
        let page = Page::new(Some(2), Some(2)).unwrap();
        let body = page_json("calls", Paginated::new(vec![1, 2], 5, page));
        assert_eq!(body["calls"], json!([1, 2]));
        assert_eq!(body["total"], 5);
        assert_eq!(body["has_more"], true);
    }
}
