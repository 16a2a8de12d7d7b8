//! In-memory tenant store for tests and database-less development runs

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    round_to, BusinessStats, CallReport, NewAppointment, NewSmsMessage, ReconciledCall,
    StatsWindow, TenantStore,
};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Appointment, AppointmentStatus, Business, Call, CallDirection, CallStatus, Integration,
    SmsMessage, UsageRecord, User,
};
use crate::pagination::Page;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    businesses: HashMap<Uuid, Business>,
    calls: HashMap<Uuid, Call>,
    appointments: HashMap<Uuid, Appointment>,
    sms_messages: Vec<SmsMessage>,
    integrations: Vec<Integration>,
    usage: Vec<UsageRecord>,
}

/// Tenant store backed by process memory. All writes for one operation
/// happen under a single write lock, which gives the same all-or-nothing
/// behaviour as a database transaction.
#[derive(Default)]
pub struct MemoryTenantStore {
    tables: RwLock<Tables>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn create_user_with_business(
        &self,
        email: &str,
        password_hash: &str,
        business_name: &str,
    ) -> StoreResult<(User, Business)> {
        let email = normalize_email(email);
        let mut tables = self.tables.write().await;

        if tables.users.values().any(|u| u.email == email) {
            return Err(StoreError::AlreadyExists {
                entity: "user",
                key: email,
            });
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash: password_hash.to_string(),
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        let business = Business::new(user.id, business_name, Some(email));

        tables.users.insert(user.id, user.clone());
        tables.businesses.insert(business.id, business.clone());
        Ok((user, business))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = normalize_email(email);
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn record_login(&self, user_id: Uuid, at: OffsetDateTime) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            })?;
        user.last_login = Some(at);
        Ok(())
    }

    async fn set_user_active(&self, user_id: Uuid, active: bool) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            })?;
        user.is_active = active;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn list_businesses_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Business>> {
        let tables = self.tables.read().await;
        let mut businesses: Vec<Business> = tables
            .businesses
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        businesses.sort_by_key(|b| b.created_at);
        Ok(businesses)
    }

    async fn get_business_for_user(
        &self,
        business_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Business>> {
        let tables = self.tables.read().await;
        Ok(tables
            .businesses
            .get(&business_id)
            .filter(|b| b.user_id == user_id)
            .cloned())
    }

    async fn get_business(&self, business_id: Uuid) -> StoreResult<Option<Business>> {
        Ok(self.tables.read().await.businesses.get(&business_id).cloned())
    }

    async fn find_business_by_assistant(
        &self,
        assistant_id: &str,
    ) -> StoreResult<Option<Business>> {
        let tables = self.tables.read().await;
        Ok(tables
            .businesses
            .values()
            .find(|b| b.vapi_assistant_id.as_deref() == Some(assistant_id))
            .cloned())
    }

    async fn find_business_by_customer(&self, customer_id: &str) -> StoreResult<Option<Business>> {
        let tables = self.tables.read().await;
        Ok(tables
            .businesses
            .values()
            .find(|b| b.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn save_business(&self, business: &Business) -> StoreResult<Business> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .businesses
            .get_mut(&business.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "business",
                id: business.id.to_string(),
            })?;

        let mut updated = business.clone();
        updated.user_id = stored.user_id;
        updated.created_at = stored.created_at;
        updated.updated_at = OffsetDateTime::now_utc();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn reconcile_call(&self, report: CallReport) -> StoreResult<ReconciledCall> {
        let mut tables = self.tables.write().await;
        let minutes = report.minutes();

        let existing_id = tables
            .calls
            .values()
            .find(|c| c.provider_call_id == report.provider_call_id)
            .map(|c| c.id);
        let call_id = existing_id.unwrap_or_else(Uuid::new_v4);

        let mut linked_bookings = 0;
        for appointment in tables.appointments.values_mut() {
            if appointment.business_id == report.business_id
                && appointment.provider_call_id.as_deref() == Some(report.provider_call_id.as_str())
            {
                if appointment.call_id.is_none() {
                    appointment.call_id = Some(call_id);
                }
                linked_bookings += 1;
            }
        }
        let appointment_booked = report.appointment_booked || linked_bookings > 0;

        let call = match existing_id.and_then(|id| tables.calls.get_mut(&id)) {
            Some(call) => {
                call.started_at = report.started_at.or(call.started_at);
                call.ended_at = report.ended_at.or(call.ended_at);
                call.duration_seconds = report.duration_seconds.or(call.duration_seconds);
                call.status = CallStatus::Completed;
                call.appointment_booked = appointment_booked;
                call.emergency_triggered = report.emergency_triggered;
                call.transcript = report.transcript.clone().or(call.transcript.take());
                call.summary = report.summary.clone().or(call.summary.take());
                call.recording_url = report.recording_url.clone().or(call.recording_url.take());
                call.clone()
            }
            None => {
                let call = Call {
                    id: call_id,
                    business_id: report.business_id,
                    provider_call_id: report.provider_call_id.clone(),
                    caller_phone: report.caller_phone.clone(),
                    caller_name: None,
                    direction: CallDirection::Inbound,
                    started_at: report.started_at,
                    ended_at: report.ended_at,
                    duration_seconds: report.duration_seconds,
                    status: CallStatus::Completed,
                    appointment_booked,
                    callback_requested: false,
                    emergency_triggered: report.emergency_triggered,
                    transcript: report.transcript.clone(),
                    summary: report.summary.clone(),
                    recording_url: report.recording_url.clone(),
                    created_at: report.received_at,
                };
                tables.calls.insert(call.id, call.clone());
                call
            }
        };

        let usage_recorded = !tables
            .usage
            .iter()
            .any(|u| u.provider_call_id == report.provider_call_id);
        if usage_recorded {
            tables.usage.push(UsageRecord {
                id: Uuid::new_v4(),
                business_id: report.business_id,
                provider_call_id: report.provider_call_id.clone(),
                record_date: report.received_at.date(),
                call_count: 1,
                minutes_used: minutes,
                appointments_booked: i32::from(appointment_booked),
                created_at: report.received_at,
            });
        }

        Ok(ReconciledCall {
            call,
            call_created: existing_id.is_none(),
            usage_recorded,
        })
    }

    async fn get_call(&self, business_id: Uuid, call_id: Uuid) -> StoreResult<Option<Call>> {
        let tables = self.tables.read().await;
        Ok(tables
            .calls
            .get(&call_id)
            .filter(|c| c.business_id == business_id)
            .cloned())
    }

    async fn list_calls(&self, business_id: Uuid, page: Page) -> StoreResult<(Vec<Call>, i64)> {
        let tables = self.tables.read().await;
        let mut calls: Vec<Call> = tables
            .calls
            .values()
            .filter(|c| c.business_id == business_id)
            .cloned()
            .collect();
        calls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok((page.slice(&calls), calls.len() as i64))
    }

    async fn create_appointment(&self, appointment: NewAppointment) -> StoreResult<Appointment> {
        let appointment = appointment.into_appointment(OffsetDateTime::now_utc());
        let mut tables = self.tables.write().await;
        if !tables.businesses.contains_key(&appointment.business_id) {
            return Err(StoreError::NotFound {
                entity: "business",
                id: appointment.business_id.to_string(),
            });
        }
        tables.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn get_appointment(
        &self,
        business_id: Uuid,
        appointment_id: Uuid,
    ) -> StoreResult<Option<Appointment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .appointments
            .get(&appointment_id)
            .filter(|a| a.business_id == business_id)
            .cloned())
    }

    async fn list_appointments(
        &self,
        business_id: Uuid,
        status: Option<AppointmentStatus>,
        page: Page,
    ) -> StoreResult<(Vec<Appointment>, i64)> {
        let tables = self.tables.read().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.business_id == business_id)
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        appointments.sort_by(|a, b| b.appointment_date.cmp(&a.appointment_date));
        Ok((page.slice(&appointments), appointments.len() as i64))
    }

    async fn save_appointment(&self, appointment: &Appointment) -> StoreResult<Appointment> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .appointments
            .get_mut(&appointment.id)
            .filter(|a| a.business_id == appointment.business_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "appointment",
                id: appointment.id.to_string(),
            })?;

        let mut updated = appointment.clone();
        updated.created_at = stored.created_at;
        updated.updated_at = OffsetDateTime::now_utc();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_appointment(
        &self,
        business_id: Uuid,
        appointment_id: Uuid,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let owned = tables
            .appointments
            .get(&appointment_id)
            .is_some_and(|a| a.business_id == business_id);
        if owned {
            tables.appointments.remove(&appointment_id);
        }
        Ok(owned)
    }

    async fn list_usage(&self, business_id: Uuid) -> StoreResult<Vec<UsageRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .usage
            .iter()
            .filter(|u| u.business_id == business_id)
            .cloned()
            .collect())
    }

    async fn business_stats(
        &self,
        business_id: Uuid,
        window: StatsWindow,
    ) -> StoreResult<BusinessStats> {
        let tables = self.tables.read().await;
        let calls: Vec<&Call> = tables
            .calls
            .values()
            .filter(|c| c.business_id == business_id)
            .collect();
        let count_since = |since: OffsetDateTime| {
            calls.iter().filter(|c| c.created_at >= since).count() as i64
        };

        let durations: Vec<i32> = calls.iter().filter_map(|c| c.duration_seconds).collect();
        let average_call_duration = if durations.is_empty() {
            0.0
        } else {
            let sum: f64 = durations.iter().map(|d| f64::from(*d)).sum();
            round_to(sum / durations.len() as f64, 1)
        };

        let minutes_used_this_month = tables
            .usage
            .iter()
            .filter(|u| u.business_id == business_id && u.created_at >= window.month_start)
            .map(|u| u.minutes_used)
            .sum::<f64>();

        Ok(BusinessStats {
            total_calls: calls.len() as i64,
            calls_today: count_since(window.today_start),
            calls_this_week: count_since(window.week_start),
            calls_this_month: count_since(window.month_start),
            appointments_booked: tables
                .appointments
                .values()
                .filter(|a| a.business_id == business_id)
                .count() as i64,
            appointments_this_week: tables
                .appointments
                .values()
                .filter(|a| a.business_id == business_id && a.created_at >= window.week_start)
                .count() as i64,
            average_call_duration,
            missed_calls: calls
                .iter()
                .filter(|c| c.status == CallStatus::Missed)
                .count() as i64,
            voicemails: calls
                .iter()
                .filter(|c| c.status == CallStatus::Voicemail)
                .count() as i64,
            minutes_used_this_month: round_to(minutes_used_this_month, 2),
        })
    }

    async fn record_sms_message(&self, message: NewSmsMessage) -> StoreResult<SmsMessage> {
        let sms = SmsMessage {
            id: Uuid::new_v4(),
            business_id: message.business_id,
            phone_number: message.phone_number,
            direction: message.direction,
            body: message.body,
            status: message.status,
            error_message: message.error_message,
            created_at: OffsetDateTime::now_utc(),
        };
        self.tables.write().await.sms_messages.push(sms.clone());
        Ok(sms)
    }

    async fn list_sms_messages(
        &self,
        business_id: Uuid,
        page: Page,
    ) -> StoreResult<(Vec<SmsMessage>, i64)> {
        let tables = self.tables.read().await;
        let mut messages: Vec<SmsMessage> = tables
            .sms_messages
            .iter()
            .filter(|m| m.business_id == business_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok((page.slice(&messages), messages.len() as i64))
    }

    async fn upsert_integration(
        &self,
        business_id: Uuid,
        provider: &str,
        status: &str,
        config: serde_json::Value,
    ) -> StoreResult<Integration> {
        let now = OffsetDateTime::now_utc();
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .integrations
            .iter_mut()
            .find(|i| i.business_id == business_id && i.provider == provider)
        {
            existing.status = status.to_string();
            existing.config = config;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let integration = Integration {
            id: Uuid::new_v4(),
            business_id,
            provider: provider.to_string(),
            status: status.to_string(),
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            config,
            created_at: now,
            updated_at: now,
        };
        tables.integrations.push(integration.clone());
        Ok(integration)
    }

    async fn list_integrations(&self, business_id: Uuid) -> StoreResult<Vec<Integration>> {
        let tables = self.tables.read().await;
        Ok(tables
            .integrations
            .iter()
            .filter(|i| i.business_id == business_id)
            .cloned()
            .collect())
    }
}
