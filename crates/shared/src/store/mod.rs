//! Tenant store
//!
//! The [`TenantStore`] trait is the only persistence seam. `PgTenantStore`
//! backs production; `MemoryTenantStore` backs tests and database-less dev
//! runs. Both must agree on ordering, ownership checks and dedupe rules.

mod memory;
mod postgres;

pub use memory::MemoryTenantStore;
pub use postgres::PgTenantStore;

use async_trait::async_trait;
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime, Time};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{
    Appointment, AppointmentStatus, Business, Call, CallDirection, Integration, SmsMessage,
    UsageRecord, User,
};
use crate::pagination::Page;

/// Everything the voice reconciler learned from one end-of-call report.
#[derive(Debug, Clone)]
pub struct CallReport {
    pub business_id: Uuid,
    pub provider_call_id: String,
    pub caller_phone: String,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    pub duration_seconds: Option<i32>,
    /// Result of the transcript heuristic; linked bookings can still set the
    /// stored flag.
    pub appointment_booked: bool,
    pub emergency_triggered: bool,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub recording_url: Option<String>,
    pub received_at: OffsetDateTime,
}

impl CallReport {
    /// Billable minutes, rounded to two decimals.
    pub fn minutes(&self) -> f64 {
        round_to(f64::from(self.duration_seconds.unwrap_or(0)) / 60.0, 2)
    }
}

#[derive(Debug, Clone)]
pub struct ReconciledCall {
    pub call: Call,
    pub call_created: bool,
    pub usage_recorded: bool,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub business_id: Uuid,
    pub call_id: Option<Uuid>,
    pub provider_call_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub customer_address: Option<String>,
    pub service_type: Option<String>,
    pub appointment_date: OffsetDateTime,
    pub duration_minutes: i32,
    pub notes: Option<String>,
}

impl NewAppointment {
    pub(crate) fn into_appointment(self, now: OffsetDateTime) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            business_id: self.business_id,
            call_id: self.call_id,
            provider_call_id: self.provider_call_id,
            customer_name: self.customer_name,
            customer_phone: self.customer_phone,
            customer_email: self.customer_email,
            customer_address: self.customer_address,
            service_type: self.service_type,
            appointment_date: self.appointment_date,
            duration_minutes: self.duration_minutes,
            notes: self.notes,
            status: AppointmentStatus::Scheduled,
            reminder_sent: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSmsMessage {
    pub business_id: Uuid,
    pub phone_number: String,
    pub direction: CallDirection,
    pub body: String,
    pub status: String,
    pub error_message: Option<String>,
}

/// Period boundaries used by the dashboard stats.
#[derive(Debug, Clone, Copy)]
pub struct StatsWindow {
    pub today_start: OffsetDateTime,
    pub week_start: OffsetDateTime,
    pub month_start: OffsetDateTime,
}

impl StatsWindow {
    /// Day, Monday-based week and month starting points for `now` (UTC).
    pub fn for_instant(now: OffsetDateTime) -> Self {
        let now = now.to_offset(time::UtcOffset::UTC);
        let today = now.date();
        let days_from_monday = i64::from(today.weekday().number_days_from_monday());
        let monday = today - Duration::days(days_from_monday);
        let first_of_month = Date::from_calendar_date(today.year(), today.month(), 1)
            .unwrap_or(today);

        let start_of = |date: Date| date.with_time(Time::MIDNIGHT).assume_utc();
        Self {
            today_start: start_of(today),
            week_start: start_of(monday),
            month_start: start_of(first_of_month),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusinessStats {
    pub total_calls: i64,
    pub calls_today: i64,
    pub calls_this_week: i64,
    pub calls_this_month: i64,
    pub appointments_booked: i64,
    pub appointments_this_week: i64,
    /// Seconds, rounded to one decimal.
    pub average_call_duration: f64,
    pub missed_calls: i64,
    pub voicemails: i64,
    pub minutes_used_this_month: f64,
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Persistence for users, tenants and everything scoped under them.
#[async_trait]
pub trait TenantStore: Send + Sync {
    // Users

    /// Create a user and their first business in one unit of work.
    /// Fails with `AlreadyExists` when the email is taken; nothing is
    /// written in that case.
    async fn create_user_with_business(
        &self,
        email: &str,
        password_hash: &str,
        business_name: &str,
    ) -> StoreResult<(User, Business)>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn record_login(&self, user_id: Uuid, at: OffsetDateTime) -> StoreResult<()>;

    async fn set_user_active(&self, user_id: Uuid, active: bool) -> StoreResult<()>;

    // Businesses

    /// Businesses owned by a user, oldest first.
    async fn list_businesses_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Business>>;

    /// Ownership-checked lookup.
    async fn get_business_for_user(
        &self,
        business_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Business>>;

    async fn get_business(&self, business_id: Uuid) -> StoreResult<Option<Business>>;

    async fn find_business_by_assistant(&self, assistant_id: &str)
        -> StoreResult<Option<Business>>;

    async fn find_business_by_customer(&self, customer_id: &str) -> StoreResult<Option<Business>>;

    /// Overwrite every mutable field and bump `updated_at`.
    async fn save_business(&self, business: &Business) -> StoreResult<Business>;

    // Calls

    /// Upsert the call by provider id, link appointments booked during it
    /// and record its usage once.
    async fn reconcile_call(&self, report: CallReport) -> StoreResult<ReconciledCall>;

    async fn get_call(&self, business_id: Uuid, call_id: Uuid) -> StoreResult<Option<Call>>;

    /// Newest first.
    async fn list_calls(&self, business_id: Uuid, page: Page) -> StoreResult<(Vec<Call>, i64)>;

    // Appointments

    async fn create_appointment(&self, appointment: NewAppointment) -> StoreResult<Appointment>;

    async fn get_appointment(
        &self,
        business_id: Uuid,
        appointment_id: Uuid,
    ) -> StoreResult<Option<Appointment>>;

    /// Latest appointment date first.
    async fn list_appointments(
        &self,
        business_id: Uuid,
        status: Option<AppointmentStatus>,
        page: Page,
    ) -> StoreResult<(Vec<Appointment>, i64)>;

    async fn save_appointment(&self, appointment: &Appointment) -> StoreResult<Appointment>;

    /// Returns false when nothing matched.
    async fn delete_appointment(&self, business_id: Uuid, appointment_id: Uuid)
        -> StoreResult<bool>;

    // Usage and stats

    async fn list_usage(&self, business_id: Uuid) -> StoreResult<Vec<UsageRecord>>;

    async fn business_stats(
        &self,
        business_id: Uuid,
        window: StatsWindow,
    ) -> StoreResult<BusinessStats>;

    // SMS and integrations

    async fn record_sms_message(&self, message: NewSmsMessage) -> StoreResult<SmsMessage>;

    async fn list_sms_messages(
        &self,
        business_id: Uuid,
        page: Page,
    ) -> StoreResult<(Vec<SmsMessage>, i64)>;

    async fn upsert_integration(
        &self,
        business_id: Uuid,
        provider: &str,
        status: &str,
        config: serde_json::Value,
    ) -> StoreResult<Integration>;

    async fn list_integrations(&self, business_id: Uuid) -> StoreResult<Vec<Integration>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Weekday;

    #[test]
    fn test_stats_window_starts_monday() {
        // Thursday
        let window = StatsWindow::for_instant(datetime!(2025-03-13 15:30 UTC));
        assert_eq!(window.today_start, datetime!(2025-03-13 0:00 UTC));
        assert_eq!(window.week_start, datetime!(2025-03-10 0:00 UTC));
        assert_eq!(window.month_start, datetime!(2025-03-01 0:00 UTC));
        assert_eq!(window.week_start.weekday(), Weekday::Monday);
    }

    #[test]
    fn test_call_report_minutes_round_to_two_places() {
        let report = CallReport {
            business_id: Uuid::new_v4(),
            provider_call_id: "call_1".into(),
            caller_phone: "Unknown".into(),
            started_at: None,
            ended_at: None,
            duration_seconds: Some(95),
            appointment_booked: false,
            emergency_triggered: false,
            transcript: None,
            summary: None,
            recording_url: None,
            received_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(report.minutes(), 1.58);
    }
}
