//! Postgres tenant store

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{
    round_to, BusinessStats, CallReport, NewAppointment, NewSmsMessage, ReconciledCall,
    StatsWindow, TenantStore,
};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Appointment, AppointmentStatus, Business, BusinessHours, Call, CallDirection, CallStatus,
    Integration, Plan, SmsMessage, UsageRecord, User,
};
use crate::pagination::Page;

const BUSINESS_COLUMNS: &str = r#"
    id, user_id, name, industry, phone, email, website, address, service_area,
    services, custom_services, appointment_types, appointment_duration_minutes,
    business_hours, call_mode, rings_before_ai,
    emergency_dispatch, emergency_keywords, emergency_phones,
    agent_name, agent_voice, greeting_style, notification_phone,
    vapi_assistant_id, vapi_phone_id, vapi_phone_number,
    stripe_customer_id, stripe_subscription_id, subscription_plan, subscription_status, trial_ends_at,
    status, onboarding_step, created_at, updated_at
"#;

const CALL_COLUMNS: &str = r#"
    id, business_id, provider_call_id, caller_phone, caller_name, direction,
    started_at, ended_at, duration_seconds, status,
    appointment_booked, callback_requested, emergency_triggered,
    transcript, summary, recording_url, created_at
"#;

const APPOINTMENT_COLUMNS: &str = r#"
    id, business_id, call_id, provider_call_id, customer_name, customer_phone, customer_email,
    customer_address, service_type, appointment_date, duration_minutes, notes, status,
    reminder_sent, created_at, updated_at
"#;

fn parse_column<T: FromStr<Err = String>>(entity: &'static str, value: &str) -> StoreResult<T> {
    value
        .parse()
        .map_err(|reason| StoreError::Corrupt { entity, reason })
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    is_active: bool,
    last_login: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            is_active: row.is_active,
            last_login: row.last_login,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BusinessRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    industry: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    website: Option<String>,
    address: Option<String>,
    service_area: Option<String>,
    services: Vec<String>,
    custom_services: Option<String>,
    appointment_types: Vec<String>,
    appointment_duration_minutes: i32,
    business_hours: Json<BusinessHours>,
    call_mode: String,
    rings_before_ai: i32,
    emergency_dispatch: bool,
    emergency_keywords: Vec<String>,
    emergency_phones: Vec<String>,
    agent_name: String,
    agent_voice: String,
    greeting_style: String,
    notification_phone: Option<String>,
    vapi_assistant_id: Option<String>,
    vapi_phone_id: Option<String>,
    vapi_phone_number: Option<String>,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    subscription_plan: Option<String>,
    subscription_status: Option<String>,
    trial_ends_at: Option<OffsetDateTime>,
    status: String,
    onboarding_step: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<BusinessRow> for Business {
    type Error = StoreError;

    fn try_from(row: BusinessRow) -> StoreResult<Self> {
        let subscription_plan = row
            .subscription_plan
            .as_deref()
            .map(|p| parse_column::<Plan>("business", p))
            .transpose()?;

        Ok(Business {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            industry: row.industry,
            phone: row.phone,
            email: row.email,
            website: row.website,
            address: row.address,
            service_area: row.service_area,
            services: row.services,
            custom_services: row.custom_services,
            appointment_types: row.appointment_types,
            appointment_duration_minutes: row.appointment_duration_minutes,
            business_hours: row.business_hours.0,
            call_mode: parse_column("business", &row.call_mode)?,
            rings_before_ai: row.rings_before_ai,
            emergency_dispatch: row.emergency_dispatch,
            emergency_keywords: row.emergency_keywords,
            emergency_phones: row.emergency_phones,
            agent_name: row.agent_name,
            agent_voice: row.agent_voice,
            greeting_style: row.greeting_style,
            notification_phone: row.notification_phone,
            vapi_assistant_id: row.vapi_assistant_id,
            vapi_phone_id: row.vapi_phone_id,
            vapi_phone_number: row.vapi_phone_number,
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            subscription_plan,
            subscription_status: row.subscription_status,
            trial_ends_at: row.trial_ends_at,
            status: parse_column("business", &row.status)?,
            onboarding_step: row.onboarding_step,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CallRow {
    id: Uuid,
    business_id: Uuid,
    provider_call_id: String,
    caller_phone: String,
    caller_name: Option<String>,
    direction: String,
    started_at: Option<OffsetDateTime>,
    ended_at: Option<OffsetDateTime>,
    duration_seconds: Option<i32>,
    status: String,
    appointment_booked: bool,
    callback_requested: bool,
    emergency_triggered: bool,
    transcript: Option<String>,
    summary: Option<String>,
    recording_url: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<CallRow> for Call {
    type Error = StoreError;

    fn try_from(row: CallRow) -> StoreResult<Self> {
        Ok(Call {
            id: row.id,
            business_id: row.business_id,
            provider_call_id: row.provider_call_id,
            caller_phone: row.caller_phone,
            caller_name: row.caller_name,
            direction: parse_column("call", &row.direction)?,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_seconds: row.duration_seconds,
            status: parse_column("call", &row.status)?,
            appointment_booked: row.appointment_booked,
            callback_requested: row.callback_requested,
            emergency_triggered: row.emergency_triggered,
            transcript: row.transcript,
            summary: row.summary,
            recording_url: row.recording_url,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AppointmentRow {
    id: Uuid,
    business_id: Uuid,
    call_id: Option<Uuid>,
    provider_call_id: Option<String>,
    customer_name: String,
    customer_phone: Option<String>,
    customer_email: Option<String>,
    customer_address: Option<String>,
    service_type: Option<String>,
    appointment_date: OffsetDateTime,
    duration_minutes: i32,
    notes: Option<String>,
    status: String,
    reminder_sent: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> StoreResult<Self> {
        Ok(Appointment {
            id: row.id,
            business_id: row.business_id,
            call_id: row.call_id,
            provider_call_id: row.provider_call_id,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            customer_email: row.customer_email,
            customer_address: row.customer_address,
            service_type: row.service_type,
            appointment_date: row.appointment_date,
            duration_minutes: row.duration_minutes,
            notes: row.notes,
            status: parse_column("appointment", &row.status)?,
            reminder_sent: row.reminder_sent,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SmsMessageRow {
    id: Uuid,
    business_id: Uuid,
    phone_number: String,
    direction: String,
    body: String,
    status: String,
    error_message: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<SmsMessageRow> for SmsMessage {
    type Error = StoreError;

    fn try_from(row: SmsMessageRow) -> StoreResult<Self> {
        Ok(SmsMessage {
            id: row.id,
            business_id: row.business_id,
            phone_number: row.phone_number,
            direction: parse_column("sms_message", &row.direction)?,
            body: row.body,
            status: row.status,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct IntegrationRow {
    id: Uuid,
    business_id: Uuid,
    provider: String,
    status: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expires_at: Option<OffsetDateTime>,
    config: serde_json::Value,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<IntegrationRow> for Integration {
    fn from(row: IntegrationRow) -> Self {
        Integration {
            id: row.id,
            business_id: row.business_id,
            provider: row.provider,
            status: row.status,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            token_expires_at: row.token_expires_at,
            config: row.config,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UsageRow {
    id: Uuid,
    business_id: Uuid,
    provider_call_id: String,
    record_date: Date,
    call_count: i32,
    minutes_used: f64,
    appointments_booked: i32,
    created_at: OffsetDateTime,
}

impl From<UsageRow> for UsageRecord {
    fn from(row: UsageRow) -> Self {
        UsageRecord {
            id: row.id,
            business_id: row.business_id,
            provider_call_id: row.provider_call_id,
            record_date: row.record_date,
            call_count: row.call_count,
            minutes_used: row.minutes_used,
            appointments_booked: row.appointments_booked,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    total_calls: i64,
    calls_today: i64,
    calls_this_week: i64,
    calls_this_month: i64,
    average_call_duration: Option<f64>,
    missed_calls: i64,
    voicemails: i64,
    appointments_booked: i64,
    appointments_this_week: i64,
    minutes_used_this_month: Option<f64>,
}

#[derive(Debug, FromRow)]
struct UpsertedCallRow {
    #[sqlx(flatten)]
    call: CallRow,
    inserted: bool,
}

/// Tenant store backed by Postgres.
#[derive(Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_business(&self, sql: &str, key: &str) -> StoreResult<Option<Business>> {
        let row: Option<BusinessRow> = sqlx::query_as(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Business::try_from).transpose()
    }
}

async fn insert_usage(
    tx: &mut Transaction<'_, Postgres>,
    report: &CallReport,
    appointment_booked: bool,
) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO usage_records
            (id, business_id, provider_call_id, record_date, call_count, minutes_used, appointments_booked, created_at)
        VALUES ($1, $2, $3, $4, 1, $5, $6, $7)
        ON CONFLICT (provider_call_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(report.business_id)
    .bind(&report.provider_call_id)
    .bind(report.received_at.date())
    .bind(report.minutes())
    .bind(i32::from(appointment_booked))
    .bind(report.received_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn create_user_with_business(
        &self,
        email: &str,
        password_hash: &str,
        business_name: &str,
    ) -> StoreResult<(User, Business)> {
        let email = email.trim().to_lowercase();
        let mut tx = self.pool.begin().await?;

        let user: Option<UserRow> = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, password_hash, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, TRUE, NOW(), NOW())
            ON CONFLICT (email) DO NOTHING
            RETURNING id, email, password_hash, is_active, last_login, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(password_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user) = user else {
            tx.rollback().await?;
            return Err(StoreError::AlreadyExists {
                entity: "user",
                key: email,
            });
        };

        let business = Business::new(user.id, business_name, Some(email));
        let row: BusinessRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO businesses (id, user_id, name, email, status, onboarding_step, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING {BUSINESS_COLUMNS}
            "#
        ))
        .bind(business.id)
        .bind(business.user_id)
        .bind(&business.name)
        .bind(&business.email)
        .bind(business.status.as_str())
        .bind(business.onboarding_step)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(user_id = %user.id, business_id = %row.id, "Created user and business");
        Ok((user.into(), row.try_into()?))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, password_hash, is_active, last_login, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, password_hash, is_active, last_login, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn record_login(&self, user_id: Uuid, at: OffsetDateTime) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_user_active(&self, user_id: Uuid, active: bool) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1")
                .bind(user_id)
                .bind(active)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_businesses_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Business>> {
        let rows: Vec<BusinessRow> = sqlx::query_as(&format!(
            "SELECT {BUSINESS_COLUMNS} FROM businesses WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Business::try_from).collect()
    }

    async fn get_business_for_user(
        &self,
        business_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Business>> {
        let row: Option<BusinessRow> = sqlx::query_as(&format!(
            "SELECT {BUSINESS_COLUMNS} FROM businesses WHERE id = $1 AND user_id = $2"
        ))
        .bind(business_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Business::try_from).transpose()
    }

    async fn get_business(&self, business_id: Uuid) -> StoreResult<Option<Business>> {
        let row: Option<BusinessRow> = sqlx::query_as(&format!(
            "SELECT {BUSINESS_COLUMNS} FROM businesses WHERE id = $1"
        ))
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Business::try_from).transpose()
    }

    async fn find_business_by_assistant(
        &self,
        assistant_id: &str,
    ) -> StoreResult<Option<Business>> {
        self.fetch_business(
            &format!("SELECT {BUSINESS_COLUMNS} FROM businesses WHERE vapi_assistant_id = $1"),
            assistant_id,
        )
        .await
    }

    async fn find_business_by_customer(&self, customer_id: &str) -> StoreResult<Option<Business>> {
        self.fetch_business(
            &format!("SELECT {BUSINESS_COLUMNS} FROM businesses WHERE stripe_customer_id = $1"),
            customer_id,
        )
        .await
    }

    async fn save_business(&self, b: &Business) -> StoreResult<Business> {
        let row: Option<BusinessRow> = sqlx::query_as(&format!(
            r#"
            UPDATE businesses SET
                name = $2, industry = $3, phone = $4, email = $5, website = $6, address = $7,
                service_area = $8, services = $9, custom_services = $10, appointment_types = $11,
                appointment_duration_minutes = $12, business_hours = $13, call_mode = $14,
                rings_before_ai = $15, emergency_dispatch = $16, emergency_keywords = $17,
                emergency_phones = $18, agent_name = $19, agent_voice = $20, greeting_style = $21,
                notification_phone = $22, vapi_assistant_id = $23, vapi_phone_id = $24,
                vapi_phone_number = $25, stripe_customer_id = $26, stripe_subscription_id = $27,
                subscription_plan = $28, subscription_status = $29, trial_ends_at = $30,
                status = $31, onboarding_step = $32, updated_at = NOW()
            WHERE id = $1
            RETURNING {BUSINESS_COLUMNS}
            "#
        ))
        .bind(b.id)
        .bind(&b.name)
        .bind(&b.industry)
        .bind(&b.phone)
        .bind(&b.email)
        .bind(&b.website)
        .bind(&b.address)
        .bind(&b.service_area)
        .bind(&b.services)
        .bind(&b.custom_services)
        .bind(&b.appointment_types)
        .bind(b.appointment_duration_minutes)
        .bind(Json(&b.business_hours))
        .bind(b.call_mode.as_str())
        .bind(b.rings_before_ai)
        .bind(b.emergency_dispatch)
        .bind(&b.emergency_keywords)
        .bind(&b.emergency_phones)
        .bind(&b.agent_name)
        .bind(&b.agent_voice)
        .bind(&b.greeting_style)
        .bind(&b.notification_phone)
        .bind(&b.vapi_assistant_id)
        .bind(&b.vapi_phone_id)
        .bind(&b.vapi_phone_number)
        .bind(&b.stripe_customer_id)
        .bind(&b.stripe_subscription_id)
        .bind(b.subscription_plan.map(|p| p.as_str()))
        .bind(&b.subscription_status)
        .bind(b.trial_ends_at)
        .bind(b.status.as_str())
        .bind(b.onboarding_step)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound {
            entity: "business",
            id: b.id.to_string(),
        })?
        .try_into()
    }

    async fn reconcile_call(&self, report: CallReport) -> StoreResult<ReconciledCall> {
        let mut tx = self.pool.begin().await?;

        // xmax = 0 only for rows created by this statement.
        let upserted: UpsertedCallRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO calls
                (id, business_id, provider_call_id, caller_phone, direction, started_at, ended_at,
                 duration_seconds, status, appointment_booked, emergency_triggered,
                 transcript, summary, recording_url, created_at)
            VALUES ($1, $2, $3, $4, 'inbound', $5, $6, $7, 'completed', $8, $9, $10, $11, $12, $13)
            ON CONFLICT (provider_call_id) DO UPDATE SET
                started_at = COALESCE(EXCLUDED.started_at, calls.started_at),
                ended_at = COALESCE(EXCLUDED.ended_at, calls.ended_at),
                duration_seconds = COALESCE(EXCLUDED.duration_seconds, calls.duration_seconds),
                status = 'completed',
                appointment_booked = EXCLUDED.appointment_booked,
                emergency_triggered = EXCLUDED.emergency_triggered,
                transcript = COALESCE(EXCLUDED.transcript, calls.transcript),
                summary = COALESCE(EXCLUDED.summary, calls.summary),
                recording_url = COALESCE(EXCLUDED.recording_url, calls.recording_url)
            RETURNING {CALL_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(report.business_id)
        .bind(&report.provider_call_id)
        .bind(&report.caller_phone)
        .bind(report.started_at)
        .bind(report.ended_at)
        .bind(report.duration_seconds)
        .bind(report.appointment_booked)
        .bind(report.emergency_triggered)
        .bind(&report.transcript)
        .bind(&report.summary)
        .bind(&report.recording_url)
        .bind(report.received_at)
        .fetch_one(&mut *tx)
        .await?;

        let call_created = upserted.inserted;
        let mut call = Call::try_from(upserted.call)?;

        let linked: i64 = sqlx::query_scalar(
            r#"
            WITH linked AS (
                UPDATE appointments
                SET call_id = COALESCE(call_id, $3), updated_at = NOW()
                WHERE business_id = $1 AND provider_call_id = $2
                RETURNING id
            )
            SELECT COUNT(*) FROM linked
            "#,
        )
        .bind(report.business_id)
        .bind(&report.provider_call_id)
        .bind(call.id)
        .fetch_one(&mut *tx)
        .await?;

        if linked > 0 && !call.appointment_booked {
            sqlx::query("UPDATE calls SET appointment_booked = TRUE WHERE id = $1")
                .bind(call.id)
                .execute(&mut *tx)
                .await?;
            call.appointment_booked = true;
        }

        let usage_recorded = insert_usage(&mut tx, &report, call.appointment_booked).await?;
        tx.commit().await?;

        Ok(ReconciledCall {
            call,
            call_created,
            usage_recorded,
        })
    }

    async fn get_call(&self, business_id: Uuid, call_id: Uuid) -> StoreResult<Option<Call>> {
        let row: Option<CallRow> = sqlx::query_as(&format!(
            "SELECT {CALL_COLUMNS} FROM calls WHERE id = $1 AND business_id = $2"
        ))
        .bind(call_id)
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Call::try_from).transpose()
    }

    async fn list_calls(&self, business_id: Uuid, page: Page) -> StoreResult<(Vec<Call>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM calls WHERE business_id = $1")
            .bind(business_id)
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<CallRow> = sqlx::query_as(&format!(
            r#"
            SELECT {CALL_COLUMNS} FROM calls
            WHERE business_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(business_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let calls = rows
            .into_iter()
            .map(Call::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((calls, total))
    }

    async fn create_appointment(&self, appointment: NewAppointment) -> StoreResult<Appointment> {
        let a = appointment.into_appointment(OffsetDateTime::now_utc());
        let row: AppointmentRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO appointments
                (id, business_id, call_id, provider_call_id, customer_name, customer_phone,
                 customer_email, customer_address, service_type, appointment_date,
                 duration_minutes, notes, status, reminder_sent, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, FALSE, $14, $14)
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(a.id)
        .bind(a.business_id)
        .bind(a.call_id)
        .bind(&a.provider_call_id)
        .bind(&a.customer_name)
        .bind(&a.customer_phone)
        .bind(&a.customer_email)
        .bind(&a.customer_address)
        .bind(&a.service_type)
        .bind(a.appointment_date)
        .bind(a.duration_minutes)
        .bind(&a.notes)
        .bind(a.status.as_str())
        .bind(a.created_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_appointment(
        &self,
        business_id: Uuid,
        appointment_id: Uuid,
    ) -> StoreResult<Option<Appointment>> {
        let row: Option<AppointmentRow> = sqlx::query_as(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1 AND business_id = $2"
        ))
        .bind(appointment_id)
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Appointment::try_from).transpose()
    }

    async fn list_appointments(
        &self,
        business_id: Uuid,
        status: Option<AppointmentStatus>,
        page: Page,
    ) -> StoreResult<(Vec<Appointment>, i64)> {
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM appointments
            WHERE business_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            "#,
        )
        .bind(business_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS} FROM appointments
            WHERE business_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY appointment_date DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(business_id)
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let appointments = rows
            .into_iter()
            .map(Appointment::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((appointments, total))
    }

    async fn save_appointment(&self, a: &Appointment) -> StoreResult<Appointment> {
        let row: Option<AppointmentRow> = sqlx::query_as(&format!(
            r#"
            UPDATE appointments SET
                call_id = $3, customer_name = $4, customer_phone = $5, customer_email = $6,
                customer_address = $7, service_type = $8, appointment_date = $9,
                duration_minutes = $10, notes = $11, status = $12, reminder_sent = $13,
                updated_at = NOW()
            WHERE id = $1 AND business_id = $2
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(a.id)
        .bind(a.business_id)
        .bind(a.call_id)
        .bind(&a.customer_name)
        .bind(&a.customer_phone)
        .bind(&a.customer_email)
        .bind(&a.customer_address)
        .bind(&a.service_type)
        .bind(a.appointment_date)
        .bind(a.duration_minutes)
        .bind(&a.notes)
        .bind(a.status.as_str())
        .bind(a.reminder_sent)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound {
            entity: "appointment",
            id: a.id.to_string(),
        })?
        .try_into()
    }

    async fn delete_appointment(
        &self,
        business_id: Uuid,
        appointment_id: Uuid,
    ) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM appointments WHERE id = $1 AND business_id = $2")
            .bind(appointment_id)
            .bind(business_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_usage(&self, business_id: Uuid) -> StoreResult<Vec<UsageRecord>> {
        let rows: Vec<UsageRow> = sqlx::query_as(
            r#"
            SELECT id, business_id, provider_call_id, record_date, call_count, minutes_used,
                   appointments_booked, created_at
            FROM usage_records
            WHERE business_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UsageRecord::from).collect())
    }

    async fn business_stats(
        &self,
        business_id: Uuid,
        window: StatsWindow,
    ) -> StoreResult<BusinessStats> {
        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM calls WHERE business_id = $1) AS total_calls,
                (SELECT COUNT(*) FROM calls WHERE business_id = $1 AND created_at >= $2) AS calls_today,
                (SELECT COUNT(*) FROM calls WHERE business_id = $1 AND created_at >= $3) AS calls_this_week,
                (SELECT COUNT(*) FROM calls WHERE business_id = $1 AND created_at >= $4) AS calls_this_month,
                (SELECT AVG(duration_seconds)::FLOAT8 FROM calls
                    WHERE business_id = $1 AND duration_seconds IS NOT NULL) AS average_call_duration,
                (SELECT COUNT(*) FROM calls WHERE business_id = $1 AND status = 'missed') AS missed_calls,
                (SELECT COUNT(*) FROM calls WHERE business_id = $1 AND status = 'voicemail') AS voicemails,
                (SELECT COUNT(*) FROM appointments WHERE business_id = $1) AS appointments_booked,
                (SELECT COUNT(*) FROM appointments
                    WHERE business_id = $1 AND created_at >= $3) AS appointments_this_week,
                (SELECT SUM(minutes_used) FROM usage_records
                    WHERE business_id = $1 AND created_at >= $4) AS minutes_used_this_month
            "#,
        )
        .bind(business_id)
        .bind(window.today_start)
        .bind(window.week_start)
        .bind(window.month_start)
        .fetch_one(&self.pool)
        .await?;

        Ok(BusinessStats {
            total_calls: row.total_calls,
            calls_today: row.calls_today,
            calls_this_week: row.calls_this_week,
            calls_this_month: row.calls_this_month,
            appointments_booked: row.appointments_booked,
            appointments_this_week: row.appointments_this_week,
            average_call_duration: round_to(row.average_call_duration.unwrap_or(0.0), 1),
            missed_calls: row.missed_calls,
            voicemails: row.voicemails,
            minutes_used_this_month: round_to(row.minutes_used_this_month.unwrap_or(0.0), 2),
        })
    }

    async fn record_sms_message(&self, message: NewSmsMessage) -> StoreResult<SmsMessage> {
        let row: SmsMessageRow = sqlx::query_as(
            r#"
            INSERT INTO sms_messages
                (id, business_id, phone_number, direction, body, status, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id, business_id, phone_number, direction, body, status, error_message, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.business_id)
        .bind(&message.phone_number)
        .bind(message.direction.as_str())
        .bind(&message.body)
        .bind(&message.status)
        .bind(&message.error_message)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn list_sms_messages(
        &self,
        business_id: Uuid,
        page: Page,
    ) -> StoreResult<(Vec<SmsMessage>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sms_messages WHERE business_id = $1")
                .bind(business_id)
                .fetch_one(&self.pool)
                .await?;

        let rows: Vec<SmsMessageRow> = sqlx::query_as(
            r#"
            SELECT id, business_id, phone_number, direction, body, status, error_message, created_at
            FROM sms_messages
            WHERE business_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(business_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(SmsMessage::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((messages, total))
    }

    async fn upsert_integration(
        &self,
        business_id: Uuid,
        provider: &str,
        status: &str,
        config: serde_json::Value,
    ) -> StoreResult<Integration> {
        let row: IntegrationRow = sqlx::query_as(
            r#"
            INSERT INTO integrations (id, business_id, provider, status, config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (business_id, provider) DO UPDATE SET
                status = EXCLUDED.status,
                config = EXCLUDED.config,
                updated_at = NOW()
            RETURNING id, business_id, provider, status, access_token, refresh_token,
                      token_expires_at, config, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(business_id)
        .bind(provider)
        .bind(status)
        .bind(&config)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn list_integrations(&self, business_id: Uuid) -> StoreResult<Vec<Integration>> {
        let rows: Vec<IntegrationRow> = sqlx::query_as(
            r#"
            SELECT id, business_id, provider, status, access_token, refresh_token,
                   token_expires_at, config, created_at, updated_at
            FROM integrations
            WHERE business_id = $1
            ORDER BY provider
            "#,
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Integration::from).collect())
    }
}
