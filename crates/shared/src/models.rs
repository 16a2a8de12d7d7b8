//! Tenant domain models
//!
//! Every tenant-scoped record hangs off a [`Business`], which in turn belongs
//! to exactly one [`User`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Implements `as_str`, `Display` and `FromStr` for a unit-only enum whose
/// wire form is a fixed lowercase string.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessStatus {
    Onboarding,
    Active,
}

string_enum!(BusinessStatus {
    Onboarding => "onboarding",
    Active => "active",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRoutingMode {
    /// Calls ring the business line first and fall through to the assistant.
    #[default]
    Forwarding,
    /// The provisioned number goes straight to the assistant.
    Direct,
}

string_enum!(CallRoutingMode {
    Forwarding => "forwarding",
    Direct => "direct",
});

/// Subscription plan tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Starter,
    Professional,
    Business,
}

string_enum!(Plan {
    Starter => "starter",
    Professional => "professional",
    Business => "business",
});

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Starter, Plan::Professional, Plan::Business];

    /// Monthly list price in cents.
    pub fn price_cents(&self) -> i64 {
        match self {
            Plan::Starter => 4900,
            Plan::Professional => 9900,
            Plan::Business => 19900,
        }
    }

    /// Call minutes included per month.
    pub fn included_minutes(&self) -> i64 {
        match self {
            Plan::Starter => 100,
            Plan::Professional => 300,
            Plan::Business => 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub weekday: String,
    pub weekend: String,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            weekday: "9am-5pm".to_string(),
            weekend: "Closed".to_string(),
        }
    }
}

impl fmt::Display for BusinessHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Weekdays: {}, Weekends: {}", self.weekday, self.weekend)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Business {
    pub id: Uuid,
    pub user_id: Uuid,

    pub name: String,
    pub industry: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub service_area: Option<String>,

    pub services: Vec<String>,
    pub custom_services: Option<String>,
    pub appointment_types: Vec<String>,
    pub appointment_duration_minutes: i32,

    pub business_hours: BusinessHours,

    pub call_mode: CallRoutingMode,
    pub rings_before_ai: i32,

    pub emergency_dispatch: bool,
    pub emergency_keywords: Vec<String>,
    pub emergency_phones: Vec<String>,

    pub agent_name: String,
    pub agent_voice: String,
    pub greeting_style: String,

    pub notification_phone: Option<String>,

    pub vapi_assistant_id: Option<String>,
    pub vapi_phone_id: Option<String>,
    pub vapi_phone_number: Option<String>,

    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_plan: Option<Plan>,
    pub subscription_status: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,

    pub status: BusinessStatus,
    pub onboarding_step: i32,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Business {
    /// A fresh business as created at signup.
    pub fn new(user_id: Uuid, name: impl Into<String>, email: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            industry: None,
            phone: None,
            email,
            website: None,
            address: None,
            service_area: None,
            services: Vec::new(),
            custom_services: None,
            appointment_types: Vec::new(),
            appointment_duration_minutes: 30,
            business_hours: BusinessHours::default(),
            call_mode: CallRoutingMode::default(),
            rings_before_ai: 3,
            emergency_dispatch: false,
            emergency_keywords: Vec::new(),
            emergency_phones: Vec::new(),
            agent_name: "Alex".to_string(),
            agent_voice: "rachel".to_string(),
            greeting_style: "friendly".to_string(),
            notification_phone: None,
            vapi_assistant_id: None,
            vapi_phone_id: None,
            vapi_phone_number: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            subscription_plan: None,
            subscription_status: None,
            trial_ends_at: None,
            status: BusinessStatus::Onboarding,
            onboarding_step: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BusinessStatus::Active
    }

    /// Included minutes for the current plan (starter when no plan is set).
    pub fn minutes_limit(&self) -> i64 {
        self.subscription_plan
            .unwrap_or(Plan::Starter)
            .included_minutes()
    }

    /// Services offered, with the free-text custom services appended.
    pub fn services_description(&self) -> String {
        let mut parts: Vec<&str> = self.services.iter().map(String::as_str).collect();
        if let Some(custom) = self.custom_services.as_deref().filter(|s| !s.is_empty()) {
            parts.push(custom);
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Completed,
    Missed,
    Voicemail,
    InProgress,
}

string_enum!(CallStatus {
    Completed => "completed",
    Missed => "missed",
    Voicemail => "voicemail",
    InProgress => "in_progress",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

string_enum!(CallDirection {
    Inbound => "inbound",
    Outbound => "outbound",
});

#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub id: Uuid,
    pub business_id: Uuid,
    pub provider_call_id: String,
    pub caller_phone: String,
    pub caller_name: Option<String>,
    pub direction: CallDirection,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub duration_seconds: Option<i32>,
    pub status: CallStatus,
    pub appointment_booked: bool,
    pub callback_requested: bool,
    pub emergency_triggered: bool,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub recording_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

string_enum!(AppointmentStatus {
    Scheduled => "scheduled",
    Confirmed => "confirmed",
    Completed => "completed",
    Cancelled => "cancelled",
    NoShow => "no_show",
});

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Whether a dashboard update may move an appointment from `self` to
    /// `next`. Re-assigning the current status is always allowed.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            AppointmentStatus::Scheduled => next != AppointmentStatus::Scheduled,
            AppointmentStatus::Confirmed => matches!(
                next,
                AppointmentStatus::Completed
                    | AppointmentStatus::Cancelled
                    | AppointmentStatus::NoShow
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: Uuid,
    pub business_id: Uuid,
    pub call_id: Option<Uuid>,
    #[serde(skip_serializing)]
    pub provider_call_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub customer_address: Option<String>,
    pub service_type: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub appointment_date: OffsetDateTime,
    pub duration_minutes: i32,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub reminder_sent: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmsMessage {
    pub id: Uuid,
    pub business_id: Uuid,
    pub phone_number: String,
    pub direction: CallDirection,
    pub body: String,
    pub status: String,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A third-party connection (calendar, CRM) configured for a business.
#[derive(Debug, Clone, Serialize)]
pub struct Integration {
    pub id: Uuid,
    pub business_id: Uuid,
    pub provider: String,
    pub status: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub token_expires_at: Option<OffsetDateTime>,
    pub config: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Usage attributed to one reconciled call.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub business_id: Uuid,
    pub provider_call_id: String,
    pub record_date: Date,
    pub call_count: i32,
    pub minutes_used: f64,
    pub appointments_booked: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
