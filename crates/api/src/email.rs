//! Transactional email via Resend
//!
//! Bodies are askama templates under `templates/email/`, so interpolated
//! values are HTML-escaped on render.

use std::time::Duration;

use askama::Template;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use time::{macros::format_description, Date};

use crate::config::ResendConfig;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Email provider not configured")]
    NotConfigured,
    #[error("Template render failed: {0}")]
    Render(#[from] askama::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Email provider returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// What the owner is told after a call ends.
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub business_name: String,
    pub caller: String,
    pub duration_seconds: Option<i32>,
    pub summary: Option<String>,
    pub appointment_booked: bool,
}

/// What a customer is told after booking during a call.
#[derive(Debug, Clone)]
pub struct AppointmentNotice {
    pub customer_name: String,
    pub business_name: String,
    pub service_type: String,
    pub date: Date,
    pub time: String,
    pub address: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifyError>;

    async fn send_welcome(
        &self,
        to: &str,
        business_name: &str,
        phone_number: Option<&str>,
    ) -> Result<(), NotifyError> {
        let (subject, html) = welcome_email(business_name, phone_number)?;
        self.send_email(to, &subject, &html).await
    }

    async fn send_call_notification(
        &self,
        to: &str,
        call: &CallSummary,
    ) -> Result<(), NotifyError> {
        let (subject, html) = call_notification_email(call)?;
        self.send_email(to, &subject, &html).await
    }

    async fn send_appointment_confirmation(
        &self,
        to: &str,
        notice: &AppointmentNotice,
    ) -> Result<(), NotifyError> {
        let (subject, html) = appointment_confirmation_email(notice)?;
        self.send_email(to, &subject, &html).await
    }
}

// =============================================================================
// Templates
// =============================================================================

#[derive(Template)]
#[template(path = "email/welcome.html")]
struct WelcomeTemplate<'a> {
    business_name: &'a str,
    phone_number: &'a str,
}

#[derive(Template)]
#[template(path = "email/call_notification.html")]
struct CallNotificationTemplate<'a> {
    caller: &'a str,
    duration: String,
    summary: &'a str,
    appointment_booked: bool,
}

#[derive(Template)]
#[template(path = "email/appointment_confirmation.html")]
struct AppointmentConfirmationTemplate<'a> {
    customer_name: &'a str,
    business_name: &'a str,
    service_type: &'a str,
    date: String,
    time: &'a str,
    address: Option<&'a str>,
}

/// "January 05, 2025"
pub fn format_long_date(date: Date) -> String {
    date.format(format_description!("[month repr:long] [day], [year]"))
        .unwrap_or_else(|_| date.to_string())
}

fn format_duration(seconds: Option<i32>) -> String {
    match seconds {
        Some(s) if s >= 60 => format!("{}m {}s", s / 60, s % 60),
        Some(s) => format!("{}s", s),
        None => "Unknown".to_string(),
    }
}

pub fn welcome_email(
    business_name: &str,
    phone_number: Option<&str>,
) -> Result<(String, String), NotifyError> {
    let html = WelcomeTemplate {
        business_name,
        phone_number: phone_number.unwrap_or("Pending"),
    }
    .render()?;
    Ok((
        "Welcome to CallAlly - Your AI Receptionist is Live!".to_string(),
        html,
    ))
}

pub fn call_notification_email(call: &CallSummary) -> Result<(String, String), NotifyError> {
    let html = CallNotificationTemplate {
        caller: &call.caller,
        duration: format_duration(call.duration_seconds),
        summary: call.summary.as_deref().unwrap_or("No summary available"),
        appointment_booked: call.appointment_booked,
    }
    .render()?;
    Ok((
        format!("New Call: {} - {}", call.caller, call.business_name),
        html,
    ))
}

pub fn appointment_confirmation_email(
    notice: &AppointmentNotice,
) -> Result<(String, String), NotifyError> {
    let html = AppointmentConfirmationTemplate {
        customer_name: &notice.customer_name,
        business_name: &notice.business_name,
        service_type: &notice.service_type,
        date: format_long_date(notice.date),
        time: &notice.time,
        address: notice.address.as_deref(),
    }
    .render()?;
    Ok((
        format!("Appointment Confirmed - {}", notice.business_name),
        html,
    ))
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Resend-backed [`Notifier`]
#[derive(Clone)]
pub struct ResendNotifier {
    http: Client,
    config: ResendConfig,
}

impl ResendNotifier {
    pub fn new(config: ResendConfig) -> Result<Self, NotifyError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http, config })
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.api_key.is_empty()
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifyError> {
        if !self.is_enabled() {
            tracing::warn!("RESEND_API_KEY not set; email not sent");
            return Err(NotifyError::NotConfigured);
        }

        let url = format!("{}/emails", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&SendEmailRequest {
                from: &self.config.from_email,
                to: [to],
                subject,
                html,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Email request failed");
                NotifyError::Http(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "Email provider rejected send");
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(subject = %subject, "Email sent");
        Ok(())
    }
}
