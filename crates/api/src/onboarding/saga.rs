//! Onboarding completion
//!
//! Walks a business through assistant creation, phone provisioning, billing
//! and the welcome email. Only the assistant is required; the remaining
//! steps report a [`StepFailure`] and the saga carries on. Nothing is rolled
//! back: resources bought from a provider stay bought.

use std::fmt;
use std::sync::Arc;

use callally_billing::BillingProvider;
use callally_shared::{Business, BusinessStatus, Plan, StoreError, TenantStore};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::email::Notifier;
use crate::vapi::{PhoneNumber, VoiceProvider};

pub const LIVE_MESSAGE: &str = "Your AI receptionist is now live!";
pub const ALREADY_COMPLETE: &str = "Onboarding already complete";
pub const INCOMPLETE_STEPS: &str = "Please complete all onboarding steps first";
pub const ASSISTANT_FAILED: &str = "Failed to create AI assistant. Please try again.";

/// At most this many failures are named in the result message.
const MAX_REPORTED_FAILURES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("{}", INCOMPLETE_STEPS)]
    Incomplete,
    #[error("{}", ASSISTANT_FAILED)]
    AssistantFailed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A non-fatal step that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    PhoneProvisioning(String),
    BillingCustomer(String),
    TrialSubscription(String),
    WelcomeEmail(String),
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::PhoneProvisioning(reason) => {
                write!(f, "Phone provisioning failed: {}", reason)
            }
            StepFailure::BillingCustomer(reason) => write!(f, "Billing setup failed: {}", reason),
            StepFailure::TrialSubscription(reason) => {
                write!(f, "Trial subscription failed: {}", reason)
            }
            StepFailure::WelcomeEmail(reason) => write!(f, "Welcome email failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OnboardingResult {
    pub success: bool,
    pub business_id: Uuid,
    pub phone_number: Option<String>,
    pub assistant_id: Option<String>,
    pub message: String,
}

impl OnboardingResult {
    fn for_business(business: &Business, message: String) -> Self {
        Self {
            success: true,
            business_id: business.id,
            phone_number: business.vapi_phone_number.clone(),
            assistant_id: business.vapi_assistant_id.clone(),
            message,
        }
    }
}

/// Result message, naming the first few failures.
pub fn summarize(failures: &[StepFailure]) -> String {
    if failures.is_empty() {
        return LIVE_MESSAGE.to_string();
    }
    let listed: Vec<String> = failures
        .iter()
        .take(MAX_REPORTED_FAILURES)
        .map(ToString::to_string)
        .collect();
    format!("{} (with warnings: {})", LIVE_MESSAGE, listed.join("; "))
}

pub struct OnboardingSaga {
    store: Arc<dyn TenantStore>,
    voice: Arc<dyn VoiceProvider>,
    billing: Option<Arc<dyn BillingProvider>>,
    notifier: Arc<dyn Notifier>,
    trial_days: u32,
}

impl OnboardingSaga {
    pub fn new(
        store: Arc<dyn TenantStore>,
        voice: Arc<dyn VoiceProvider>,
        billing: Option<Arc<dyn BillingProvider>>,
        notifier: Arc<dyn Notifier>,
        trial_days: u32,
    ) -> Self {
        Self {
            store,
            voice,
            billing,
            notifier,
            trial_days,
        }
    }

    /// Bring `business` live. Safe to call again on an active business.
    pub async fn complete(
        &self,
        mut business: Business,
        owner_email: &str,
    ) -> Result<OnboardingResult, SagaError> {
        if business.is_active() {
            return Ok(OnboardingResult::for_business(
                &business,
                ALREADY_COMPLETE.to_string(),
            ));
        }

        let has_industry = business
            .industry
            .as_deref()
            .is_some_and(|i| !i.trim().is_empty());
        if business.name.trim().is_empty() || !has_industry {
            return Err(SagaError::Incomplete);
        }

        let assistant_id = match business.vapi_assistant_id.clone() {
            Some(id) => id,
            None => self.voice.create_assistant(&business).await.map_err(|e| {
                tracing::error!(
                    business_id = %business.id,
                    error = %e,
                    "Assistant creation failed, aborting onboarding"
                );
                SagaError::AssistantFailed(e.to_string())
            })?,
        };
        business.vapi_assistant_id = Some(assistant_id.clone());

        let mut failures = Vec::new();

        if business.vapi_phone_id.is_none() {
            match self.provision_phone(&assistant_id).await {
                Ok(phone) => {
                    business.vapi_phone_id = Some(phone.id);
                    business.vapi_phone_number = Some(phone.number);
                }
                Err(failure) => failures.push(failure),
            }
        }

        let contact_email = business
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| owner_email.to_string());

        if let Err(failure) = self.setup_billing(&mut business, &contact_email).await {
            failures.push(failure);
        }

        business.status = BusinessStatus::Active;
        business.updated_at = OffsetDateTime::now_utc();
        let business = self.store.save_business(&business).await?;

        if let Err(failure) = self.send_welcome(&business, &contact_email).await {
            failures.push(failure);
        }

        tracing::info!(
            business_id = %business.id,
            assistant_id = %assistant_id,
            warnings = failures.len(),
            "Onboarding completed"
        );

        Ok(OnboardingResult::for_business(
            &business,
            summarize(&failures),
        ))
    }

    async fn provision_phone(&self, assistant_id: &str) -> Result<PhoneNumber, StepFailure> {
        self.voice
            .provision_phone_number(assistant_id)
            .await
            .map_err(|e| {
                tracing::warn!(assistant_id = %assistant_id, error = %e, "Phone provisioning failed");
                StepFailure::PhoneProvisioning(e.to_string())
            })
    }

    async fn setup_billing(
        &self,
        business: &mut Business,
        email: &str,
    ) -> Result<(), StepFailure> {
        let Some(billing) = self.billing.as_ref() else {
            return Err(StepFailure::BillingCustomer(
                "billing is not configured".to_string(),
            ));
        };

        let customer_id = match business.stripe_customer_id.clone() {
            Some(id) => id,
            None => {
                let id = billing
                    .create_customer(email, &business.name, business.id)
                    .await
                    .map_err(|e| {
                        tracing::warn!(business_id = %business.id, error = %e, "Billing customer creation failed");
                        StepFailure::BillingCustomer(e.to_string())
                    })?;
                business.stripe_customer_id = Some(id.clone());
                id
            }
        };

        let trial = billing
            .create_trial_subscription(&customer_id, Plan::Starter, self.trial_days)
            .await
            .map_err(|e| {
                tracing::warn!(business_id = %business.id, error = %e, "Trial subscription failed");
                StepFailure::TrialSubscription(e.to_string())
            })?;

        business.subscription_plan = Some(Plan::Starter);
        business.subscription_status = Some(trial.status);
        business.trial_ends_at = trial.trial_end;
        if trial.subscription_id.is_some() {
            business.stripe_subscription_id = trial.subscription_id;
        }
        Ok(())
    }

    async fn send_welcome(&self, business: &Business, to: &str) -> Result<(), StepFailure> {
        self.notifier
            .send_welcome(to, &business.name, business.vapi_phone_number.as_deref())
            .await
            .map_err(|e| {
                tracing::warn!(business_id = %business.id, error = %e, "Welcome email failed");
                StepFailure::WelcomeEmail(e.to_string())
            })
    }
}
