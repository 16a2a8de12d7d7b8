//! Subscription management

use std::collections::HashMap;

use callally_shared::Plan;
use stripe::{
    CancelSubscription, CreateSubscription, CreateSubscriptionItems, CustomerId, Subscription,
    SubscriptionId, SubscriptionStatus as StripeSubStatus, UpdateSubscription,
};
use time::{Duration, OffsetDateTime};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Outcome of starting a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSubscription {
    /// `None` in trial-only mode, where no Stripe subscription exists yet.
    pub subscription_id: Option<String>,
    pub status: String,
    pub trial_end: Option<OffsetDateTime>,
}

impl TrialSubscription {
    /// Local trial used when the plan has no Stripe price configured.
    pub fn trial_only(trial_days: u32, now: OffsetDateTime) -> Self {
        Self {
            subscription_id: None,
            status: "trialing".to_string(),
            trial_end: Some(now + Duration::days(i64::from(trial_days))),
        }
    }
}

pub(crate) fn status_str(status: StripeSubStatus) -> &'static str {
    match status {
        StripeSubStatus::Active => "active",
        StripeSubStatus::PastDue => "past_due",
        StripeSubStatus::Canceled => "canceled",
        StripeSubStatus::Unpaid => "unpaid",
        StripeSubStatus::Trialing => "trialing",
        StripeSubStatus::Incomplete => "incomplete",
        StripeSubStatus::IncompleteExpired => "incomplete_expired",
        StripeSubStatus::Paused => "paused",
    }
}

pub struct SubscriptionService {
    stripe: StripeClient,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Start a trial on `plan`. Without a configured price id this falls
    /// back to a local trial and makes no Stripe call.
    pub async fn create_trial_subscription(
        &self,
        customer_id: &str,
        plan: Plan,
        trial_days: u32,
    ) -> BillingResult<TrialSubscription> {
        let Some(price_id) = self.stripe.config().price_ids.price_id_for_plan(plan) else {
            tracing::warn!(
                customer_id = %customer_id,
                plan = %plan,
                "No Stripe price configured; starting trial-only subscription"
            );
            return Ok(TrialSubscription::trial_only(
                trial_days,
                OffsetDateTime::now_utc(),
            ));
        };

        let customer = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid customer ID: {}", e)))?;

        let mut metadata = HashMap::new();
        metadata.insert("plan".to_string(), plan.to_string());

        let mut params = CreateSubscription::new(customer);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.trial_period_days = Some(trial_days);
        params.metadata = Some(metadata);

        let subscription = Subscription::create(self.stripe.inner(), params).await?;

        tracing::info!(
            customer_id = %customer_id,
            subscription_id = %subscription.id,
            plan = %plan,
            "Created trial subscription"
        );

        Ok(TrialSubscription {
            subscription_id: Some(subscription.id.to_string()),
            status: status_str(subscription.status).to_string(),
            trial_end: subscription
                .trial_end
                .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok()),
        })
    }

    /// Cancel at period end, or immediately.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> BillingResult<()> {
        let sub_id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid subscription ID: {}", e)))?;

        if at_period_end {
            let params = UpdateSubscription {
                cancel_at_period_end: Some(true),
                ..Default::default()
            };
            Subscription::update(self.stripe.inner(), &sub_id, params).await?;
        } else {
            let params = CancelSubscription {
                cancellation_details: None,
                invoice_now: None,
                prorate: None,
            };
            Subscription::cancel(self.stripe.inner(), &sub_id, params).await?;
        }

        tracing::info!(
            subscription_id = %subscription_id,
            at_period_end = at_period_end,
            "Cancelled subscription"
        );

        Ok(())
    }
}
