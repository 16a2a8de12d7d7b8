//! Hosted checkout for plan changes

use callally_shared::Plan;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CustomerId,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

pub struct CheckoutService {
    stripe: StripeClient,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Create a subscription-mode checkout session and return its URL.
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        plan: Plan,
        trial_days: u32,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<String> {
        let price_id = self
            .stripe
            .config()
            .price_ids
            .price_id_for_plan(plan)
            .ok_or_else(|| BillingError::PriceNotConfigured(plan.to_string()))?;

        let customer = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid customer ID: {}", e)))?;

        let mut params = CreateCheckoutSession::new();
        params.customer = Some(customer);
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(success_url);
        params.cancel_url = Some(cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            trial_period_days: Some(trial_days),
            ..Default::default()
        });

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        tracing::info!(
            customer_id = %customer_id,
            session_id = %session.id,
            plan = %plan,
            "Created checkout session"
        );

        session
            .url
            .ok_or_else(|| BillingError::StripeApi("Checkout session has no URL".to_string()))
    }
}
