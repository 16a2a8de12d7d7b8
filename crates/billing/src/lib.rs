// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Checkout sessions take several URLs and ids
#![allow(clippy::field_reassign_with_default)] // Used for conditional Stripe param setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! CallAlly Billing Module
//!
//! Stripe integration for the receptionist plans.
//!
//! ## Features
//!
//! - **Customers**: One Stripe customer per business, tagged with its id
//! - **Trials**: Trial subscriptions at signup, or a local trial when a plan
//!   has no price configured
//! - **Checkout and Portal**: Hosted pages for plan changes and self-service
//! - **Webhooks**: Signature verification and subscription state reconciliation

pub mod checkout;
pub mod client;
pub mod customer;
pub mod error;
pub mod portal;
pub mod subscriptions;
pub mod webhooks;

use async_trait::async_trait;
use callally_shared::Plan;
use uuid::Uuid;

// Checkout
pub use checkout::CheckoutService;

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Customer
pub use customer::CustomerService;

// Error
pub use error::{BillingError, BillingResult};

// Portal
pub use portal::PortalService;

// Subscriptions
pub use subscriptions::{SubscriptionService, TrialSubscription};

// Webhooks
pub use webhooks::{
    apply_event, verify_signature, BillingEventKind, WebhookEvent, WebhookHandler, WebhookOutcome,
};

/// The billing operations the rest of the backend depends on.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_customer(
        &self,
        email: &str,
        business_name: &str,
        business_id: Uuid,
    ) -> BillingResult<String>;

    async fn create_trial_subscription(
        &self,
        customer_id: &str,
        plan: Plan,
        trial_days: u32,
    ) -> BillingResult<TrialSubscription>;

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        plan: Plan,
        trial_days: u32,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<String>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<String>;

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> BillingResult<()>;
}

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub customer: CustomerService,
    pub portal: PortalService,
    pub subscriptions: SubscriptionService,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig) -> Self {
        let stripe = StripeClient::new(config);

        Self {
            checkout: CheckoutService::new(stripe.clone()),
            customer: CustomerService::new(stripe.clone()),
            portal: PortalService::new(stripe.clone()),
            subscriptions: SubscriptionService::new(stripe),
        }
    }
}

#[async_trait]
impl BillingProvider for BillingService {
    async fn create_customer(
        &self,
        email: &str,
        business_name: &str,
        business_id: Uuid,
    ) -> BillingResult<String> {
        self.customer
            .create_customer(business_id, email, business_name)
            .await
    }

    async fn create_trial_subscription(
        &self,
        customer_id: &str,
        plan: Plan,
        trial_days: u32,
    ) -> BillingResult<TrialSubscription> {
        self.subscriptions
            .create_trial_subscription(customer_id, plan, trial_days)
            .await
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        plan: Plan,
        trial_days: u32,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<String> {
        self.checkout
            .create_checkout_session(customer_id, plan, trial_days, success_url, cancel_url)
            .await
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<String> {
        self.portal
            .create_portal_session(customer_id, return_url)
            .await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> BillingResult<()> {
        self.subscriptions
            .cancel_subscription(subscription_id, at_period_end)
            .await
    }
}
