//! Stripe client and configuration

use callally_shared::Plan;
use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Stripe price ids per plan. Missing ids put that plan in trial-only mode.
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub starter: Option<String>,
    pub professional: Option<String>,
    pub business: Option<String>,
}

impl PriceIds {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            starter: read("STRIPE_PRICE_STARTER"),
            professional: read("STRIPE_PRICE_PROFESSIONAL"),
            business: read("STRIPE_PRICE_BUSINESS"),
        }
    }

    pub fn price_id_for_plan(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::Starter => self.starter.as_deref(),
            Plan::Professional => self.professional.as_deref(),
            Plan::Business => self.business.as_deref(),
        }
    }

    /// Reverse lookup used when a subscription changes price.
    pub fn plan_for_price(&self, price_id: &str) -> Option<Plan> {
        Plan::ALL
            .into_iter()
            .find(|plan| self.price_id_for_plan(*plan) == Some(price_id))
    }
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_ids: PriceIds,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;

        Ok(Self {
            secret_key,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            price_ids: PriceIds::from_env(),
        })
    }
}

/// Cheaply cloneable handle to the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    inner: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
