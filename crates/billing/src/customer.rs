//! Stripe customer management

use std::collections::HashMap;

use stripe::{CreateCustomer, Customer};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::BillingResult;

pub struct CustomerService {
    stripe: StripeClient,
}

impl CustomerService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Create a Stripe customer tagged with the owning business id.
    pub async fn create_customer(
        &self,
        business_id: Uuid,
        email: &str,
        business_name: &str,
    ) -> BillingResult<String> {
        let mut metadata = HashMap::new();
        metadata.insert("business_id".to_string(), business_id.to_string());

        let params = CreateCustomer {
            email: Some(email),
            name: Some(business_name),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        tracing::info!(
            business_id = %business_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer.id.to_string())
    }
}
