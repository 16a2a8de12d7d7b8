//! Stripe webhook handling
//!
//! Signatures are checked against the raw body before anything is parsed.
//! Events are matched to a tenant by Stripe customer id and applied as plain
//! assignments, so a replayed event leaves the business unchanged.

use std::sync::Arc;

use callally_shared::{Business, Plan, TenantStore};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::PriceIds;
use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`)
/// against the raw payload.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now_unix: i64,
) -> BillingResult<()> {
    if secret.is_empty() {
        tracing::error!("Webhook secret not configured");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;
    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now_unix,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    let matched = signatures
        .iter()
        .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));
    if !matched {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Either a bare id or an expanded object carrying one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExpandableId {
    Id(String),
    Object { id: String },
}

impl ExpandableId {
    pub fn id(&self) -> &str {
        match self {
            ExpandableId::Id(id) | ExpandableId::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItemRef {
    pub price: Option<PriceRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItemRef>,
}

/// The subset of subscription and invoice objects the reconciler reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventObject {
    pub id: Option<String>,
    pub customer: Option<ExpandableId>,
    pub status: Option<String>,
    pub trial_end: Option<i64>,
    pub items: Option<ItemList>,
}

impl EventObject {
    fn first_price_id(&self) -> Option<&str> {
        self.items
            .as_ref()?
            .data
            .first()?
            .price
            .as_ref()
            .map(|p| p.id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    PaymentSucceeded,
    PaymentFailed,
    Unhandled,
}

impl BillingEventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.payment_succeeded" => Self::PaymentSucceeded,
            "invoice.payment_failed" => Self::PaymentFailed,
            _ => Self::Unhandled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied { business_id: Uuid },
    /// Matched a business whose state already reflected the event.
    Unchanged { business_id: Uuid },
    NoMatchingBusiness,
    Ignored,
}

/// Apply one event to a business. Returns whether anything changed.
pub fn apply_event(
    kind: BillingEventKind,
    object: &EventObject,
    prices: &PriceIds,
    business: &mut Business,
) -> bool {
    let before = (
        business.subscription_status.clone(),
        business.trial_ends_at,
        business.stripe_subscription_id.clone(),
        business.subscription_plan,
    );

    match kind {
        BillingEventKind::SubscriptionCreated => {
            if let Some(status) = &object.status {
                business.subscription_status = Some(status.clone());
            }
            if let Some(trial_end) = object
                .trial_end
                .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
            {
                business.trial_ends_at = Some(trial_end);
            }
            if let Some(id) = &object.id {
                business.stripe_subscription_id = Some(id.clone());
            }
        }
        BillingEventKind::SubscriptionUpdated => {
            if let Some(status) = &object.status {
                business.subscription_status = Some(status.clone());
            }
            if let Some(id) = &object.id {
                business.stripe_subscription_id = Some(id.clone());
            }
            let plan: Option<Plan> = object
                .first_price_id()
                .and_then(|price| prices.plan_for_price(price));
            if let Some(plan) = plan {
                business.subscription_plan = Some(plan);
            }
        }
        BillingEventKind::SubscriptionDeleted => {
            business.subscription_status = Some("cancelled".to_string());
        }
        BillingEventKind::PaymentSucceeded => {
            business.subscription_status = Some("active".to_string());
        }
        BillingEventKind::PaymentFailed => {
            business.subscription_status = Some("past_due".to_string());
        }
        BillingEventKind::Unhandled => {}
    }

    let after = (
        business.subscription_status.clone(),
        business.trial_ends_at,
        business.stripe_subscription_id.clone(),
        business.subscription_plan,
    );
    before != after
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    webhook_secret: String,
    price_ids: PriceIds,
    store: Arc<dyn TenantStore>,
}

impl WebhookHandler {
    pub fn new(webhook_secret: String, price_ids: PriceIds, store: Arc<dyn TenantStore>) -> Self {
        Self {
            webhook_secret,
            price_ids,
            store,
        }
    }

    /// Verify the signature, then parse the envelope.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, &self.webhook_secret, now)?;

        serde_json::from_str(payload).map_err(|e| BillingError::WebhookPayload(e.to_string()))
    }

    pub async fn handle_event(&self, event: &WebhookEvent) -> BillingResult<WebhookOutcome> {
        let kind = BillingEventKind::from_type(&event.event_type);
        if kind == BillingEventKind::Unhandled {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(customer_id) = event.data.object.customer.as_ref().map(ExpandableId::id) else {
            tracing::warn!(event_id = %event.id, "Webhook event has no customer");
            return Ok(WebhookOutcome::NoMatchingBusiness);
        };

        let Some(mut business) = self.store.find_business_by_customer(customer_id).await? else {
            tracing::info!(
                event_id = %event.id,
                customer_id = %customer_id,
                "No business for customer; dropping event"
            );
            return Ok(WebhookOutcome::NoMatchingBusiness);
        };

        if !apply_event(kind, &event.data.object, &self.price_ids, &mut business) {
            return Ok(WebhookOutcome::Unchanged {
                business_id: business.id,
            });
        }

        self.store.save_business(&business).await?;
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            business_id = %business.id,
            subscription_status = ?business.subscription_status,
            "Applied billing event"
        );

        Ok(WebhookOutcome::Applied {
            business_id: business.id,
        })
    }
}
