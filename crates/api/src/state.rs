//! Application state

use std::sync::Arc;

use callally_billing::{BillingProvider, BillingService, WebhookHandler};
use callally_shared::{RateLimiter, TenantStore};

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
    email::{Notifier, NotifyError, ResendNotifier},
    onboarding::OnboardingSaga,
    reconcile::VoiceReconciler,
    vapi::{VapiClient, VapiError, VoiceProvider},
};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to build voice client: {0}")]
    Voice(#[from] VapiError),
    #[error("Failed to build email client: {0}")]
    Notify(#[from] NotifyError),
}

/// The outbound provider adapters, swappable for fakes in tests.
#[derive(Clone)]
pub struct Providers {
    pub voice: Arc<dyn VoiceProvider>,
    pub billing: Option<Arc<dyn BillingProvider>>,
    pub notifier: Arc<dyn Notifier>,
}

impl Providers {
    /// The HTTP adapters described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, StateError> {
        let vapi = VapiClient::new(config.vapi.clone())?;
        if vapi.is_enabled() {
            tracing::info!(base_url = %config.vapi.base_url, "Voice provider enabled");
        } else {
            tracing::warn!("Voice provider not configured (missing VAPI_API_KEY)");
        }

        let notifier = ResendNotifier::new(config.resend.clone())?;
        if notifier.is_enabled() {
            tracing::info!("Email notifications enabled");
        } else {
            tracing::warn!("Email notifications not configured (missing RESEND_API_KEY)");
        }

        // Config::from_env already warned when Stripe is absent
        let billing = config.stripe.clone().map(|stripe| {
            tracing::info!("Stripe billing service initialized");
            Arc::new(BillingService::new(stripe)) as Arc<dyn BillingProvider>
        });

        Ok(Self {
            voice: Arc::new(vapi),
            billing,
            notifier: Arc::new(notifier),
        })
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn TenantStore>,
    pub jwt_manager: JwtManager,
    pub voice: Arc<dyn VoiceProvider>,
    pub billing: Option<Arc<dyn BillingProvider>>,
    pub notifier: Arc<dyn Notifier>,
    pub billing_webhooks: Arc<WebhookHandler>,
    pub voice_webhooks: Arc<VoiceReconciler>,
    /// Advisory per-address limiter on the auth endpoints
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn TenantStore>) -> Result<Self, StateError> {
        let providers = Providers::from_config(&config)?;
        Ok(Self::with_providers(config, store, providers))
    }

    pub fn with_providers(config: Config, store: Arc<dyn TenantStore>, providers: Providers) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);

        if config.stripe_webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set - billing webhooks will be rejected");
        }
        let billing_webhooks = Arc::new(WebhookHandler::new(
            config.stripe_webhook_secret.clone(),
            config.price_ids.clone(),
            store.clone(),
        ));

        let voice_webhooks = Arc::new(VoiceReconciler::new(
            store.clone(),
            providers.notifier.clone(),
        ));

        let rate_limiter = RateLimiter::with_config(config.rate_limit);
        tracing::info!(
            max_requests = config.rate_limit.max_requests,
            window_secs = config.rate_limit.window.as_secs(),
            "Rate limiter initialized"
        );

        Self {
            config,
            store,
            jwt_manager,
            voice: providers.voice,
            billing: providers.billing,
            notifier: providers.notifier,
            billing_webhooks,
            voice_webhooks,
            rate_limiter,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            store: self.store.clone(),
        }
    }

    pub fn onboarding_saga(&self) -> OnboardingSaga {
        OnboardingSaga::new(
            self.store.clone(),
            self.voice.clone(),
            self.billing.clone(),
            self.notifier.clone(),
            self.config.trial_days,
        )
    }
}
