//! Application configuration

use std::env;
use std::time::Duration;

use callally_billing::{PriceIds, StripeConfig};
use callally_shared::RateLimitConfig;

const DEV_JWT_SECRET: &str = "change-this-in-production";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Voice-AI provider settings
#[derive(Debug, Clone)]
pub struct VapiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Shared secret sent as `serverUrlSecret` and expected back in `x-vapi-secret`.
    pub webhook_secret: Option<String>,
    pub phone_area_code: String,
    /// Where the provider posts call events.
    pub server_url: String,
}

/// Transactional email settings
#[derive(Debug, Clone)]
pub struct ResendConfig {
    pub api_key: String,
    pub base_url: String,
    pub from_email: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub vapi: VapiConfig,
    /// `None` when `STRIPE_SECRET_KEY` is unset; billing calls are then refused.
    pub stripe: Option<StripeConfig>,
    pub stripe_webhook_secret: String,
    pub price_ids: PriceIds,
    pub resend: ResendConfig,
    pub base_url: String,
    pub api_url: String,
    pub allowed_origins: Vec<String>,
    pub trial_days: u32,
    pub rate_limit: RateLimitConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let is_production = env::var("CALLALLY_ENV").is_ok_and(|v| v == "production");

        let jwt_secret = match env::var("JWT_SECRET").ok().filter(|v| !v.is_empty()) {
            Some(secret) => secret,
            None if is_production => return Err(ConfigError::Missing("JWT_SECRET")),
            None => {
                tracing::warn!("JWT_SECRET not set; using the development default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let bind_address = match env::var("BIND_ADDRESS").ok().filter(|v| !v.is_empty()) {
            Some(addr) => addr,
            None => format!("0.0.0.0:{}", var_or("PORT", "8000")),
        };

        let api_url = var_or("API_URL", "https://api.callallynow.com");

        let webhook_secret = env::var("VAPI_WEBHOOK_SECRET")
            .ok()
            .filter(|v| !v.is_empty());
        let vapi = VapiConfig {
            api_key: env::var("VAPI_API_KEY").unwrap_or_default(),
            base_url: var_or("VAPI_BASE_URL", "https://api.vapi.ai"),
            webhook_secret,
            phone_area_code: var_or("VAPI_PHONE_AREA_CODE", "415"),
            server_url: format!("{}/api/webhooks/vapi", api_url.trim_end_matches('/')),
        };

        let stripe = match StripeConfig::from_env() {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Stripe billing not configured: {}", e);
                None
            }
        };

        let resend = ResendConfig {
            api_key: env::var("RESEND_API_KEY").unwrap_or_default(),
            base_url: var_or("RESEND_BASE_URL", "https://api.resend.com"),
            from_email: var_or("FROM_EMAIL", "CallAlly <hello@callallynow.com>"),
        };

        let allowed_origins = var_or(
            "ALLOWED_ORIGINS",
            "https://callallynow.com,https://www.callallynow.com,http://localhost:3000",
        )
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

        let rate_limit = RateLimitConfig {
            max_requests: parse_var("RATE_LIMIT_MAX_REQUESTS", 20usize)?,
            window: Duration::from_secs(parse_var("RATE_LIMIT_WINDOW_SECS", 60u64)?),
        };

        let log_format = match var_or("LOG_FORMAT", "pretty").as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            bind_address,
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            jwt_secret,
            jwt_expiry_hours: parse_var("JWT_EXPIRY_HOURS", 168)?,
            vapi,
            stripe,
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            price_ids: PriceIds::from_env(),
            resend,
            base_url: var_or("BASE_URL", "https://callallynow.com"),
            api_url,
            allowed_origins,
            trial_days: parse_var("TRIAL_DAYS", 7)?,
            rate_limit,
            log_format,
        })
    }

    /// Configuration for tests and local tooling: no providers, in-memory store.
    pub fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            database_url: None,
            jwt_secret: "test-secret".to_string(),
            jwt_expiry_hours: 168,
            vapi: VapiConfig {
                api_key: String::new(),
                base_url: "http://localhost".to_string(),
                webhook_secret: None,
                phone_area_code: "415".to_string(),
                server_url: "http://localhost/api/webhooks/vapi".to_string(),
            },
            stripe: None,
            stripe_webhook_secret: String::new(),
            price_ids: PriceIds::default(),
            resend: ResendConfig {
                api_key: String::new(),
                base_url: "http://localhost".to_string(),
                from_email: "CallAlly <hello@callallynow.com>".to_string(),
            },
            base_url: "http://localhost:3000".to_string(),
            api_url: "http://localhost".to_string(),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            trial_days: 7,
            rate_limit: RateLimitConfig::default(),
            log_format: LogFormat::Pretty,
        }
    }
}
