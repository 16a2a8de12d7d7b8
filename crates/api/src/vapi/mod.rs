//! Voice-AI provider (Vapi)
//!
//! The rest of the API talks to the provider through [`VoiceProvider`];
//! [`VapiClient`] is the HTTP implementation.

pub mod client;
pub mod prompt;

use async_trait::async_trait;
use callally_shared::Business;

pub use client::VapiClient;

#[derive(Debug, thiserror::Error)]
pub enum VapiError {
    #[error("Voice provider not configured")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Voice provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

/// A number bought for an assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNumber {
    pub id: String,
    pub number: String,
}

#[async_trait]
pub trait VoiceProvider: Send + Sync {
    /// Create an assistant for the business and return its id.
    async fn create_assistant(&self, business: &Business) -> Result<String, VapiError>;

    /// Push the business profile to an existing assistant.
    async fn update_assistant(
        &self,
        assistant_id: &str,
        business: &Business,
    ) -> Result<(), VapiError>;

    async fn provision_phone_number(&self, assistant_id: &str) -> Result<PhoneNumber, VapiError>;

    /// Place an outbound call from the business's number and return the call id.
    async fn start_test_call(
        &self,
        assistant_id: &str,
        phone_number_id: &str,
        to: &str,
    ) -> Result<String, VapiError>;
}
