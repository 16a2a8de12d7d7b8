//! Vapi REST client

use std::time::Duration;

use async_trait::async_trait;
use callally_shared::Business;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use super::prompt::{build_system_prompt, first_message, voice_id};
use super::{PhoneNumber, VapiError, VoiceProvider};
use crate::config::VapiConfig;

const MODEL_PROVIDER: &str = "openai";
const MODEL_NAME: &str = "gpt-4-turbo-preview";
const END_CALL_MESSAGE: &str = "Thanks for calling! Have a great day!";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelSpec<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    system_prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSpec<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    voice_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stability: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    similarity_boost: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAssistantRequest<'a> {
    name: String,
    model: ModelSpec<'a>,
    voice: VoiceSpec<'a>,
    first_message: String,
    end_call_message: &'a str,
    recording_enabled: bool,
    silence_timeout_seconds: u32,
    max_duration_seconds: u32,
    background_sound: &'a str,
    server_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_url_secret: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateAssistantRequest<'a> {
    name: String,
    model: ModelSpec<'a>,
    voice: VoiceSpec<'a>,
    first_message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuyPhoneNumberRequest<'a> {
    provider: &'a str,
    area_code: &'a str,
    assistant_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CallCustomer<'a> {
    number: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCallRequest<'a> {
    assistant_id: &'a str,
    phone_number_id: &'a str,
    customer: CallCustomer<'a>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhoneNumberResponse {
    id: Option<String>,
    number: Option<String>,
}

fn assistant_name(business: &Business) -> String {
    format!("{} - AI Receptionist", business.name)
}

/// HTTP client for the Vapi API
#[derive(Clone)]
pub struct VapiClient {
    http: Client,
    config: VapiConfig,
}

impl VapiClient {
    pub fn new(config: VapiConfig) -> Result<Self, VapiError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http, config })
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Send an authorized request and decode the body when the status is one
    /// of `expected`.
    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        expected: &[StatusCode],
    ) -> Result<T, VapiError> {
        if !self.is_enabled() {
            tracing::warn!(operation, "VAPI_API_KEY not set; skipping voice provider call");
            return Err(VapiError::NotConfigured);
        }

        let response = request
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(operation, error = %e, "Voice provider request failed");
                VapiError::Http(e)
            })?;

        let status = response.status();
        if !expected.contains(&status) {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                operation,
                status = status.as_u16(),
                body = %body,
                "Voice provider returned an error"
            );
            return Err(VapiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response.json::<T>().await.map_err(|e| {
            tracing::error!(operation, error = %e, "Voice provider response did not decode");
            VapiError::InvalidResponse(e.to_string())
        })
    }
}

#[async_trait]
impl VoiceProvider for VapiClient {
    async fn create_assistant(&self, business: &Business) -> Result<String, VapiError> {
        let payload = CreateAssistantRequest {
            name: assistant_name(business),
            model: ModelSpec {
                provider: Some(MODEL_PROVIDER),
                model: Some(MODEL_NAME),
                temperature: Some(0.7),
                system_prompt: build_system_prompt(business),
            },
            voice: VoiceSpec {
                provider: Some("11labs"),
                voice_id: voice_id(&business.agent_voice),
                stability: Some(0.5),
                similarity_boost: Some(0.75),
            },
            first_message: first_message(business),
            end_call_message: END_CALL_MESSAGE,
            recording_enabled: true,
            silence_timeout_seconds: 30,
            max_duration_seconds: 600,
            background_sound: "office",
            server_url: &self.config.server_url,
            server_url_secret: self.config.webhook_secret.as_deref(),
        };

        let response: IdResponse = self
            .send(
                "create_assistant",
                self.http.post(self.url("/assistant")).json(&payload),
                &[StatusCode::CREATED],
            )
            .await?;

        let assistant_id = response
            .id
            .ok_or_else(|| VapiError::InvalidResponse("assistant response has no id".into()))?;

        tracing::info!(
            business_id = %business.id,
            assistant_id = %assistant_id,
            "Assistant created"
        );
        Ok(assistant_id)
    }

    async fn update_assistant(
        &self,
        assistant_id: &str,
        business: &Business,
    ) -> Result<(), VapiError> {
        let payload = UpdateAssistantRequest {
            name: assistant_name(business),
            model: ModelSpec {
                provider: None,
                model: None,
                temperature: None,
                system_prompt: build_system_prompt(business),
            },
            voice: VoiceSpec {
                provider: None,
                voice_id: voice_id(&business.agent_voice),
                stability: None,
                similarity_boost: None,
            },
            first_message: first_message(business),
        };

        let _: serde_json::Value = self
            .send(
                "update_assistant",
                self.http
                    .patch(self.url(&format!("/assistant/{}", assistant_id)))
                    .json(&payload),
                &[StatusCode::OK],
            )
            .await?;

        tracing::info!(
            business_id = %business.id,
            assistant_id = %assistant_id,
            "Assistant updated"
        );
        Ok(())
    }

    async fn provision_phone_number(&self, assistant_id: &str) -> Result<PhoneNumber, VapiError> {
        let payload = BuyPhoneNumberRequest {
            provider: "twilio",
            area_code: &self.config.phone_area_code,
            assistant_id,
        };

        let response: PhoneNumberResponse = self
            .send(
                "provision_phone_number",
                self.http.post(self.url("/phone-number")).json(&payload),
                &[StatusCode::OK, StatusCode::CREATED],
            )
            .await?;

        match (response.id, response.number) {
            (Some(id), Some(number)) => {
                tracing::info!(assistant_id = %assistant_id, phone_id = %id, "Phone number provisioned");
                Ok(PhoneNumber { id, number })
            }
            _ => Err(VapiError::InvalidResponse(
                "phone number response missing id or number".into(),
            )),
        }
    }

    async fn start_test_call(
        &self,
        assistant_id: &str,
        phone_number_id: &str,
        to: &str,
    ) -> Result<String, VapiError> {
        let payload = CreateCallRequest {
            assistant_id,
            phone_number_id,
            customer: CallCustomer { number: to },
        };

        let response: IdResponse = self
            .send(
                "start_test_call",
                self.http.post(self.url("/call/phone")).json(&payload),
                &[StatusCode::OK, StatusCode::CREATED],
            )
            .await?;

        response
            .id
            .ok_or_else(|| VapiError::InvalidResponse("call response has no id".into()))
    }
}
