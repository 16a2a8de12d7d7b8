//! Wizard steps
//!
//! Each step number maps to one typed payload. Payloads are validated in
//! full before anything is merged into the business.

use callally_shared::{Business, BusinessHours, CallRoutingMode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::vapi::prompt::{is_known_voice, DEFAULT_VOICE};

pub const FINAL_STEP: i32 = 5;

pub const MIN_APPOINTMENT_MINUTES: i32 = 5;
pub const MAX_APPOINTMENT_MINUTES: i32 = 480;
pub const MIN_RINGS: i32 = 1;
pub const MAX_RINGS: i32 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StepError {
    #[error("Unknown onboarding step: {0}")]
    UnknownStep(i32),
    #[error("Invalid data for step {step}: {reason}")]
    Malformed { step: i32, reason: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepRequest {
    pub step: i32,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BasicsStep {
    pub business_name: String,
    pub industry: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServicesStep {
    pub services: Vec<String>,
    pub custom_services: Option<String>,
    pub service_area: Option<String>,
    pub appointment_types: Vec<String>,
    pub appointment_duration: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentStep {
    pub agent_name: Option<String>,
    pub agent_voice: Option<String>,
    pub greeting_style: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HoursStep {
    pub weekday_hours: Option<String>,
    pub weekend_hours: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallHandlingStep {
    pub emergency_dispatch: bool,
    pub emergency_keywords: Vec<String>,
    pub emergency_phones: Vec<String>,
    pub call_mode: Option<CallRoutingMode>,
    pub rings_before_ai: Option<i32>,
    pub notification_phone: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OnboardingStep {
    Basics(BasicsStep),
    Services(ServicesStep),
    Agent(AgentStep),
    Hours(HoursStep),
    CallHandling(CallHandlingStep),
}

fn payload<T: DeserializeOwned>(step: i32, data: Value) -> Result<T, StepError> {
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| StepError::Malformed {
        step,
        reason: e.to_string(),
    })
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

pub(crate) fn validate_email(email: &str) -> Result<(), StepError> {
    if email.contains('@') {
        Ok(())
    } else {
        Err(StepError::Invalid("Invalid email address".to_string()))
    }
}

pub(crate) fn validate_appointment_duration(minutes: i32) -> Result<(), StepError> {
    if (MIN_APPOINTMENT_MINUTES..=MAX_APPOINTMENT_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(StepError::Invalid(format!(
            "Appointment duration must be between {} and {} minutes",
            MIN_APPOINTMENT_MINUTES, MAX_APPOINTMENT_MINUTES
        )))
    }
}

pub(crate) fn validate_rings(rings: i32) -> Result<(), StepError> {
    if (MIN_RINGS..=MAX_RINGS).contains(&rings) {
        Ok(())
    } else {
        Err(StepError::Invalid(format!(
            "Rings before AI must be between {} and {}",
            MIN_RINGS, MAX_RINGS
        )))
    }
}

pub(crate) fn validate_voice(voice: &str) -> Result<(), StepError> {
    if is_known_voice(voice) {
        Ok(())
    } else {
        Err(StepError::Invalid(format!("Unknown agent voice: {}", voice)))
    }
}

impl OnboardingStep {
    /// Parse and validate the payload for `step`.
    pub fn parse(step: i32, data: Value) -> Result<Self, StepError> {
        let parsed = match step {
            1 => OnboardingStep::Basics(payload(step, data)?),
            2 => OnboardingStep::Services(payload(step, data)?),
            3 => OnboardingStep::Agent(payload(step, data)?),
            4 => OnboardingStep::Hours(payload(step, data)?),
            5 => OnboardingStep::CallHandling(payload(step, data)?),
            other => return Err(StepError::UnknownStep(other)),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn number(&self) -> i32 {
        match self {
            OnboardingStep::Basics(_) => 1,
            OnboardingStep::Services(_) => 2,
            OnboardingStep::Agent(_) => 3,
            OnboardingStep::Hours(_) => 4,
            OnboardingStep::CallHandling(_) => 5,
        }
    }

    fn validate(&self) -> Result<(), StepError> {
        match self {
            OnboardingStep::Basics(basics) => {
                if basics.business_name.trim().is_empty() {
                    return Err(StepError::Invalid("Business name is required".to_string()));
                }
                if basics.industry.trim().is_empty() {
                    return Err(StepError::Invalid("Industry is required".to_string()));
                }
                if let Some(email) = basics.email.as_deref().filter(|e| !e.trim().is_empty()) {
                    validate_email(email)?;
                }
            }
            OnboardingStep::Services(services) => {
                if let Some(minutes) = services.appointment_duration {
                    validate_appointment_duration(minutes)?;
                }
            }
            OnboardingStep::Agent(agent) => {
                if agent.agent_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                    return Err(StepError::Invalid("Agent name cannot be empty".to_string()));
                }
                if let Some(voice) = agent.agent_voice.as_deref() {
                    validate_voice(voice)?;
                }
            }
            OnboardingStep::Hours(_) => {}
            OnboardingStep::CallHandling(handling) => {
                if let Some(rings) = handling.rings_before_ai {
                    validate_rings(rings)?;
                }
            }
        }
        Ok(())
    }

    /// Merge the step into the business and advance the step counter.
    pub fn apply(self, business: &mut Business) {
        let number = self.number();
        match self {
            OnboardingStep::Basics(basics) => {
                business.name = basics.business_name.trim().to_string();
                business.industry = clean(Some(basics.industry));
                business.phone = clean(basics.phone);
                if let Some(email) = clean(basics.email) {
                    business.email = Some(email);
                }
                business.website = clean(basics.website);
                business.address = clean(basics.address);
            }
            OnboardingStep::Services(services) => {
                business.services = clean_list(services.services);
                business.custom_services = clean(services.custom_services);
                business.service_area = clean(services.service_area);
                business.appointment_types = clean_list(services.appointment_types);
                business.appointment_duration_minutes = services.appointment_duration.unwrap_or(30);
            }
            OnboardingStep::Agent(agent) => {
                business.agent_name = clean(agent.agent_name).unwrap_or_else(|| "Alex".to_string());
                business.agent_voice = agent
                    .agent_voice
                    .unwrap_or_else(|| DEFAULT_VOICE.to_string());
                business.greeting_style =
                    clean(agent.greeting_style).unwrap_or_else(|| "friendly".to_string());
            }
            OnboardingStep::Hours(hours) => {
                let defaults = BusinessHours::default();
                business.business_hours = BusinessHours {
                    weekday: clean(hours.weekday_hours).unwrap_or(defaults.weekday),
                    weekend: clean(hours.weekend_hours).unwrap_or(defaults.weekend),
                };
            }
            OnboardingStep::CallHandling(handling) => {
                business.emergency_dispatch = handling.emergency_dispatch;
                business.emergency_keywords = clean_list(handling.emergency_keywords);
                business.emergency_phones = clean_list(handling.emergency_phones);
                business.call_mode = handling.call_mode.unwrap_or_default();
                business.rings_before_ai = handling.rings_before_ai.unwrap_or(3);
                business.notification_phone = clean(handling.notification_phone);
            }
        }

        if number >= business.onboarding_step {
            business.onboarding_step = number + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn business() -> Business {
        Business::new(Uuid::new_v4(), "Acme", Some("owner@acme.test".into()))
    }

    #[test]
    fn test_unknown_step_rejected() {
        assert_eq!(
            OnboardingStep::parse(6, json!({})).unwrap_err(),
            StepError::UnknownStep(6)
        );
        assert_eq!(
            OnboardingStep::parse(0, json!({})).unwrap_err(),
            StepError::UnknownStep(0)
        );
    }

    #[test]
    fn test_basics_requires_name_and_industry() {
        assert!(OnboardingStep::parse(1, json!({ "business_name": "Acme" })).is_err());
        assert!(OnboardingStep::parse(1, json!({ "industry": "plumbing" })).is_err());
        assert!(OnboardingStep::parse(
            1,
            json!({ "business_name": "Acme", "industry": "plumbing", "email": "nope" })
        )
        .is_err());
    }

    #[test]
    fn test_basics_apply_keeps_email_when_absent() {
        let mut b = business();
        OnboardingStep::parse(
            1,
            json!({ "business_name": " Acme Plumbing ", "industry": "plumbing", "city": "SF" }),
        )
        .unwrap()
        .apply(&mut b);

        assert_eq!(b.name, "Acme Plumbing");
        assert_eq!(b.industry.as_deref(), Some("plumbing"));
        assert_eq!(b.email.as_deref(), Some("owner@acme.test"));
        assert_eq!(b.onboarding_step, 2);
    }

    #[test]
    fn test_wrong_types_are_malformed() {
        assert!(matches!(
            OnboardingStep::parse(2, json!({ "services": "plumbing" })),
            Err(StepError::Malformed { step: 2, .. })
        ));
    }

    #[test]
    fn test_duration_and_rings_bounds() {
        assert!(OnboardingStep::parse(2, json!({ "appointment_duration": 4 })).is_err());
        assert!(OnboardingStep::parse(2, json!({ "appointment_duration": 480 })).is_ok());
        assert!(OnboardingStep::parse(5, json!({ "rings_before_ai": 11 })).is_err());
        assert!(OnboardingStep::parse(5, json!({ "rings_before_ai": 1 })).is_ok());
    }

    #[test]
    fn test_agent_defaults_and_voice_check() {
        assert!(OnboardingStep::parse(3, json!({ "agent_voice": "bob" })).is_err());

        let mut b = business();
        OnboardingStep::parse(3, Value::Null).unwrap().apply(&mut b);
        assert_eq!(b.agent_name, "Alex");
        assert_eq!(b.agent_voice, "rachel");
        assert_eq!(b.greeting_style, "friendly");
    }

    #[test]
    fn test_hours_and_call_handling_apply() {
        let mut b = business();
        OnboardingStep::parse(4, json!({ "weekday_hours": "8am-6pm" }))
            .unwrap()
            .apply(&mut b);
        assert_eq!(b.business_hours.weekday, "8am-6pm");
        assert_eq!(b.business_hours.weekend, "Closed");

        OnboardingStep::parse(
            5,
            json!({
                "emergency_dispatch": true,
                "emergency_keywords": ["flood", " "],
                "call_mode": "direct",
                "rings_before_ai": 2
            }),
        )
        .unwrap()
        .apply(&mut b);
        assert!(b.emergency_dispatch);
        assert_eq!(b.emergency_keywords, vec!["flood".to_string()]);
        assert_eq!(b.call_mode, CallRoutingMode::Direct);
        assert_eq!(b.rings_before_ai, 2);
    }

    #[test]
    fn test_step_counter_only_moves_forward() {
        let mut b = business();
        b.onboarding_step = 4;
        OnboardingStep::parse(2, json!({})).unwrap().apply(&mut b);
        assert_eq!(b.onboarding_step, 4);

        OnboardingStep::parse(4, json!({})).unwrap().apply(&mut b);
        assert_eq!(b.onboarding_step, 5);
    }
}
