//! Business onboarding: the five-step wizard and the completion saga.

pub mod saga;
pub mod steps;

pub use saga::{OnboardingResult, OnboardingSaga, SagaError, StepFailure};
pub use steps::{OnboardingStep, StepError, StepRequest};
