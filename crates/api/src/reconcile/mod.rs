//! Provider webhook reconcilers
//!
//! Billing events are reconciled in `callally_billing::webhooks`; this module
//! holds the voice side and the heuristics it shares with the dashboard.

pub mod booking;
pub mod voice;

pub use booking::{detect_appointment_booked, detect_emergency};
pub use voice::{VoiceReconciler, VoiceReply, VoiceWebhook};
