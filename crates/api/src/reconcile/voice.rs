//! Voice-AI webhook reconciliation
//!
//! End-of-call reports become Call and UsageRecord rows; function calls are
//! answered synchronously while the caller is still on the line.

use std::sync::Arc;

use callally_shared::{Business, CallReport, NewAppointment, StoreResult, TenantStore};
use serde::Deserialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::booking::{
    detect_appointment_booked, detect_emergency, parse_booking_date, parse_booking_time,
    BookingArgs, DEFAULT_BOOKING_TIME,
};
use crate::email::{AppointmentNotice, CallSummary, Notifier};

pub const BUSINESS_NOT_FOUND: &str = "Error: Business not found";
pub const FUNCTION_NOT_RECOGNIZED: &str = "Function not recognized";
pub const AVAILABLE_TIMES: &str = "Available times: 9am, 10am, 11am, 2pm, 3pm, 4pm";

const ASK_DATE_AGAIN: &str =
    "I'm sorry, I didn't catch the date. Could you tell me the year, month and day again?";
const ASK_TIME_AGAIN: &str =
    "I'm sorry, I didn't catch the time. Could you tell me the time again, like 2:30 PM?";
const ASK_DETAILS_AGAIN: &str =
    "I'm sorry, I didn't catch all of those details. Could you repeat them for me?";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceWebhook {
    #[serde(default)]
    pub message: VoiceMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMessage {
    #[serde(rename = "type", default)]
    pub message_type: String,
    pub call: Option<CallInfo>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub recording_url: Option<String>,
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInfo {
    pub id: Option<String>,
    pub assistant_id: Option<String>,
    pub customer: Option<CustomerInfo>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerInfo {
    pub number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

/// What the route should answer with.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceReply {
    Received,
    FunctionResult(Value),
}

impl VoiceReply {
    pub fn into_json(self) -> Value {
        match self {
            VoiceReply::Received => json!({ "received": true }),
            VoiceReply::FunctionResult(result) => json!({ "result": result }),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_timestamp(value: Option<&str>) -> Option<OffsetDateTime> {
    value.and_then(|v| OffsetDateTime::parse(v, &Rfc3339).ok())
}

/// Whole seconds between start and end, when both parse and end is not
/// before start.
pub fn call_duration_seconds(
    started_at: Option<OffsetDateTime>,
    ended_at: Option<OffsetDateTime>,
) -> Option<i32> {
    let (start, end) = (started_at?, ended_at?);
    if end < start {
        return None;
    }
    i32::try_from((end - start).whole_seconds()).ok()
}

pub struct VoiceReconciler {
    store: Arc<dyn TenantStore>,
    notifier: Arc<dyn Notifier>,
}

impl VoiceReconciler {
    pub fn new(store: Arc<dyn TenantStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn handle(&self, webhook: VoiceWebhook) -> StoreResult<VoiceReply> {
        let message = webhook.message;
        match message.message_type.as_str() {
            "end-of-call-report" => {
                self.handle_end_of_call(message).await?;
                Ok(VoiceReply::Received)
            }
            "function-call" => self.handle_function_call(message).await,
            other => {
                tracing::debug!(message_type = %other, "Ignoring voice webhook message");
                Ok(VoiceReply::Received)
            }
        }
    }

    async fn business_for(&self, call: Option<&CallInfo>) -> StoreResult<Option<Business>> {
        match call.and_then(|c| c.assistant_id.as_deref()) {
            Some(assistant_id) => self.store.find_business_by_assistant(assistant_id).await,
            None => Ok(None),
        }
    }

    async fn handle_end_of_call(&self, message: VoiceMessage) -> StoreResult<()> {
        let call = message.call.clone().unwrap_or_default();

        let Some(business) = self.business_for(Some(&call)).await? else {
            tracing::info!(
                assistant_id = ?call.assistant_id,
                "End-of-call report for unknown assistant; ignoring"
            );
            return Ok(());
        };
        let Some(provider_call_id) = non_blank(call.id.clone()) else {
            tracing::warn!(business_id = %business.id, "End-of-call report without call id");
            return Ok(());
        };

        let started_at =
            parse_timestamp(call.started_at.as_deref().or(message.started_at.as_deref()));
        let ended_at = parse_timestamp(call.ended_at.as_deref().or(message.ended_at.as_deref()));
        let transcript = message.transcript.unwrap_or_default();

        let emergency_triggered = business.emergency_dispatch
            && detect_emergency(&transcript, &business.emergency_keywords);

        let report = CallReport {
            business_id: business.id,
            provider_call_id: provider_call_id.clone(),
            caller_phone: non_blank(call.customer.and_then(|c| c.number))
                .unwrap_or_else(|| "Unknown".to_string()),
            started_at,
            ended_at,
            duration_seconds: call_duration_seconds(started_at, ended_at),
            appointment_booked: detect_appointment_booked(&transcript),
            emergency_triggered,
            transcript: (!transcript.is_empty()).then_some(transcript),
            summary: message.summary,
            recording_url: message.recording_url,
            received_at: OffsetDateTime::now_utc(),
        };

        let reconciled = self.store.reconcile_call(report).await?;
        tracing::info!(
            business_id = %business.id,
            provider_call_id = %provider_call_id,
            call_created = reconciled.call_created,
            usage_recorded = reconciled.usage_recorded,
            appointment_booked = reconciled.call.appointment_booked,
            emergency_triggered = reconciled.call.emergency_triggered,
            "Call reconciled"
        );

        if !reconciled.call_created {
            return Ok(());
        }
        if let Some(email) = business.email.as_deref() {
            let summary = CallSummary {
                business_name: business.name.clone(),
                caller: reconciled.call.caller_phone.clone(),
                duration_seconds: reconciled.call.duration_seconds,
                summary: reconciled.call.summary.clone(),
                appointment_booked: reconciled.call.appointment_booked,
            };
            if let Err(e) = self.notifier.send_call_notification(email, &summary).await {
                tracing::warn!(business_id = %business.id, error = %e, "Call notification failed");
            }
        }

        Ok(())
    }

    async fn handle_function_call(&self, message: VoiceMessage) -> StoreResult<VoiceReply> {
        let Some(business) = self.business_for(message.call.as_ref()).await? else {
            return Ok(VoiceReply::FunctionResult(json!(BUSINESS_NOT_FOUND)));
        };
        let Some(function_call) = message.function_call else {
            return Ok(VoiceReply::FunctionResult(json!(FUNCTION_NOT_RECOGNIZED)));
        };
        let provider_call_id = message.call.and_then(|c| non_blank(c.id));
        let name = function_call.name.as_deref().map(str::trim).unwrap_or_default();

        tracing::info!(
            business_id = %business.id,
            function = %name,
            "Voice function call"
        );

        let result = match name {
            "bookAppointment" => match BookingArgs::from_parameters(&function_call.parameters) {
                Ok(args) => json!(self.book_appointment(&business, provider_call_id, args).await?),
                Err(e) => {
                    tracing::warn!(business_id = %business.id, error = %e, "Booking not attempted");
                    json!(ASK_DETAILS_AGAIN)
                }
            },
            "checkAvailability" => json!(AVAILABLE_TIMES),
            "getBusinessInfo" => json!({
                "name": business.name,
                "hours": business.business_hours.to_string(),
                "services": business.services_description(),
                "address": business.address,
            }),
            _ => json!(FUNCTION_NOT_RECOGNIZED),
        };

        Ok(VoiceReply::FunctionResult(result))
    }

    /// Returns the sentence the assistant should speak.
    async fn book_appointment(
        &self,
        business: &Business,
        provider_call_id: Option<String>,
        args: BookingArgs,
    ) -> StoreResult<String> {
        let date = match args.date {
            Some(raw) => match parse_booking_date(&raw) {
                Some(date) => date,
                None => return Ok(ASK_DATE_AGAIN.to_string()),
            },
            None => OffsetDateTime::now_utc().date(),
        };
        let time_text = args.time.unwrap_or_else(|| DEFAULT_BOOKING_TIME.to_string());
        let Some(time) = parse_booking_time(&time_text) else {
            return Ok(ASK_TIME_AGAIN.to_string());
        };

        let customer_name = args.customer_name.unwrap_or_else(|| "Unknown".to_string());
        let service_type = args.service_type.unwrap_or_else(|| "General".to_string());
        let customer_email = args.customer_email;

        let appointment = self
            .store
            .create_appointment(NewAppointment {
                business_id: business.id,
                call_id: None,
                provider_call_id,
                customer_name: customer_name.clone(),
                customer_phone: args.customer_phone,
                customer_email: customer_email.clone(),
                customer_address: args.customer_address,
                service_type: Some(service_type.clone()),
                appointment_date: date.with_time(time).assume_utc(),
                duration_minutes: business.appointment_duration_minutes,
                notes: args.notes,
            })
            .await?;

        tracing::info!(
            business_id = %business.id,
            appointment_id = %appointment.id,
            "Appointment booked during call"
        );

        // The caller is still on the line; the reply must not wait on email.
        if let Some(email) = customer_email {
            let notice = AppointmentNotice {
                customer_name: customer_name.clone(),
                business_name: business.name.clone(),
                service_type,
                date,
                time: time_text.clone(),
                address: business.address.clone(),
            };
            let notifier = Arc::clone(&self.notifier);
            let appointment_id = appointment.id;
            tokio::spawn(async move {
                if let Err(e) = notifier.send_appointment_confirmation(&email, &notice).await {
                    tracing::warn!(
                        appointment_id = %appointment_id,
                        error = %e,
                        "Appointment confirmation failed"
                    );
                }
            });
        }

        Ok(format!(
            "Appointment booked for {} on {} at {}",
            customer_name, date, time_text
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::NotifyError;
    use async_trait::async_trait;
    use callally_shared::{MemoryTenantStore, Page};
    use std::time::Duration;
    use time::macros::datetime;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_email(&self, to: &str, subject: &str, _html: &str) -> Result<(), NotifyError> {
            self.sent.lock().await.push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    impl RecordingNotifier {
        /// Confirmation emails go out on a spawned task.
        async fn wait_for(&self, count: usize) -> Vec<(String, String)> {
            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    let sent = self.sent.lock().await;
                    if sent.len() >= count {
                        return sent.clone();
                    }
                    drop(sent);
                    tokio::task::yield_now().await;
                }
            })
            .await
            .expect("notifier was not called in time")
        }
    }

    /// Never finishes a send.
    struct StalledNotifier;

    #[async_trait]
    impl Notifier for StalledNotifier {
        async fn send_email(&self, _to: &str, _subject: &str, _html: &str) -> Result<(), NotifyError> {
            std::future::pending().await
        }
    }

    async fn setup() -> (VoiceReconciler, Arc<MemoryTenantStore>, Arc<RecordingNotifier>, Business) {
        let store = Arc::new(MemoryTenantStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let (_, mut business) = store
            .create_user_with_business("owner@acme.test", "hash", "Acme Plumbing")
            .await
            .unwrap();
        business.vapi_assistant_id = Some("asst_1".into());
        business.emergency_dispatch = true;
        business.emergency_keywords = vec!["flood".into()];
        business.appointment_duration_minutes = 45;
        let business = store.save_business(&business).await.unwrap();

        let reconciler = VoiceReconciler::new(store.clone(), notifier.clone());
        (reconciler, store, notifier, business)
    }

    fn webhook(value: Value) -> VoiceWebhook {
        serde_json::from_value(value).unwrap()
    }

    fn end_of_call(call_id: &str, transcript: &str) -> VoiceWebhook {
        webhook(json!({
            "message": {
                "type": "end-of-call-report",
                "call": {
                    "id": call_id,
                    "assistantId": "asst_1",
                    "customer": { "number": "+15550001111" },
                    "startedAt": "2025-01-06T15:00:00Z",
                    "endedAt": "2025-01-06T15:02:30.500Z"
                },
                "transcript": transcript,
                "summary": "Caller asked about a leak"
            }
        }))
    }

    #[test]
    fn test_duration_requires_ordered_timestamps() {
        let start = datetime!(2025-01-06 15:00 UTC);
        let end = datetime!(2025-01-06 15:02:30 UTC);
        assert_eq!(call_duration_seconds(Some(start), Some(end)), Some(150));
        assert_eq!(call_duration_seconds(Some(end), Some(start)), None);
        assert_eq!(call_duration_seconds(None, Some(end)), None);
    }

    #[tokio::test]
    async fn test_end_of_call_replay_creates_one_call_and_one_usage() {
        let (reconciler, store, notifier, business) = setup().await;

        for _ in 0..2 {
            let reply = reconciler
                .handle(end_of_call("call_1", "I've booked you for Tuesday"))
                .await
                .unwrap();
            assert_eq!(reply, VoiceReply::Received);
        }

        let (calls, total) = store.list_calls(business.id, Page::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(calls[0].duration_seconds, Some(150));
        assert!(calls[0].appointment_booked);
        assert_eq!(calls[0].caller_phone, "+15550001111");

        let usage = store.list_usage(business.id).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].minutes_used, 2.5);

        // Only the first delivery notifies the owner.
        assert_eq!(notifier.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_appointment_phrase_leaves_flag_false() {
        let (reconciler, store, _, business) = setup().await;
        reconciler
            .handle(end_of_call("call_2", "no appointment needed"))
            .await
            .unwrap();

        let (calls, _) = store.list_calls(business.id, Page::default()).await.unwrap();
        assert!(!calls[0].appointment_booked);
        assert!(!calls[0].emergency_triggered);
    }

    #[tokio::test]
    async fn test_emergency_keyword_flags_call() {
        let (reconciler, store, _, business) = setup().await;
        reconciler
            .handle(end_of_call("call_3", "My basement has a FLOOD"))
            .await
            .unwrap();

        let (calls, _) = store.list_calls(business.id, Page::default()).await.unwrap();
        assert!(calls[0].emergency_triggered);
    }

    #[tokio::test]
    async fn test_unknown_assistant_is_acknowledged() {
        let (reconciler, store, notifier, business) = setup().await;
        let reply = reconciler
            .handle(webhook(json!({
                "message": { "type": "end-of-call-report", "call": { "id": "c", "assistantId": "other" } }
            })))
            .await
            .unwrap();

        assert_eq!(reply, VoiceReply::Received);
        assert_eq!(store.list_calls(business.id, Page::default()).await.unwrap().1, 0);
        assert!(notifier.sent.lock().await.is_empty());
    }

    fn function_call(name: &str, parameters: Value) -> VoiceWebhook {
        webhook(json!({
            "message": {
                "type": "function-call",
                "call": { "id": "call_live", "assistantId": "asst_1" },
                "functionCall": { "name": name, "parameters": parameters }
            }
        }))
    }

    #[tokio::test]
    async fn test_book_appointment_sends_one_confirmation() {
        let (reconciler, store, notifier, business) = setup().await;

        let reply = reconciler
            .handle(function_call(
                "bookAppointment",
                json!({
                    "customerName": "Jane Doe",
                    "customerEmail": "jane@example.test",
                    "serviceType": "Leak repair",
                    "date": "2025-03-14",
                    "time": "2:30 PM"
                }),
            ))
            .await
            .unwrap();

        let VoiceReply::FunctionResult(Value::String(text)) = reply else {
            panic!("expected a spoken result");
        };
        assert_eq!(text, "Appointment booked for Jane Doe on 2025-03-14 at 2:30 PM");

        let sent = notifier.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "jane@example.test");

        let (appointments, _) = store
            .list_appointments(business.id, None, Page::default())
            .await
            .unwrap();
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0].duration_minutes, 45);
        assert_eq!(
            appointments[0].appointment_date,
            datetime!(2025-03-14 14:30 UTC)
        );
        assert_eq!(appointments[0].provider_call_id.as_deref(), Some("call_live"));
    }

    #[tokio::test]
    async fn test_booking_links_to_later_call_report() {
        let (reconciler, store, _, business) = setup().await;
        reconciler
            .handle(function_call("bookAppointment", json!({ "date": "2025-03-14" })))
            .await
            .unwrap();
        reconciler
            .handle(end_of_call("call_live", "thanks, bye"))
            .await
            .unwrap();

        let (calls, _) = store.list_calls(business.id, Page::default()).await.unwrap();
        assert!(calls[0].appointment_booked);
    }

    #[tokio::test]
    async fn test_unparsable_time_asks_again() {
        let (reconciler, store, notifier, business) = setup().await;
        let reply = reconciler
            .handle(function_call(
                "bookAppointment",
                json!({ "customerEmail": "jane@example.test", "time": "after lunch" }),
            ))
            .await
            .unwrap();

        assert_eq!(reply, VoiceReply::FunctionResult(json!(ASK_TIME_AGAIN)));
        assert!(notifier.sent.lock().await.is_empty());
        let (appointments, _) = store
            .list_appointments(business.id, None, Page::default())
            .await
            .unwrap();
        assert!(appointments.is_empty());
    }

    #[tokio::test]
    async fn test_other_functions() {
        let (reconciler, _, _, _) = setup().await;

        assert_eq!(
            reconciler.handle(function_call("checkAvailability", json!({}))).await.unwrap(),
            VoiceReply::FunctionResult(json!(AVAILABLE_TIMES))
        );
        assert_eq!(
            reconciler.handle(function_call("orderPizza", json!({}))).await.unwrap(),
            VoiceReply::FunctionResult(json!(FUNCTION_NOT_RECOGNIZED))
        );

        let VoiceReply::FunctionResult(info) = reconciler
            .handle(function_call("getBusinessInfo", json!({})))
            .await
            .unwrap()
        else {
            panic!("expected a function result");
        };
        assert_eq!(info["name"], "Acme Plumbing");
        assert_eq!(info["hours"], "Weekdays: 9am-5pm, Weekends: Closed");
    }

    #[tokio::test]
    async fn test_function_call_for_unknown_business() {
        let (reconciler, _, _, _) = setup().await;
        let reply = reconciler
            .handle(webhook(json!({
                "message": {
                    "type": "function-call",
                    "call": { "assistantId": "nobody" },
                    "functionCall": { "name": "checkAvailability" }
                }
            })))
            .await
            .unwrap();
        assert_eq!(reply, VoiceReply::FunctionResult(json!(BUSINESS_NOT_FOUND)));
    }

    #[tokio::test]
    async fn test_numeric_phone_still_books_with_caller_details() {
        let (reconciler, store, notifier, business) = setup().await;

        let reply = reconciler
            .handle(function_call(
                "bookAppointment",
                json!({
                    "customerName": "Jane Doe",
                    "customerPhone": 5551234567u64,
                    "customerEmail": "jane@example.test",
                    "date": "2025-03-14",
                    "time": "2:30 PM"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(
            reply,
            VoiceReply::FunctionResult(json!(
                "Appointment booked for Jane Doe on 2025-03-14 at 2:30 PM"
            ))
        );
        let (appointments, _) = store
            .list_appointments(business.id, None, Page::default())
            .await
            .unwrap();
        assert_eq!(appointments[0].customer_name, "Jane Doe");
        assert_eq!(appointments[0].customer_phone.as_deref(), Some("5551234567"));
        assert_eq!(appointments[0].appointment_date, datetime!(2025-03-14 14:30 UTC));
        assert_eq!(notifier.wait_for(1).await[0].0, "jane@example.test");
    }

    #[tokio::test]
    async fn test_unreadable_argument_asks_again_without_booking() {
        let (reconciler, store, notifier, business) = setup().await;

        let reply = reconciler
            .handle(function_call(
                "bookAppointment",
                json!({
                    "customerName": "Jane Doe",
                    "customerEmail": "jane@example.test",
                    "date": { "month": 3, "day": 14 }
                }),
            ))
            .await
            .unwrap();

        assert_eq!(reply, VoiceReply::FunctionResult(json!(ASK_DETAILS_AGAIN)));
        let (_, total) = store
            .list_appointments(business.id, None, Page::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
        assert!(notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_function_call_without_name_is_not_recognized() {
        let (reconciler, _, _, _) = setup().await;
        let reply = reconciler
            .handle(webhook(json!({
                "message": {
                    "type": "function-call",
                    "call": { "id": "call_live", "assistantId": "asst_1" },
                    "functionCall": { "parameters": { "date": "2025-03-14" } }
                }
            })))
            .await
            .unwrap();
        assert_eq!(reply, VoiceReply::FunctionResult(json!(FUNCTION_NOT_RECOGNIZED)));
    }

    #[tokio::test]
    async fn test_booking_reply_does_not_wait_for_email() {
        let store = Arc::new(MemoryTenantStore::new());
        let (_, mut business) = store
            .create_user_with_business("owner@acme.test", "hash", "Acme Plumbing")
            .await
            .unwrap();
        business.vapi_assistant_id = Some("asst_1".into());
        store.save_business(&business).await.unwrap();
        let reconciler = VoiceReconciler::new(store.clone(), Arc::new(StalledNotifier));

        let reply = tokio::time::timeout(
            Duration::from_secs(2),
            reconciler.handle(function_call(
                "bookAppointment",
                json!({ "customerEmail": "jane@example.test", "date": "2025-03-14" }),
            )),
        )
        .await
        .expect("booking reply waited on the email provider")
        .unwrap();

        assert!(matches!(reply, VoiceReply::FunctionResult(Value::String(_))));
    }
}
