//! Router-level tests against the in-memory store and fake providers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use callally_api::{
    create_router,
    email::{Notifier, NotifyError},
    vapi::{PhoneNumber, VapiError, VoiceProvider},
    AppState, Config, Providers,
};
use callally_billing::{BillingProvider, BillingResult, PriceIds, TrialSubscription};
use callally_shared::{
    Business, CallReport, MemoryTenantStore, Plan, RateLimitConfig, TenantStore,
};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sha2::Sha256;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

const STRIPE_SECRET: &str = "whsec_test";

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeVoice {
    assistants: AtomicUsize,
    phones: AtomicUsize,
    updates: AtomicUsize,
}

#[async_trait]
impl VoiceProvider for FakeVoice {
    async fn create_assistant(&self, _business: &Business) -> Result<String, VapiError> {
        self.assistants.fetch_add(1, Ordering::SeqCst);
        Ok("asst_test".into())
    }

    async fn update_assistant(&self, _id: &str, _business: &Business) -> Result<(), VapiError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn provision_phone_number(&self, _id: &str) -> Result<PhoneNumber, VapiError> {
        self.phones.fetch_add(1, Ordering::SeqCst);
        Ok(PhoneNumber {
            id: "ph_test".into(),
            number: "+14155550123".into(),
        })
    }

    async fn start_test_call(&self, _a: &str, _p: &str, _to: &str) -> Result<String, VapiError> {
        Ok("call_test".into())
    }
}

#[derive(Default)]
struct FakeBilling {
    customers: AtomicUsize,
    subscriptions: AtomicUsize,
    cancellations: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl BillingProvider for FakeBilling {
    async fn create_customer(&self, _e: &str, _n: &str, _id: Uuid) -> BillingResult<String> {
        self.customers.fetch_add(1, Ordering::SeqCst);
        Ok("cus_test".into())
    }

    async fn create_trial_subscription(
        &self,
        _customer_id: &str,
        _plan: Plan,
        _trial_days: u32,
    ) -> BillingResult<TrialSubscription> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(TrialSubscription {
            subscription_id: Some("sub_test".into()),
            status: "trialing".into(),
            trial_end: None,
        })
    }

    async fn create_checkout_session(
        &self,
        _c: &str,
        _p: Plan,
        _d: u32,
        _s: &str,
        _x: &str,
    ) -> BillingResult<String> {
        Ok("https://checkout.test/session".into())
    }

    async fn create_portal_session(&self, _c: &str, _r: &str) -> BillingResult<String> {
        Ok("https://billing.test/portal".into())
    }

    async fn cancel_subscription(&self, s: &str, at_period_end: bool) -> BillingResult<()> {
        self.cancellations
            .lock()
            .unwrap()
            .push((s.to_string(), at_period_end));
        Ok(())
    }
}

#[derive(Default)]
struct FakeNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeNotifier {
    fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }

    /// Booking confirmations are sent from a spawned task.
    async fn wait_for(&self, count: usize) -> Vec<(String, String)> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let sent = self.sent.lock().unwrap();
                    if sent.len() >= count {
                        return sent.clone();
                    }
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("notifier was not called in time")
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_email(&self, to: &str, subject: &str, _html: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

struct TestApp {
    router: Router,
    state: AppState,
    store: Arc<MemoryTenantStore>,
    voice: Arc<FakeVoice>,
    billing: Arc<FakeBilling>,
    notifier: Arc<FakeNotifier>,
}

fn test_config() -> Config {
    let mut config = Config::for_tests();
    config.stripe_webhook_secret = STRIPE_SECRET.to_string();
    config.price_ids = PriceIds {
        starter: Some("price_starter".into()),
        professional: Some("price_pro".into()),
        business: Some("price_biz".into()),
    };
    config.rate_limit = RateLimitConfig {
        max_requests: 1000,
        window: Duration::from_secs(60),
    };
    config
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(test_config())
    }

    fn with_config(config: Config) -> Self {
        Self::build(config, true)
    }

    fn without_billing() -> Self {
        Self::build(test_config(), false)
    }

    fn build(config: Config, billing_enabled: bool) -> Self {
        let store = Arc::new(MemoryTenantStore::new());
        let voice = Arc::new(FakeVoice::default());
        let billing = Arc::new(FakeBilling::default());
        let notifier = Arc::new(FakeNotifier::default());

        let state = AppState::with_providers(
            config,
            store.clone(),
            Providers {
                voice: voice.clone(),
                billing: billing_enabled.then(|| billing.clone() as Arc<dyn BillingProvider>),
                notifier: notifier.clone(),
            },
        );

        Self {
            router: create_router(state.clone()),
            state,
            store,
            voice,
            billing,
            notifier,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn post_json(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Sign up and return (token, business_id).
    async fn signup(&self, email: &str) -> (String, Uuid) {
        let (status, body) = self
            .post_json(
                "/api/auth/signup",
                None,
                json!({ "email": email, "password": "Passw0rd", "business_name": "Acme" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["business_id"].as_str().unwrap().parse().unwrap(),
        )
    }

    async fn business(&self, id: Uuid) -> Business {
        self.store.get_business(id).await.unwrap().unwrap()
    }
}

fn stripe_signature(payload: &str) -> String {
    let timestamp = OffsetDateTime::now_utc().unix_timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(STRIPE_SECRET.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

fn end_of_call(call_id: &str, transcript: &str) -> Value {
    json!({
        "message": {
            "type": "end-of-call-report",
            "call": {
                "id": call_id,
                "assistantId": "asst_live",
                "customer": { "number": "+15550001111" },
                "startedAt": "2025-01-06T15:00:00Z",
                "endedAt": "2025-01-06T15:03:00Z"
            },
            "transcript": transcript,
            "summary": "Leak under the sink"
        }
    })
}

async fn live_business(app: &TestApp, email: &str) -> Business {
    let (_, business_id) = app.signup(email).await;
    let mut business = app.business(business_id).await;
    business.vapi_assistant_id = Some("asst_live".into());
    app.store.save_business(&business).await.unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();

    let (status, body) = app.get("/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "CallAlly API");

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// =============================================================================
// Auth
// =============================================================================

#[tokio::test]
async fn test_signup_then_login_returns_same_user() {
    let app = TestApp::new();
    let (signup_token, business_id) = app.signup("a@b.com").await;

    let (status, body) = app
        .post_json(
            "/api/auth/login",
            None,
            json!({ "email": "a@b.com", "password": "Passw0rd" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["business_id"], business_id.to_string());

    let login_token = body["access_token"].as_str().unwrap();
    let signup_user = app.state.jwt_manager.verify_token(&signup_token).unwrap();
    let login_user = app.state.jwt_manager.verify_token(login_token).unwrap();
    assert_eq!(signup_user, login_user);

    let user = app.store.get_user(login_user).await.unwrap().unwrap();
    assert!(user.last_login.is_some());
}

#[tokio::test]
async fn test_duplicate_signup_rejected() {
    let app = TestApp::new();
    app.signup("dup@b.com").await;

    let (status, body) = app
        .post_json(
            "/api/auth/signup",
            None,
            json!({ "email": "DUP@b.com", "password": "Passw0rd", "business_name": "Other" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Email already registered");
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_weak_password_rejected() {
    let app = TestApp::new();
    let (status, _) = app
        .post_json(
            "/api/auth/signup",
            None,
            json!({ "email": "weak@b.com", "password": "password", "business_name": "Acme" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.store.find_user_by_email("weak@b.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_bad_credentials_and_disabled_account() {
    let app = TestApp::new();
    let (token, _) = app.signup("off@b.com").await;

    let (status, body) = app
        .post_json(
            "/api/auth/login",
            None,
            json!({ "email": "off@b.com", "password": "Wrong0ne" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid email or password");

    let user = app.store.find_user_by_email("off@b.com").await.unwrap().unwrap();
    app.store.set_user_active(user.id, false).await.unwrap();

    let (status, body) = app
        .post_json(
            "/api/auth/login",
            None,
            json!({ "email": "off@b.com", "password": "Passw0rd" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Account is disabled");

    let (status, _) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_me_requires_token() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("me@b.com").await;

    let (status, _) = app.get("/api/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/auth/me", Some("not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "me@b.com");
    assert_eq!(body["businesses"][0]["id"], business_id.to_string());
    assert_eq!(body["businesses"][0]["status"], "onboarding");
}

#[tokio::test]
async fn test_auth_endpoints_rate_limited() {
    let mut config = test_config();
    config.rate_limit = RateLimitConfig {
        max_requests: 2,
        window: Duration::from_secs(60),
    };
    let app = TestApp::with_config(config);

    let login = || {
        Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(
                json!({ "email": "x@b.com", "password": "Passw0rd1" }).to_string(),
            ))
            .unwrap()
    };

    assert_eq!(app.send(login()).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.send(login()).await.0, StatusCode::UNAUTHORIZED);
    let (status, body) = app.send(login()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], 429);
}

// =============================================================================
// Tenancy
// =============================================================================

#[tokio::test]
async fn test_foreign_business_is_not_found() {
    let app = TestApp::new();
    let (_, owner_business) = app.signup("owner@b.com").await;
    let (intruder, _) = app.signup("intruder@b.com").await;

    let (status, body) = app
        .get(&format!("/api/business/{}", owner_business), Some(&intruder))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Business not found");
}

// =============================================================================
// Onboarding
// =============================================================================

#[tokio::test]
async fn test_onboarding_complete_is_idempotent() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("saga@b.com").await;

    let (status, body) = app
        .post_json(
            &format!("/api/onboarding/{}/complete", business_id),
            Some(&token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Please complete all onboarding steps first");

    let (status, body) = app
        .post_json(
            &format!("/api/onboarding/{}/step", business_id),
            Some(&token),
            json!({ "step": 1, "data": { "business_name": "Acme Plumbing", "industry": "plumbing" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["onboarding_step"], 2);

    let uri = format!("/api/onboarding/{}/complete", business_id);
    let (status, first) = app.post_json(&uri, Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    assert_eq!(first["message"], "Your AI receptionist is now live!");
    assert_eq!(first["assistant_id"], "asst_test");
    assert_eq!(first["phone_number"], "+14155550123");

    let (status, second) = app.post_json(&uri, Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["message"], "Onboarding already complete");
    assert_eq!(second["assistant_id"], first["assistant_id"]);
    assert_eq!(second["phone_number"], first["phone_number"]);

    assert_eq!(app.voice.assistants.load(Ordering::SeqCst), 1);
    assert_eq!(app.voice.phones.load(Ordering::SeqCst), 1);
    assert_eq!(app.billing.customers.load(Ordering::SeqCst), 1);
    assert_eq!(app.billing.subscriptions.load(Ordering::SeqCst), 1);
    assert_eq!(app.notifier.subjects().len(), 1);

    let business = app.business(business_id).await;
    assert!(business.is_active());
    assert_eq!(business.subscription_status.as_deref(), Some("trialing"));

    let (status, body) = app
        .post_json(
            &format!("/api/onboarding/{}/step", business_id),
            Some(&token),
            json!({ "step": 2, "data": {} }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Onboarding already complete");
}

#[tokio::test]
async fn test_invalid_step_rejected() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("steps@b.com").await;
    let uri = format!("/api/onboarding/{}/step", business_id);

    let (status, _) = app
        .post_json(&uri, Some(&token), json!({ "step": 9, "data": {} }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post_json(&uri, Some(&token), json!({ "step": 5, "data": { "rings_before_ai": 40 } }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Dashboard
// =============================================================================

#[tokio::test]
async fn test_call_pagination_over_45_calls() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("pages@b.com").await;

    for i in 0..45 {
        app.store
            .reconcile_call(CallReport {
                business_id,
                provider_call_id: format!("call_{i}"),
                caller_phone: "+15550000000".into(),
                started_at: None,
                ended_at: None,
                duration_seconds: Some(60),
                appointment_booked: false,
                emergency_triggered: false,
                transcript: None,
                summary: None,
                recording_url: None,
                received_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
    }

    for (page, expected_len, expected_more) in [(1, 20, true), (2, 20, true), (3, 5, false)] {
        let (status, body) = app
            .get(
                &format!("/api/business/{}/calls?page={}&per_page=20", business_id, page),
                Some(&token),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["calls"].as_array().unwrap().len(), expected_len);
        assert_eq!(body["has_more"], expected_more);
        assert_eq!(body["total"], 45);
    }

    let (status, _) = app
        .get(
            &format!("/api/business/{}/calls?per_page=101", business_id),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_appointment_lifecycle() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("appts@b.com").await;
    let base = format!("/api/business/{}/appointments", business_id);

    let (status, created) = app
        .post_json(
            &base,
            Some(&token),
            json!({
                "customer_name": "Jane Doe",
                "service_type": "Repair",
                "appointment_date": "2025-03-14T15:00:00Z"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["status"], "scheduled");
    assert_eq!(created["duration_minutes"], 30);
    let id = created["id"].as_str().unwrap();

    let patch = |body: Value| {
        Request::builder()
            .method("PATCH")
            .uri(format!("{}/{}", base, id))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let (status, body) = app.send(patch(json!({ "status": "completed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let (status, _) = app.send(patch(json!({ "status": "scheduled" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.get(&format!("{}?status=completed", base), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointments"].as_array().unwrap().len(), 1);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("{}/{}", base, id))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(delete).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get(&base, Some(&token)).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_update_business_pushes_to_assistant() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("patch@b.com").await;
    let mut business = app.business(business_id).await;
    business.vapi_assistant_id = Some("asst_live".into());
    app.store.save_business(&business).await.unwrap();

    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/api/business/{}", business_id))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(json!({ "agent_name": "Sam" }).to_string()))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent_name"], "Sam");
    assert_eq!(app.voice.updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_test_call_requires_assistant() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("testcall@b.com").await;
    let uri = format!(
        "/api/business/{}/test-call?phone_number=%2B15550009999",
        business_id
    );

    let (status, body) = app.post_json(&uri, Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "AI assistant not set up yet");

    let mut business = app.business(business_id).await;
    business.vapi_assistant_id = Some("asst_live".into());
    business.vapi_phone_id = Some("ph_live".into());
    app.store.save_business(&business).await.unwrap();

    let (status, body) = app.post_json(&uri, Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["call_id"], "call_test");
}

// =============================================================================
// Voice webhooks
// =============================================================================

#[tokio::test]
async fn test_end_of_call_replay_counts_once() {
    let app = TestApp::new();
    let business = live_business(&app, "voice@b.com").await;
    let report = end_of_call("vapi_call_1", "Great, I've booked you for 3pm Tuesday");

    for _ in 0..2 {
        let (status, body) = app.post_json("/api/webhooks/vapi", None, report.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
    }

    let (calls, total) = app
        .store
        .list_calls(business.id, Default::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert!(calls[0].appointment_booked);
    assert_eq!(calls[0].duration_seconds, Some(180));

    let usage = app.store.list_usage(business.id).await.unwrap();
    assert_eq!(usage.len(), 1);

    assert_eq!(app.notifier.subjects().len(), 1);
}

#[tokio::test]
async fn test_unknown_assistant_acknowledged() {
    let app = TestApp::new();
    let mut report = end_of_call("vapi_call_x", "hello");
    report["message"]["call"]["assistantId"] = json!("asst_nobody");

    let (status, body) = app.post_json("/api/webhooks/vapi", None, report).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert!(app.notifier.subjects().is_empty());
}

#[tokio::test]
async fn test_book_appointment_function_call() {
    let app = TestApp::new();
    let business = live_business(&app, "book@b.com").await;

    let (status, body) = app
        .post_json(
            "/api/webhooks/vapi",
            None,
            json!({
                "message": {
                    "type": "function-call",
                    "call": { "id": "vapi_call_2", "assistantId": "asst_live" },
                    "functionCall": {
                        "name": "bookAppointment",
                        "parameters": {
                            "customerName": "Jane Doe",
                            "customerEmail": "jane@example.com",
                            "serviceType": "Leak repair",
                            "date": "2025-03-14",
                            "time": "2:30 PM"
                        }
                    }
                }
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let result = body["result"].as_str().unwrap();
    assert!(result.contains("Jane Doe"), "{result}");
    assert!(result.contains("2025-03-14"), "{result}");

    let sent = app.notifier.wait_for(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "jane@example.com");

    let (appointments, total) = app
        .store
        .list_appointments(business.id, None, Default::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(appointments[0].customer_name, "Jane Doe");
}

#[tokio::test]
async fn test_vapi_secret_enforced_when_configured() {
    let mut config = test_config();
    config.vapi.webhook_secret = Some("vapi-shared".into());
    let app = TestApp::with_config(config);
    let payload = json!({ "message": { "type": "status-update" } });

    let (status, _) = app.post_json("/api/webhooks/vapi", None, payload.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/vapi")
        .header("content-type", "application/json")
        .header("x-vapi-secret", "vapi-shared")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn test_function_call_without_name_is_answered() {
    let app = TestApp::new();
    live_business(&app, "noname@b.com").await;

    let (status, body) = app
        .post_json(
            "/api/webhooks/vapi",
            None,
            json!({
                "message": {
                    "type": "function-call",
                    "call": { "id": "vapi_call_3", "assistantId": "asst_live" },
                    "functionCall": { "parameters": {} }
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "Function not recognized");
}

// =============================================================================
// Request bodies
// =============================================================================

#[tokio::test]
async fn test_mistyped_body_is_bad_request() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("body@b.com").await;

    let (status, body) = app
        .post_json(
            &format!("/api/onboarding/{}/step", business_id),
            Some(&token),
            json!({ "step": "one", "data": {} }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
    assert!(body["error"].is_string());

    let (status, body) = app
        .post_json("/api/auth/signup", None, json!({ "email": "x@b.com" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
}

// =============================================================================
// Billing
// =============================================================================

#[tokio::test]
async fn test_billing_routes_when_billing_disabled() {
    let app = TestApp::without_billing();
    let (token, business_id) = app.signup("nobill@b.com").await;
    let base = format!("/api/business/{}/billing", business_id);

    for (path, body) in [
        ("checkout", json!({ "plan": "starter" })),
        ("portal", json!({})),
        ("cancel", json!({ "at_period_end": true })),
    ] {
        let (status, response) = app
            .post_json(&format!("{}/{}", base, path), Some(&token), body)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
        assert_eq!(response["error"], "Billing is not configured", "{path}");
    }
}

#[tokio::test]
async fn test_billing_routes_require_linked_customer() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("unlinked@b.com").await;
    let base = format!("/api/business/{}/billing", business_id);

    let (status, _) = app
        .post_json(&format!("{}/checkout", base), Some(&token), json!({ "plan": "starter" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post_json(&format!("{}/portal", base), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post_json(&format!("{}/cancel", base), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.billing.cancellations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_checkout_and_portal_return_urls() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("linked@b.com").await;
    let mut business = app.business(business_id).await;
    business.stripe_customer_id = Some("cus_live".into());
    app.store.save_business(&business).await.unwrap();
    let base = format!("/api/business/{}/billing", business_id);

    let (status, body) = app
        .post_json(
            &format!("{}/checkout", base),
            Some(&token),
            json!({ "plan": "professional" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://checkout.test/session");

    let (status, body) = app
        .post_json(&format!("{}/portal", base), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://billing.test/portal");
}

#[tokio::test]
async fn test_cancel_immediately_marks_cancelled() {
    let app = TestApp::new();
    let (token, business_id) = app.signup("cancel@b.com").await;
    let mut business = app.business(business_id).await;
    business.stripe_customer_id = Some("cus_live".into());
    business.stripe_subscription_id = Some("sub_live".into());
    business.subscription_status = Some("active".into());
    app.store.save_business(&business).await.unwrap();
    let uri = format!("/api/business/{}/billing/cancel", business_id);

    let (status, body) = app
        .post_json(&uri, Some(&token), json!({ "at_period_end": true }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "Subscription will be cancelled at the end of the billing period"
    );
    assert_eq!(
        app.business(business_id).await.subscription_status.as_deref(),
        Some("active")
    );

    let (status, body) = app
        .post_json(&uri, Some(&token), json!({ "at_period_end": false }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Subscription cancelled");
    assert_eq!(
        app.business(business_id).await.subscription_status.as_deref(),
        Some("cancelled")
    );

    assert_eq!(
        *app.billing.cancellations.lock().unwrap(),
        vec![("sub_live".to_string(), true), ("sub_live".to_string(), false)]
    );
}

// =============================================================================
// Billing webhooks
// =============================================================================

fn stripe_request(payload: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

#[tokio::test]
async fn test_stripe_signature_required() {
    let app = TestApp::new();
    let payload = json!({ "id": "evt_1", "type": "invoice.payment_failed", "data": { "object": {} } })
        .to_string();

    let (status, body) = app.send(stripe_request(&payload, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing signature");

    let (status, body) = app
        .send(stripe_request(&payload, Some("t=1,v1=deadbeef".into())))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid signature");
}

#[tokio::test]
async fn test_stripe_event_replay_is_idempotent() {
    let app = TestApp::new();
    let (_, business_id) = app.signup("stripe@b.com").await;
    let mut business = app.business(business_id).await;
    business.stripe_customer_id = Some("cus_live".into());
    business.subscription_status = Some("trialing".into());
    app.store.save_business(&business).await.unwrap();

    let payload = json!({
        "id": "evt_fail",
        "type": "invoice.payment_failed",
        "data": { "object": { "id": "in_1", "customer": "cus_live" } }
    })
    .to_string();

    for _ in 0..2 {
        let (status, body) = app
            .send(stripe_request(&payload, Some(stripe_signature(&payload))))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
        assert_eq!(
            app.business(business_id).await.subscription_status.as_deref(),
            Some("past_due")
        );
    }
}
