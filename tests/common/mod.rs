// Shared test fixtures: an auth service wired to in-memory substitutes with
// a manually driven clock and a recording event publisher.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gatehouse_auth::{
    AuthEvent, AuthService, AuthServiceConfig, CircuitBreaker, CircuitBreakerConfig,
    EventPublisher, ManualClock, MemoryStore, MemoryUserStore, OneTimeTokenConfig,
    OneTimeTokenStore, PublishError, RegisterInput, RequestContext, TokenEngine,
    TokenEngineConfig,
};

/// Publisher that records every event instead of talking to a broker.
/// Failures can be injected to exercise the best-effort publish paths.
pub struct RecordingPublisher {
    events: Mutex<Vec<AuthEvent>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> Vec<AuthEvent> {
        self.events.lock().expect("publisher poisoned").clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reset_events(&self) -> Vec<AuthEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, AuthEvent::PasswordReset { .. }))
            .collect()
    }

    pub fn verification_events(&self) -> Vec<AuthEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, AuthEvent::EmailVerification { .. }))
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, _ctx: &RequestContext, event: AuthEvent) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Publish("injected broker failure".into()));
        }
        self.events.lock().expect("publisher poisoned").push(event);
        Ok(())
    }
}

pub struct TestHarness {
    pub service: Arc<AuthService>,
    pub users: Arc<MemoryUserStore>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub publisher: Arc<RecordingPublisher>,
    pub engine: Arc<TokenEngine>,
    pub store_breaker: Arc<CircuitBreaker>,
}

pub fn harness() -> TestHarness {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let users = Arc::new(MemoryUserStore::new());
    let publisher = Arc::new(RecordingPublisher::new());

    let engine = Arc::new(
        TokenEngine::new(
            TokenEngineConfig {
                jwt_secret: "integration-test-secret-at-least-32-chars".to_string(),
                access_ttl_secs: 900,
                refresh_ttl_secs: 604_800,
            },
            store.clone(),
            clock.clone(),
        )
        .expect("token engine"),
    );

    let one_time = Arc::new(OneTimeTokenStore::new(
        store.clone(),
        clock.clone(),
        OneTimeTokenConfig::default(),
    ));

    let store_breaker = Arc::new(CircuitBreaker::new(
        "kv-store",
        CircuitBreakerConfig::default(),
    ));
    let broker_breaker = Arc::new(CircuitBreaker::new(
        "broker",
        CircuitBreakerConfig::default(),
    ));

    let service = Arc::new(AuthService::new(
        users.clone(),
        engine.clone(),
        one_time,
        publisher.clone(),
        store_breaker.clone(),
        broker_breaker,
        AuthServiceConfig {
            frontend_base_url: "http://localhost:3000".to_string(),
            // minimum cost keeps the suite fast
            bcrypt_cost: 4,
            enumeration_delay_ms: 0,
        },
    ));

    TestHarness {
        service,
        users,
        store,
        clock,
        publisher,
        engine,
        store_breaker,
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new(Some("req-1".to_string()), None)
}

pub fn register_input(email: &str, username: &str, password: &str) -> RegisterInput {
    RegisterInput {
        email: email.to_string(),
        username: username.to_string(),
        password: password.to_string(),
    }
}

/// Pull the raw one-time secret out of a published URL.
pub fn token_from_url(url: &str) -> String {
    url.split("token=")
        .nth(1)
        .expect("url carries a token")
        .to_string()
}

/// Register and verify a user through the HTTP router.
pub async fn register_verified_http(
    router: &axum::Router,
    publisher: &RecordingPublisher,
    email: &str,
    username: &str,
    password: &str,
) {
    use tower::util::ServiceExt;

    let body = serde_json::json!({
        "email": email,
        "username": username,
        "password": password,
    });
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/auth/v1/register")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .expect("register request");
    let response = router.clone().oneshot(request).await.expect("register");
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);

    let events = publisher.verification_events();
    let AuthEvent::EmailVerification {
        verification_url, ..
    } = events.last().expect("verification event")
    else {
        panic!("expected a verification event");
    };
    let token = token_from_url(verification_url);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/auth/v1/verify-email")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({ "token": token }).to_string(),
        ))
        .expect("verify request");
    let response = router.clone().oneshot(request).await.expect("verify");
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

/// Register and verify a user, returning the verified email.
pub async fn register_verified(harness: &TestHarness, email: &str, username: &str, password: &str) {
    harness
        .service
        .register(&ctx(), register_input(email, username, password))
        .await
        .expect("register");

    let events = harness.publisher.verification_events();
    let AuthEvent::EmailVerification {
        verification_url, ..
    } = events.last().expect("verification event")
    else {
        panic!("expected a verification event");
    };

    harness
        .service
        .verify_email(&ctx(), &token_from_url(verification_url))
        .await
        .expect("verify email");
}
