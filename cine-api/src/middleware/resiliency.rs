use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use cine_store::app_config::CircuitBreakerConfig;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failure detected, failing fast
    HalfOpen, // Testing if service is back
}

pub struct CircuitBreaker {
    pub name: String,
    pub state: RwLock<CircuitState>,
    pub failure_count: AtomicUsize,
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
    pub last_failure: RwLock<Option<Instant>>,
    /// Set while the single Half-Open trial request is outstanding
    trial_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
            trial_in_flight: AtomicBool::new(false),
        }
    }

    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last_fail = *self.last_failure.read().await;
                let elapsed = last_fail.is_some_and(|instant| instant.elapsed() > self.reset_timeout);
                if !elapsed {
                    return false;
                }

                let mut s = self.state.write().await;
                if *s == CircuitState::Open {
                    *s = CircuitState::HalfOpen;
                    tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                }
                drop(s);
                self.claim_trial()
            }
            CircuitState::HalfOpen => self.claim_trial(),
        }
    }

    /// Only one request may test the dependency while Half-Open.
    fn claim_trial(&self) -> bool {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        self.trial_in_flight.store(false, Ordering::SeqCst);
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            self.failure_count.store(0, Ordering::SeqCst);
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        } else if *state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::SeqCst);
        }
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;
        self.trial_in_flight.store(false, Ordering::SeqCst);

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            let mut last = self.last_failure.write().await;
            *last = Some(Instant::now());
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
    }
}

/// Frees the Half-Open trial slot if the request is dropped before its
/// outcome is recorded.
struct TrialSlot<'a>(&'a CircuitBreaker);

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        self.0.trial_in_flight.store(false, Ordering::SeqCst);
    }
}

/// Breakers guarding outbound dependencies.
pub struct ResiliencyLayer {
    pub provider_cb: CircuitBreaker,
}

impl ResiliencyLayer {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            provider_cb: CircuitBreaker::new(
                "payment-provider",
                config.failure_threshold as usize,
                Duration::from_secs(config.reset_timeout_seconds),
            ),
        }
    }
}

/// Responses that mean the provider itself failed, as opposed to a bad
/// request or a declined card.
fn is_provider_failure(status: StatusCode) -> bool {
    matches!(status, StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT)
}

pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if !path.starts_with("/pay/") {
        return next.run(req).await;
    }

    let cb = &state.resiliency.provider_cb;
    if !cb.check().await {
        let message = format!("Circuit Breaker [{}] is OPEN", cb.name);
        let body = if path == "/pay/yape" {
            json!({ "error_message": message })
        } else {
            json!({ "error": message })
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }
    let _slot = TrialSlot(cb);

    let response = next.run(req).await;

    if is_provider_failure(response.status()) {
        cb.record_failure().await;
    } else {
        cb.record_success().await;
    }

    response
}
