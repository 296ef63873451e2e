use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod entitlements;
pub mod error;
pub mod middleware;
pub mod payments;
pub mod state;

pub use state::AppState;

use middleware::{circuit_breaker_middleware, session_middleware};

pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .merge(payments::routes())
        .merge(entitlements::routes())
        .route("/health", get(health))
        .layer(from_fn_with_state(state.clone(), circuit_breaker_middleware))
        .layer(from_fn_with_state(state.clone(), session_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            let parsed = HeaderValue::from_str(origin);
            if parsed.is_err() {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
            }
            parsed.ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(payments::IDEMPOTENCY_HEADER),
        ])
}
