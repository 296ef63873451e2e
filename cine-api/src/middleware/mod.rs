pub mod auth;
pub mod resiliency;

pub use auth::{session_middleware, SessionClaims};
pub use resiliency::{circuit_breaker_middleware, ResiliencyLayer};
