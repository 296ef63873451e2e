pub mod app_config;
pub mod content_api;
pub mod database;
pub mod entitlement_repo;
pub mod memory;
pub mod provider_client;
pub mod redis_repo;

pub use content_api::ContentApiCatalog;
pub use database::DbClient;
pub use entitlement_repo::PgEntitlementRepository;
pub use memory::{InMemoryEntitlementRepository, InMemoryInFlightGuard, InMemoryOutbox};
pub use provider_client::RestPaymentProvider;
pub use redis_repo::{RedisClient, RedisInFlightGuard, RedisOutbox};
