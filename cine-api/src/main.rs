use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cine_api::{
    app,
    middleware::ResiliencyLayer,
    state::{AppState, AuthConfig},
};
use cine_core::coordination::{InFlightGuard, ReconciliationOutbox};
use cine_core::repository::EntitlementRepository;
use cine_payment::{OrchestratorSettings, PaymentOrchestrator};
use cine_store::app_config::Config;
use cine_store::{
    ContentApiCatalog, DbClient, InMemoryEntitlementRepository, InMemoryInFlightGuard,
    InMemoryOutbox, PgEntitlementRepository, RedisClient, RedisInFlightGuard, RedisOutbox,
    RestPaymentProvider,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cine_api=debug,cine_payment=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Cine API on port {}", config.server.port);

    let provider = Arc::new(
        RestPaymentProvider::new(&config.provider).context("Failed to build provider client")?,
    );
    let catalog = Arc::new(
        ContentApiCatalog::new(&config.content_api).context("Failed to build content API client")?,
    );

    // Entitlement store
    let repository: Arc<dyn EntitlementRepository> = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(PgEntitlementRepository::new(db.pool.clone()))
        }
        None => {
            tracing::warn!("No database configured; entitlements are kept in memory");
            Arc::new(InMemoryEntitlementRepository::new())
        }
    };

    // In-flight leases and reconciliation outbox
    let (guard, outbox): (Arc<dyn InFlightGuard>, Arc<dyn ReconciliationOutbox>) =
        match &config.redis.url {
            Some(url) => {
                let redis = RedisClient::new(url)
                    .await
                    .context("Failed to connect to Redis")?;
                (
                    Arc::new(RedisInFlightGuard::new(redis.clone())),
                    Arc::new(RedisOutbox::new(redis)),
                )
            }
            None => {
                tracing::warn!("No Redis configured; leases and outbox are process-local");
                (
                    Arc::new(InMemoryInFlightGuard::new()),
                    Arc::new(InMemoryOutbox::new()),
                )
            }
        };

    let settings = OrchestratorSettings {
        charge_timeout: Duration::from_millis(config.payments.charge_timeout_ms),
        in_flight_ttl: Duration::from_secs(config.payments.in_flight_ttl_seconds),
        default_country_code: config.payments.default_country_code.clone(),
    };

    let orchestrator = PaymentOrchestrator::new(
        provider,
        catalog,
        repository,
        config.pricing.clone(),
    )
    .with_settings(settings)
    .with_in_flight_guard(guard)
    .with_outbox(outbox);

    let app_state = AppState::new(
        orchestrator,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        ResiliencyLayer::new(&config.provider.circuit_breaker),
    )
    .with_cors_origins(config.server.cors_origins.clone());

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
