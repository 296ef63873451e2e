use std::sync::Arc;

use cine_payment::PaymentOrchestrator;

use crate::middleware::resiliency::ResiliencyLayer;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub auth: AuthConfig,
    pub resiliency: Arc<ResiliencyLayer>,
    /// Empty allows any origin
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(orchestrator: PaymentOrchestrator, auth: AuthConfig, resiliency: ResiliencyLayer) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            auth,
            resiliency: Arc::new(resiliency),
            cors_origins: Vec::new(),
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}
