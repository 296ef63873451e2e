use std::sync::Arc;

use cine_core::repository::{Entitlement, EntitlementRepository, NewEntitlement};
use cine_core::CoreResult;

/// Persists playback access once a charge is approved or pending.
///
/// No business rules are checked here; amounts were validated upstream.
#[derive(Clone)]
pub struct EntitlementRecorder {
    repository: Arc<dyn EntitlementRepository>,
}

impl EntitlementRecorder {
    pub fn new(repository: Arc<dyn EntitlementRepository>) -> Self {
        Self { repository }
    }

    /// Idempotent per `transaction_id`: recording the same transaction again
    /// returns the row written the first time.
    pub async fn record(&self, entitlement: NewEntitlement) -> CoreResult<Entitlement> {
        let stored = self.repository.upsert(&entitlement).await?;
        tracing::info!(
            "Entitlement recorded: user={} movie={} tx={}",
            stored.user_id,
            stored.movie_id,
            stored.transaction_id
        );
        Ok(stored)
    }

    pub async fn has_access(&self, user_id: &str, movie_id: &str) -> CoreResult<bool> {
        self.repository.exists_for(user_id, movie_id).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<Entitlement>> {
        self.repository.list_for_user(user_id).await
    }
}
