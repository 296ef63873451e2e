use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use cine_shared::ReconciliationEntry;
use uuid::Uuid;

use crate::CoreResult;

/// Proof of holding an in-flight lease. Only the matching token releases it,
/// so an attempt that outlived its TTL cannot free a newer attempt's lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short-lived lease on a `(user, movie)` pair while one payment attempt is
/// in flight.
#[async_trait]
pub trait InFlightGuard: Send + Sync {
    /// `None` when another attempt already holds the lease.
    async fn try_acquire(
        &self,
        user_id: &str,
        movie_id: &str,
        ttl: Duration,
    ) -> CoreResult<Option<LeaseToken>>;

    /// Drops the lease only if `token` still owns it.
    async fn release(&self, user_id: &str, movie_id: &str, token: &LeaseToken) -> CoreResult<()>;
}

/// Queue of entitlement writes that failed after the charge went through.
#[async_trait]
pub trait ReconciliationOutbox: Send + Sync {
    async fn enqueue(&self, entry: ReconciliationEntry) -> CoreResult<()>;

    /// Pending entries, oldest first, without removing them.
    async fn pending(&self, limit: usize) -> CoreResult<Vec<ReconciliationEntry>>;
}
