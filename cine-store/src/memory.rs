//! Process-local stores, used when no database or Redis is configured and as
//! test doubles.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use cine_core::coordination::{InFlightGuard, LeaseToken, ReconciliationOutbox};
use cine_core::repository::{Entitlement, EntitlementRepository, NewEntitlement};
use cine_core::{CoreError, CoreResult};
use cine_shared::ReconciliationEntry;
use tokio::sync::{Mutex, RwLock};

/// Entitlements keyed by transaction id.
#[derive(Default)]
pub struct InMemoryEntitlementRepository {
    rows: RwLock<HashMap<String, Entitlement>>,
    unavailable: AtomicBool,
}

impl InMemoryEntitlementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with `PersistenceError`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn find_by_transaction(&self, transaction_id: &str) -> Option<Entitlement> {
        self.rows.read().await.get(transaction_id).cloned()
    }

    fn check_available(&self) -> CoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::PersistenceError(
                "entitlement store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementRepository for InMemoryEntitlementRepository {
    async fn upsert(&self, entitlement: &NewEntitlement) -> CoreResult<Entitlement> {
        self.check_available()?;
        let mut rows = self.rows.write().await;
        let stored = rows
            .entry(entitlement.transaction_id.clone())
            .or_insert_with(|| Entitlement::from_new(entitlement, Utc::now()));
        Ok(stored.clone())
    }

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<Entitlement>> {
        self.check_available()?;
        let rows = self.rows.read().await;
        let mut found: Vec<Entitlement> = rows
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn exists_for(&self, user_id: &str, movie_id: &str) -> CoreResult<bool> {
        self.check_available()?;
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .any(|e| e.user_id == user_id && e.movie_id == movie_id))
    }
}

/// Leases that lapse after their TTL even if never released.
#[derive(Default)]
pub struct InMemoryInFlightGuard {
    leases: Mutex<HashMap<(String, String), (LeaseToken, Instant)>>,
}

impl InMemoryInFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InFlightGuard for InMemoryInFlightGuard {
    async fn try_acquire(
        &self,
        user_id: &str,
        movie_id: &str,
        ttl: Duration,
    ) -> CoreResult<Option<LeaseToken>> {
        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        leases.retain(|_, (_, expires_at)| *expires_at > now);

        let key = (user_id.to_string(), movie_id.to_string());
        if leases.contains_key(&key) {
            return Ok(None);
        }
        let token = LeaseToken::generate();
        leases.insert(key, (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, user_id: &str, movie_id: &str, token: &LeaseToken) -> CoreResult<()> {
        let mut leases = self.leases.lock().await;
        if let Entry::Occupied(held) = leases.entry((user_id.to_string(), movie_id.to_string())) {
            if held.get().0 == *token {
                held.remove();
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOutbox {
    entries: Mutex<Vec<ReconciliationEntry>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReconciliationOutbox for InMemoryOutbox {
    async fn enqueue(&self, entry: ReconciliationEntry) -> CoreResult<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn pending(&self, limit: usize) -> CoreResult<Vec<ReconciliationEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entitlement(tx: &str) -> NewEntitlement {
        NewEntitlement {
            user_id: "user-1".to_string(),
            movie_id: "550".to_string(),
            transaction_id: tx.to_string(),
            amount: dec!(10.00),
            phone: None,
            country_code: "PE".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_transaction() {
        let repo = InMemoryEntitlementRepository::new();

        let first = repo.upsert(&entitlement("tx_1")).await.unwrap();
        let mut changed = entitlement("tx_1");
        changed.amount = dec!(99.00);
        let second = repo.upsert(&changed).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.amount, dec!(10.00));
        assert_eq!(repo.len().await, 1);
        assert!(repo.exists_for("user-1", "550").await.unwrap());
        assert!(!repo.exists_for("user-1", "551").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_with_persistence_error() {
        let repo = InMemoryEntitlementRepository::new();
        repo.set_unavailable(true);

        let err = repo.upsert(&entitlement("tx_1")).await.unwrap_err();
        assert!(matches!(err, CoreError::PersistenceError(_)));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_guard_refuses_second_lease_until_released() {
        let guard = InMemoryInFlightGuard::new();
        let ttl = Duration::from_secs(30);

        let token = guard.try_acquire("u", "m", ttl).await.unwrap().unwrap();
        assert!(guard.try_acquire("u", "m", ttl).await.unwrap().is_none());
        assert!(guard.try_acquire("u", "other", ttl).await.unwrap().is_some());

        guard.release("u", "m", &token).await.unwrap();
        assert!(guard.try_acquire("u", "m", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_guard_lease_expires() {
        let guard = InMemoryInFlightGuard::new();

        assert!(guard
            .try_acquire("u", "m", Duration::from_millis(10))
            .await
            .unwrap()
            .is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(guard
            .try_acquire("u", "m", Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_lease() {
        let guard = InMemoryInFlightGuard::new();

        let expired = guard
            .try_acquire("u", "m", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let current = guard
            .try_acquire("u", "m", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(expired, current);

        guard.release("u", "m", &expired).await.unwrap();
        assert!(guard
            .try_acquire("u", "m", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());

        guard.release("u", "m", &current).await.unwrap();
        assert!(guard
            .try_acquire("u", "m", Duration::from_secs(30))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_outbox_keeps_insertion_order() {
        let outbox = InMemoryOutbox::new();
        for tx in ["tx_1", "tx_2", "tx_3"] {
            let entry =
                ReconciliationEntry::new(tx, "user-1", "550", dec!(10), None, "PE", "db down");
            outbox.enqueue(entry).await.unwrap();
        }

        let pending = outbox.pending(2).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|e| e.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["tx_1", "tx_2"]);
    }
}
