use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::CoreResult;

/// Input for recording playback access after an accepted charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntitlement {
    pub user_id: String,
    pub movie_id: String,
    pub transaction_id: String,
    pub amount: Decimal,
    pub phone: Option<String>,
    pub country_code: String,
}

/// Durable record granting `user_id` playback of `movie_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: String,
    pub movie_id: String,
    pub transaction_id: String,
    pub amount: Decimal,
    pub phone: Option<String>,
    pub country_code: String,
    pub created_at: DateTime<Utc>,
}

impl Entitlement {
    pub fn from_new(entitlement: &NewEntitlement, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id: entitlement.user_id.clone(),
            movie_id: entitlement.movie_id.clone(),
            transaction_id: entitlement.transaction_id.clone(),
            amount: entitlement.amount,
            phone: entitlement.phone.clone(),
            country_code: entitlement.country_code.clone(),
            created_at,
        }
    }
}

/// Repository trait for entitlement storage
#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    /// Insert unless a row for the same `transaction_id` exists. Returns the
    /// stored row either way.
    async fn upsert(&self, entitlement: &NewEntitlement) -> CoreResult<Entitlement>;

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<Entitlement>>;

    async fn exists_for(&self, user_id: &str, movie_id: &str) -> CoreResult<bool>;
}
