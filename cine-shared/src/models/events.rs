use rust_decimal::Decimal;
use uuid::Uuid;

/// Outbox payload for an entitlement that could not be written after the
/// provider accepted the charge. A reconciliation process replays these.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct ReconciliationEntry {
    pub entry_id: Uuid,
    pub transaction_id: String,
    pub user_id: String,
    pub movie_id: String,
    pub amount: Decimal,
    pub phone: Option<String>,
    pub country_code: String,
    pub reason: String,
    pub enqueued_at: i64,
}

impl ReconciliationEntry {
    pub fn new(
        transaction_id: impl Into<String>,
        user_id: impl Into<String>,
        movie_id: impl Into<String>,
        amount: Decimal,
        phone: Option<String>,
        country_code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            transaction_id: transaction_id.into(),
            user_id: user_id.into(),
            movie_id: movie_id.into(),
            amount,
            phone,
            country_code: country_code.into(),
            reason: reason.into(),
            enqueued_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
