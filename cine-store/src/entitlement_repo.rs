use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cine_core::repository::{Entitlement, EntitlementRepository, NewEntitlement};
use cine_core::{CoreError, CoreResult};
use rust_decimal::Decimal;
use sqlx::PgPool;

pub struct PgEntitlementRepository {
    pool: PgPool,
}

impl PgEntitlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EntitlementRow {
    user_id: String,
    movie_id: String,
    transaction_id: String,
    amount: Decimal,
    phone: Option<String>,
    country_code: String,
    created_at: DateTime<Utc>,
}

impl From<EntitlementRow> for Entitlement {
    fn from(row: EntitlementRow) -> Self {
        Entitlement {
            user_id: row.user_id,
            movie_id: row.movie_id,
            transaction_id: row.transaction_id,
            amount: row.amount,
            phone: row.phone,
            country_code: row.country_code,
            created_at: row.created_at,
        }
    }
}

fn persistence(e: sqlx::Error) -> CoreError {
    tracing::error!("Entitlement store error: {}", e);
    CoreError::PersistenceError(e.to_string())
}

const SELECT_COLUMNS: &str =
    "SELECT user_id, movie_id, transaction_id, amount, phone, country_code, created_at FROM entitlements";

#[async_trait]
impl EntitlementRepository for PgEntitlementRepository {
    async fn upsert(&self, entitlement: &NewEntitlement) -> CoreResult<Entitlement> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO entitlements (user_id, movie_id, transaction_id, amount, phone, country_code)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(&entitlement.user_id)
        .bind(&entitlement.movie_id)
        .bind(&entitlement.transaction_id)
        .bind(entitlement.amount.round_dp(2))
        .bind(&entitlement.phone)
        .bind(&entitlement.country_code)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        if inserted.rows_affected() == 0 {
            tracing::debug!(
                "Entitlement for transaction {} already stored",
                entitlement.transaction_id
            );
        }

        let row: EntitlementRow =
            sqlx::query_as(&format!("{} WHERE transaction_id = $1", SELECT_COLUMNS))
                .bind(&entitlement.transaction_id)
                .fetch_one(&self.pool)
                .await
                .map_err(persistence)?;

        Ok(row.into())
    }

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<Entitlement>> {
        let rows: Vec<EntitlementRow> = sqlx::query_as(&format!(
            "{} WHERE user_id = $1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(rows.into_iter().map(Entitlement::from).collect())
    }

    async fn exists_for(&self, user_id: &str, movie_id: &str) -> CoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM entitlements WHERE user_id = $1 AND movie_id = $2)",
        )
        .bind(user_id)
        .bind(movie_id)
        .fetch_one(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(exists)
    }
}
