use async_trait::async_trait;
use cine_shared::Masked;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::idempotency::IdempotencyKey;
use crate::money::Currency;

/// Payment instruments the orchestrator can charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Card,
    YapeOtp,
}

impl InstrumentKind {
    /// Prefix used when minting idempotency keys for this instrument.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            InstrumentKind::Card => "card",
            InstrumentKind::YapeOtp => "yape",
        }
    }
}

/// Charge status as interpreted by this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Approved,
    Pending,
    InProcess,
    Rejected,
}

impl PaymentStatus {
    /// Literal match on the provider's `status` field. Anything unrecognised
    /// is treated as a rejection.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "approved" => PaymentStatus::Approved,
            "pending" => PaymentStatus::Pending,
            "in_process" => PaymentStatus::InProcess,
            "rejected" => PaymentStatus::Rejected,
            other => {
                tracing::warn!("Unrecognised provider status {:?}, treating as rejected", other);
                PaymentStatus::Rejected
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Approved => "approved",
            PaymentStatus::Pending => "pending",
            PaymentStatus::InProcess => "in_process",
            PaymentStatus::Rejected => "rejected",
        }
    }

    /// Statuses that unlock playback.
    pub fn grants_entitlement(&self) -> bool {
        matches!(self, PaymentStatus::Approved | PaymentStatus::Pending)
    }
}

/// Single-use credential minted by the provider. Not `Clone`: a token is
/// moved into exactly one charge call.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ProviderToken(Masked<String>);

impl ProviderToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Masked::new(token.into()))
    }

    pub fn as_str(&self) -> &str {
        self.0.expose()
    }

    pub fn into_inner(self) -> String {
        self.0.into_inner()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    #[serde(rename = "type")]
    pub id_type: String,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identification: Option<Identification>,
}

/// Raw card data, already format-checked by the card adapter.
#[derive(Debug, Clone)]
pub struct CardDetails {
    pub card_number: Masked<String>,
    pub expiration_month: u8,
    pub expiration_year: u16,
    pub security_code: Masked<String>,
    pub cardholder_name: Option<String>,
    pub identification: Identification,
}

/// Phone and one-time password issued by the Yape wallet app.
#[derive(Debug, Clone)]
pub struct YapeCredentials {
    pub phone_number: Masked<String>,
    pub otp: Masked<String>,
}

#[derive(Debug, Clone)]
pub enum TokenizeRequest {
    Card(CardDetails),
    Yape(YapeCredentials),
}

impl TokenizeRequest {
    pub fn instrument(&self) -> InstrumentKind {
        match self {
            TokenizeRequest::Card(_) => InstrumentKind::Card,
            TokenizeRequest::Yape(_) => InstrumentKind::YapeOtp,
        }
    }
}

#[derive(Debug)]
pub struct ChargeRequest {
    pub token: ProviderToken,
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_method_id: String,
    pub installments: u32,
    pub issuer_id: Option<String>,
    pub payer: Payer,
    pub description: String,
    pub external_reference: Option<String>,
    pub idempotency_key: IdempotencyKey,
}

/// The provider's record of a charge. Externally owned, never mutated here.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayment {
    pub provider_id: String,
    pub status: String,
    pub status_detail: Option<String>,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub payment_method_id: Option<String>,
    pub installments: Option<u32>,
}

impl ProviderPayment {
    pub fn interpreted_status(&self) -> PaymentStatus {
        PaymentStatus::from_provider(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardIssuer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentOption {
    pub installments: u32,
    pub installment_amount: Decimal,
    pub total_amount: Decimal,
    #[serde(default)]
    pub recommended_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodInfo {
    pub id: String,
    pub name: String,
    pub payment_type_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider call timed out after {0} ms")]
    Timeout(u64),
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected provider response: {0}")]
    Decode(String),
    #[error("payment provider is temporarily unavailable")]
    Unavailable,
}

/// The external payment provider: tokenization, charging and the auxiliary
/// lookups the card form needs.
///
/// Constructed once at process start and shared by reference.
#[async_trait]
pub trait PaymentProviderClient: Send + Sync {
    /// Exchange raw credentials for a single-use token.
    async fn tokenize(&self, request: TokenizeRequest) -> Result<ProviderToken, ProviderError>;

    /// Charge a token. The provider deduplicates on `idempotency_key`.
    async fn charge(&self, request: ChargeRequest) -> Result<ProviderPayment, ProviderError>;

    async fn identification_types(&self) -> Result<Vec<IdentificationType>, ProviderError>;

    async fn card_issuers(&self, bin: &str) -> Result<Vec<CardIssuer>, ProviderError>;

    async fn installments(
        &self,
        amount: Decimal,
        bin: &str,
    ) -> Result<Vec<InstallmentOption>, ProviderError>;

    async fn payment_methods(&self, bin: &str) -> Result<Vec<PaymentMethodInfo>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_is_literal() {
        assert_eq!(PaymentStatus::from_provider("approved"), PaymentStatus::Approved);
        assert_eq!(PaymentStatus::from_provider("pending"), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::from_provider("in_process"), PaymentStatus::InProcess);
        assert_eq!(PaymentStatus::from_provider("rejected"), PaymentStatus::Rejected);
        assert_eq!(PaymentStatus::from_provider("Approved"), PaymentStatus::Rejected);
        assert_eq!(PaymentStatus::from_provider("weird_status"), PaymentStatus::Rejected);
    }

    #[test]
    fn test_only_approved_and_pending_grant_access() {
        assert!(PaymentStatus::Approved.grants_entitlement());
        assert!(PaymentStatus::Pending.grants_entitlement());
        assert!(!PaymentStatus::InProcess.grants_entitlement());
        assert!(!PaymentStatus::Rejected.grants_entitlement());
    }

    #[test]
    fn test_token_debug_is_masked() {
        let token = ProviderToken::new("ff8080814c11e237014c1ff593b57b4d");
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("ff8080814c11"));
        assert_eq!(token.as_str(), "ff8080814c11e237014c1ff593b57b4d");
    }
}
