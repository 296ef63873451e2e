//! JSON bodies of the `/pay` endpoints, shared by the API handlers and the
//! checkout controllers that call them.

use cine_core::money::Currency;
use cine_core::payment::Identification;
use cine_core::FieldError;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::orchestrator::{PaymentReceipt, Rejection};
use crate::request::{PaymentInstrument, PaymentRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerBody {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identification: Option<Identification>,
}

/// Body of `POST /pay/card` and `POST /pay/rental`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardPaymentBody {
    pub token: String,
    pub transaction_amount: Decimal,
    pub payment_method_id: String,
    pub payer: PayerBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installments: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub issuer_id: Option<String>,
    #[serde(default, rename = "movieId", skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<String>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub phone: Option<String>,
    #[serde(default, rename = "countryCode", skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
}

impl CardPaymentBody {
    pub fn into_request(self) -> PaymentRequest {
        let mut request = PaymentRequest::new(
            PaymentInstrument::card_token(self.token),
            self.payer.email,
            self.transaction_amount,
        );
        request.payer_identification = self.payer.identification;
        request.payment_method_id = self.payment_method_id;
        request.installments = self.installments.unwrap_or(1);
        request.issuer_id = self.issuer_id;
        request.movie_id = non_blank(self.movie_id);
        request.user_id = non_blank(self.user_id);
        request.description = non_blank(self.description);
        request.phone = non_blank(self.phone);
        request.country_code = non_blank(self.country_code);
        request.currency = self.currency;
        request
    }
}

fn default_yape_method() -> String {
    "yape".to_string()
}

/// Body of `POST /pay/yape`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YapePaymentBody {
    pub token: String,
    pub transaction_amount: Decimal,
    #[serde(default = "default_yape_method")]
    pub payment_method_id: String,
    pub payer: PayerBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installments: Option<u32>,
    #[serde(default, rename = "movieId", skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<String>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub phone: Option<String>,
}

impl YapePaymentBody {
    pub fn into_request(self) -> PaymentRequest {
        let mut request = PaymentRequest::new(
            PaymentInstrument::yape_token(self.token),
            self.payer.email,
            self.transaction_amount,
        );
        request.payment_method_id = self.payment_method_id;
        request.installments = self.installments.unwrap_or(1);
        request.movie_id = non_blank(self.movie_id);
        request.user_id = non_blank(self.user_id);
        request.description = non_blank(self.description);
        request.phone = non_blank(self.phone);
        request
    }
}

/// `200` body of `/pay/card` and `/pay/rental`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardPaymentResponse {
    pub id: String,
    pub status: String,
    pub status_detail: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub transaction_amount: Decimal,
    pub payment_method_id: String,
    pub installments: u32,
}

impl From<&PaymentReceipt> for CardPaymentResponse {
    fn from(receipt: &PaymentReceipt) -> Self {
        Self {
            id: receipt.provider_id.clone(),
            status: receipt.status.as_str().to_string(),
            status_detail: receipt.status_detail.clone(),
            transaction_amount: receipt.amount,
            payment_method_id: receipt.payment_method_id.clone(),
            installments: receipt.installments,
        }
    }
}

/// `402` body of `/pay/card` and `/pay/rental` when the provider declines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDeclinedResponse {
    pub error: String,
    pub status: String,
    pub status_detail: Option<String>,
}

impl From<&Rejection> for CardDeclinedResponse {
    fn from(rejection: &Rejection) -> Self {
        Self {
            error: rejection.message.clone(),
            status: "rejected".to_string(),
            status_detail: rejection.status_detail.clone(),
        }
    }
}

/// Error body of the card endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

/// `201` body of `/pay/yape`, for accepted and declined charges alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YapePaymentResponse {
    pub id: String,
    pub status: String,
    pub detail: Option<String>,
    pub message: String,
}

impl From<&PaymentReceipt> for YapePaymentResponse {
    fn from(receipt: &PaymentReceipt) -> Self {
        let message = match receipt.status {
            cine_core::payment::PaymentStatus::Approved => "Payment approved",
            cine_core::payment::PaymentStatus::Pending
            | cine_core::payment::PaymentStatus::InProcess => "Payment is being processed",
            cine_core::payment::PaymentStatus::Rejected => "Payment rejected",
        };
        Self {
            id: receipt.provider_id.clone(),
            status: receipt.status.as_str().to_string(),
            detail: receipt.status_detail.clone(),
            message: message.to_string(),
        }
    }
}

impl From<&Rejection> for YapePaymentResponse {
    fn from(rejection: &Rejection) -> Self {
        Self {
            id: rejection.provider_id.clone(),
            status: "rejected".to_string(),
            detail: rejection.status_detail.clone(),
            message: rejection.message.clone(),
        }
    }
}

/// Error body of `/pay/yape`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YapeErrorResponse {
    pub error_message: String,
}

/// `GET /entitlements/{user_id}/{movie_id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitledResponse {
    pub entitled: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accept a JSON string or number; payment bricks send issuer ids and phones
/// as either.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}
