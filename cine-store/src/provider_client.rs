use std::time::Duration;

use async_trait::async_trait;
use cine_core::payment::{
    CardIssuer, ChargeRequest, IdentificationType, InstallmentOption, PaymentMethodInfo,
    PaymentProviderClient, ProviderError, ProviderPayment, ProviderToken, TokenizeRequest,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_config::ProviderConfig;

/// REST client for a MercadoPago-compatible payment provider.
///
/// Built once at startup and shared behind an `Arc`.
pub struct RestPaymentProvider {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    public_key: String,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    id: String,
}

#[derive(Deserialize)]
struct PaymentResponse {
    id: Value,
    status: String,
    #[serde(default)]
    status_detail: Option<String>,
    #[serde(default)]
    transaction_amount: Option<Decimal>,
    #[serde(default)]
    currency_id: Option<String>,
    #[serde(default)]
    payment_method_id: Option<String>,
    #[serde(default)]
    installments: Option<u32>,
}

#[derive(Deserialize)]
struct InstallmentPlan {
    #[serde(default)]
    payer_costs: Vec<InstallmentOption>,
}

#[derive(Deserialize)]
struct PaymentMethodSearch {
    results: Vec<PaymentMethodInfo>,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct ChargeBody<'a> {
    token: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    transaction_amount: Decimal,
    description: &'a str,
    installments: u32,
    payment_method_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    issuer_id: Option<&'a str>,
    payer: &'a cine_core::payment::Payer,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_reference: Option<&'a str>,
}

impl RestPaymentProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            public_key: config.public_key.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout_ms)
        } else {
            ProviderError::Transport(e.to_string())
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, ProviderError> {
        let response = request.send().await.map_err(|e| self.transport(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport(e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| status.to_string());
            tracing::warn!("Provider answered HTTP {}: {}", status.as_u16(), message);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        decode_body(&body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ProviderError> {
        let request = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.access_token)
            .query(query);
        self.send(request).await
    }
}

/// Strict decode: any schema mismatch is a provider error, never a default.
fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))
}

fn payment_id(id: &Value) -> Result<String, ProviderError> {
    match id {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ProviderError::Decode(format!("unusable payment id {}", other))),
    }
}

fn into_provider_payment(response: PaymentResponse, charged: Decimal) -> Result<ProviderPayment, ProviderError> {
    Ok(ProviderPayment {
        provider_id: payment_id(&response.id)?,
        status: response.status,
        status_detail: response.status_detail,
        amount: response.transaction_amount.unwrap_or(charged),
        currency: response.currency_id,
        payment_method_id: response.payment_method_id,
        installments: response.installments,
    })
}

#[async_trait]
impl PaymentProviderClient for RestPaymentProvider {
    async fn tokenize(&self, request: TokenizeRequest) -> Result<ProviderToken, ProviderError> {
        let (path, body) = match &request {
            TokenizeRequest::Card(card) => (
                "/v1/card_tokens",
                json!({
                    "card_number": card.card_number.expose(),
                    "expiration_month": card.expiration_month,
                    "expiration_year": card.expiration_year,
                    "security_code": card.security_code.expose(),
                    "cardholder": {
                        "name": card.cardholder_name,
                        "identification": card.identification,
                    },
                }),
            ),
            TokenizeRequest::Yape(yape) => (
                "/platform/pci/yape/v1/payment",
                json!({
                    "phoneNumber": yape.phone_number.expose(),
                    "otp": yape.otp.expose(),
                    "requestId": Uuid::new_v4().to_string(),
                }),
            ),
        };

        let http = self
            .client
            .post(self.url(path))
            .query(&[("public_key", self.public_key.as_str())])
            .json(&body);
        let token: TokenResponse = self.send(http).await?;

        if token.id.trim().is_empty() {
            return Err(ProviderError::Decode("empty token id".to_string()));
        }
        Ok(ProviderToken::new(token.id))
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ProviderPayment, ProviderError> {
        let body = ChargeBody {
            token: request.token.as_str(),
            transaction_amount: request.amount,
            description: &request.description,
            installments: request.installments,
            payment_method_id: &request.payment_method_id,
            issuer_id: request.issuer_id.as_deref(),
            payer: &request.payer,
            external_reference: request.external_reference.as_deref(),
        };

        let http = self
            .client
            .post(self.url("/v1/payments"))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", request.idempotency_key.as_str())
            .json(&body);
        let response: PaymentResponse = self.send(http).await?;

        into_provider_payment(response, request.amount)
    }

    async fn identification_types(&self) -> Result<Vec<IdentificationType>, ProviderError> {
        self.get("/v1/identification_types", &[]).await
    }

    async fn card_issuers(&self, bin: &str) -> Result<Vec<CardIssuer>, ProviderError> {
        self.get("/v1/payment_methods/card_issuers", &[("bin", bin.to_string())])
            .await
    }

    async fn installments(&self, amount: Decimal, bin: &str) -> Result<Vec<InstallmentOption>, ProviderError> {
        let plans: Vec<InstallmentPlan> = self
            .get(
                "/v1/payment_methods/installments",
                &[("amount", amount.to_string()), ("bin", bin.to_string())],
            )
            .await?;
        Ok(plans.into_iter().flat_map(|p| p.payer_costs).collect())
    }

    async fn payment_methods(&self, bin: &str) -> Result<Vec<PaymentMethodInfo>, ProviderError> {
        let search: PaymentMethodSearch = self
            .get(
                "/v1/payment_methods/search",
                &[("bin", bin.to_string()), ("marketplace", "NONE".to_string())],
            )
            .await?;
        Ok(search.results)
    }
}
