use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cine_core::payment::{
    CardIssuer, ChargeRequest, IdentificationType, InstallmentOption, PaymentMethodInfo,
    PaymentProviderClient, ProviderError, ProviderPayment, ProviderToken, TokenizeRequest,
};
use rust_decimal::Decimal;

/// In-process stand-in for the payment provider.
///
/// Counts calls, answers charges with a configurable status, and
/// deduplicates charges the way the real provider does: only on an
/// identical idempotency key.
pub struct MockPaymentProvider {
    status: String,
    status_detail: Option<String>,
    provider_id: Option<String>,
    charge_delay: Option<Duration>,
    tokenize_error: Option<ProviderError>,
    charge_error: Option<ProviderError>,
    tokenize_calls: AtomicUsize,
    charge_calls: AtomicUsize,
    charges: Mutex<HashMap<String, ProviderPayment>>,
}

impl MockPaymentProvider {
    pub fn with_status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            status_detail: None,
            provider_id: None,
            charge_delay: None,
            tokenize_error: None,
            charge_error: None,
            tokenize_calls: AtomicUsize::new(0),
            charge_calls: AtomicUsize::new(0),
            charges: Mutex::new(HashMap::new()),
        }
    }

    pub fn approving() -> Self {
        Self::with_status("approved").with_status_detail("accredited")
    }

    pub fn rejecting(detail: &str) -> Self {
        Self::with_status("rejected").with_status_detail(detail)
    }

    pub fn with_status_detail(mut self, detail: &str) -> Self {
        self.status_detail = Some(detail.to_string());
        self
    }

    pub fn without_status_detail(mut self) -> Self {
        self.status_detail = None;
        self
    }

    /// Every new charge gets this id instead of `tx_<n>`.
    pub fn with_provider_id(mut self, id: &str) -> Self {
        self.provider_id = Some(id.to_string());
        self
    }

    /// Hold every charge call for `delay` before answering.
    pub fn with_charge_delay(mut self, delay: Duration) -> Self {
        self.charge_delay = Some(delay);
        self
    }

    pub fn failing_tokenize(mut self, error: ProviderError) -> Self {
        self.tokenize_error = Some(error);
        self
    }

    pub fn failing_charge(mut self, error: ProviderError) -> Self {
        self.charge_error = Some(error);
        self
    }

    pub fn tokenize_calls(&self) -> usize {
        self.tokenize_calls.load(Ordering::SeqCst)
    }

    pub fn charge_calls(&self) -> usize {
        self.charge_calls.load(Ordering::SeqCst)
    }

    /// Charges the provider would actually settle, after key deduplication.
    pub fn distinct_charges(&self) -> usize {
        self.charges.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn charged_keys(&self) -> Vec<String> {
        self.charges
            .lock()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProviderClient for MockPaymentProvider {
    async fn tokenize(&self, request: TokenizeRequest) -> Result<ProviderToken, ProviderError> {
        let n = self.tokenize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = &self.tokenize_error {
            return Err(err.clone());
        }
        let prefix = match request {
            TokenizeRequest::Card(_) => "card_tok",
            TokenizeRequest::Yape(_) => "yape_tok",
        };
        Ok(ProviderToken::new(format!("{}_{:06}", prefix, n)))
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ProviderPayment, ProviderError> {
        let n = self.charge_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.charge_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.charge_error {
            return Err(err.clone());
        }

        let mut charges = self
            .charges
            .lock()
            .map_err(|_| ProviderError::Transport("mock state poisoned".to_string()))?;

        let payment = charges
            .entry(request.idempotency_key.as_str().to_string())
            .or_insert_with(|| ProviderPayment {
                provider_id: self
                    .provider_id
                    .clone()
                    .unwrap_or_else(|| format!("tx_{}", n)),
                status: self.status.clone(),
                status_detail: self.status_detail.clone(),
                amount: request.amount,
                currency: Some(request.currency.code().to_string()),
                payment_method_id: Some(request.payment_method_id.clone()),
                installments: Some(request.installments),
            })
            .clone();

        Ok(payment)
    }

    async fn identification_types(&self) -> Result<Vec<IdentificationType>, ProviderError> {
        Ok(vec![
            IdentificationType {
                id: "DNI".to_string(),
                name: "DNI".to_string(),
                min_length: Some(8),
                max_length: Some(8),
            },
            IdentificationType {
                id: "CE".to_string(),
                name: "Carné de extranjería".to_string(),
                min_length: Some(9),
                max_length: Some(12),
            },
        ])
    }

    async fn card_issuers(&self, _bin: &str) -> Result<Vec<CardIssuer>, ProviderError> {
        Ok(vec![CardIssuer {
            id: "1045".to_string(),
            name: "Interbank".to_string(),
        }])
    }

    async fn installments(
        &self,
        amount: Decimal,
        _bin: &str,
    ) -> Result<Vec<InstallmentOption>, ProviderError> {
        Ok(vec![InstallmentOption {
            installments: 1,
            installment_amount: amount,
            total_amount: amount,
            recommended_message: Some(format!("1 cuota de S/ {}", amount)),
        }])
    }

    async fn payment_methods(&self, _bin: &str) -> Result<Vec<PaymentMethodInfo>, ProviderError> {
        Ok(vec![PaymentMethodInfo {
            id: "visa".to_string(),
            name: "Visa".to_string(),
            payment_type_id: "credit_card".to_string(),
        }])
    }
}
