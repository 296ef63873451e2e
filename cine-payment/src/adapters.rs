use std::sync::Arc;

use async_trait::async_trait;
use cine_core::payment::{
    CardDetails, Identification, InstrumentKind, PaymentProviderClient, ProviderToken,
    TokenizeRequest, YapeCredentials,
};
use cine_core::{CoreError, CoreResult, ValidationErrors};
use cine_shared::Masked;

use crate::validation;

/// Card fields as typed by the payer.
#[derive(Debug, Clone)]
pub struct CardInput {
    pub card_number: Masked<String>,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: Masked<String>,
    pub cardholder_name: Option<String>,
    pub identification: Identification,
}

/// Yape wallet phone and the one-time approval code shown in the app.
#[derive(Debug, Clone)]
pub struct YapeInput {
    pub phone: Masked<String>,
    pub otp: Masked<String>,
}

impl YapeInput {
    pub fn new(phone: impl Into<String>, otp: impl Into<String>) -> Self {
        Self {
            phone: Masked::new(phone.into()),
            otp: Masked::new(otp.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RawCredentials {
    Card(CardInput),
    Yape(YapeInput),
}

impl RawCredentials {
    pub fn instrument(&self) -> InstrumentKind {
        match self {
            RawCredentials::Card(_) => InstrumentKind::Card,
            RawCredentials::Yape(_) => InstrumentKind::YapeOtp,
        }
    }
}

/// Check card fields and build the provider tokenization payload.
pub fn validate_card(input: &CardInput) -> Result<CardDetails, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let number = validation::check_card_number(input.card_number.expose())
        .map_err(|e| errors.push("card_number", e))
        .ok();
    let expiry = validation::check_expiry(&input.expiry_month, &input.expiry_year)
        .map_err(|e| errors.push("expiry", e))
        .ok();
    if let Err(e) = validation::check_cvv(input.cvv.expose()) {
        errors.push("security_code", e);
    }
    if input.identification.id_type.trim().is_empty() {
        errors.push("identification.type", "identification type is required");
    }
    if input.identification.number.trim().is_empty() {
        errors.push("identification.number", "identification number is required");
    }

    match (number, expiry) {
        (Some(number), Some((month, year))) if errors.is_empty() => Ok(CardDetails {
            card_number: Masked::new(number),
            expiration_month: month,
            expiration_year: year,
            security_code: Masked::new(input.cvv.expose().trim().to_string()),
            cardholder_name: input.cardholder_name.clone(),
            identification: input.identification.clone(),
        }),
        _ => Err(errors),
    }
}

/// Check Yape phone and OTP formats.
pub fn validate_yape(input: &YapeInput) -> Result<YapeCredentials, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if let Err(e) = validation::check_phone(input.phone.expose()) {
        errors.push("phone", e);
    }
    if let Err(e) = validation::check_otp(input.otp.expose()) {
        errors.push("otp", e);
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(YapeCredentials {
        phone_number: input.phone.clone(),
        otp: input.otp.clone(),
    })
}

/// Turns raw payer credentials into a single-use provider token.
///
/// Formats are checked locally first; malformed input never reaches the
/// provider.
#[async_trait]
pub trait PaymentMethodAdapter: Send + Sync {
    fn instrument(&self) -> InstrumentKind;

    /// Local format check, no network.
    fn validate(&self, credentials: &RawCredentials) -> Result<TokenizeRequest, ValidationErrors>;

    async fn tokenize(&self, credentials: RawCredentials) -> CoreResult<ProviderToken>;
}

fn wrong_instrument(expected: InstrumentKind, got: InstrumentKind) -> ValidationErrors {
    ValidationErrors::single(
        "instrument",
        format!("{:?} adapter cannot tokenize {:?} credentials", expected, got),
    )
}

pub struct CardAdapter {
    provider: Arc<dyn PaymentProviderClient>,
}

impl CardAdapter {
    pub fn new(provider: Arc<dyn PaymentProviderClient>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PaymentMethodAdapter for CardAdapter {
    fn instrument(&self) -> InstrumentKind {
        InstrumentKind::Card
    }

    fn validate(&self, credentials: &RawCredentials) -> Result<TokenizeRequest, ValidationErrors> {
        match credentials {
            RawCredentials::Card(input) => validate_card(input).map(TokenizeRequest::Card),
            other => Err(wrong_instrument(self.instrument(), other.instrument())),
        }
    }

    async fn tokenize(&self, credentials: RawCredentials) -> CoreResult<ProviderToken> {
        let request = self
            .validate(&credentials)
            .map_err(CoreError::ValidationError)?;

        let token = self.provider.tokenize(request).await.map_err(|e| {
            tracing::error!("Card tokenization failed: {}", e);
            CoreError::ProviderError(e)
        })?;
        tracing::debug!("Card tokenized: {:?}", token);
        Ok(token)
    }
}

pub struct YapeAdapter {
    provider: Arc<dyn PaymentProviderClient>,
}

impl YapeAdapter {
    pub fn new(provider: Arc<dyn PaymentProviderClient>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PaymentMethodAdapter for YapeAdapter {
    fn instrument(&self) -> InstrumentKind {
        InstrumentKind::YapeOtp
    }

    fn validate(&self, credentials: &RawCredentials) -> Result<TokenizeRequest, ValidationErrors> {
        match credentials {
            RawCredentials::Yape(input) => validate_yape(input).map(TokenizeRequest::Yape),
            other => Err(wrong_instrument(self.instrument(), other.instrument())),
        }
    }

    async fn tokenize(&self, credentials: RawCredentials) -> CoreResult<ProviderToken> {
        let request = self
            .validate(&credentials)
            .map_err(CoreError::ValidationError)?;

        // The OTP is spent by this call whether or not it succeeds.
        let token = self.provider.tokenize(request).await.map_err(|e| {
            tracing::error!("Yape tokenization failed: {}", e);
            CoreError::ProviderError(e)
        })?;
        tracing::debug!("Yape OTP exchanged for token {:?}", token);
        Ok(token)
    }
}

/// One adapter per instrument, selected by the orchestrator.
#[derive(Clone)]
pub struct Adapters {
    pub card: Arc<dyn PaymentMethodAdapter>,
    pub yape: Arc<dyn PaymentMethodAdapter>,
}

impl Adapters {
    pub fn for_provider(provider: Arc<dyn PaymentProviderClient>) -> Self {
        Self {
            card: Arc::new(CardAdapter::new(provider.clone())),
            yape: Arc::new(YapeAdapter::new(provider)),
        }
    }

    pub fn for_instrument(&self, instrument: InstrumentKind) -> &Arc<dyn PaymentMethodAdapter> {
        match instrument {
            InstrumentKind::Card => &self.card,
            InstrumentKind::YapeOtp => &self.yape,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPaymentProvider;

    fn card_input(number: &str, month: &str, year: &str, cvv: &str) -> CardInput {
        CardInput {
            card_number: Masked::new(number.to_string()),
            expiry_month: month.to_string(),
            expiry_year: year.to_string(),
            cvv: Masked::new(cvv.to_string()),
            cardholder_name: Some("APRO".to_string()),
            identification: Identification {
                id_type: "DNI".to_string(),
                number: "12345678".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_card_adapter_tokenizes_valid_input() {
        let provider = Arc::new(MockPaymentProvider::approving());
        let adapter = CardAdapter::new(provider.clone());

        let token = adapter
            .tokenize(RawCredentials::Card(card_input("4509 9535 6623 3704", "11", "99", "123")))
            .await
            .unwrap();

        assert!(!token.as_str().is_empty());
        assert_eq!(provider.tokenize_calls(), 1);
    }

    #[tokio::test]
    async fn test_card_adapter_rejects_malformed_input_offline() {
        let provider = Arc::new(MockPaymentProvider::approving());
        let adapter = CardAdapter::new(provider.clone());

        let err = adapter
            .tokenize(RawCredentials::Card(card_input("4509abc", "13", "99", "12")))
            .await
            .unwrap_err();

        match err {
            CoreError::ValidationError(errors) => {
                assert!(errors.contains_field("card_number"));
                assert!(errors.contains_field("expiry"));
                assert!(errors.contains_field("security_code"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(provider.tokenize_calls(), 0);
    }

    #[tokio::test]
    async fn test_yape_adapter_rejects_short_phone_offline() {
        let provider = Arc::new(MockPaymentProvider::approving());
        let adapter = YapeAdapter::new(provider.clone());

        let err = adapter
            .tokenize(RawCredentials::Yape(YapeInput::new("12345", "123456")))
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::ValidationError(ref e) if e.contains_field("phone")));
        assert_eq!(provider.tokenize_calls(), 0);
    }

    #[tokio::test]
    async fn test_yape_adapter_surfaces_provider_failure() {
        let provider = Arc::new(MockPaymentProvider::approving().failing_tokenize(
            cine_core::ProviderError::Status {
                status: 400,
                message: "invalid otp".to_string(),
            },
        ));
        let adapter = YapeAdapter::new(provider.clone());

        let err = adapter
            .tokenize(RawCredentials::Yape(YapeInput::new("987654321", "123456")))
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::ProviderError(_)));
        assert_eq!(provider.tokenize_calls(), 1);
    }

    #[test]
    fn test_adapter_refuses_other_instrument() {
        let adapters = Adapters::for_provider(Arc::new(MockPaymentProvider::approving()));
        let result = adapters
            .for_instrument(InstrumentKind::Card)
            .validate(&RawCredentials::Yape(YapeInput::new("987654321", "123456")));
        assert!(result.is_err());
    }
}
