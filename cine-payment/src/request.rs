use cine_core::idempotency::IdempotencyKey;
use cine_core::money::Currency;
use cine_core::payment::{Identification, InstrumentKind, ProviderToken};
use rust_decimal::Decimal;

use crate::adapters::{CardInput, RawCredentials, YapeInput};

/// Where the instrument's credentials come from: a token minted in the
/// browser, or raw fields that still need an adapter.
#[derive(Debug)]
pub enum CredentialSource<R> {
    Token(ProviderToken),
    Raw(R),
}

#[derive(Debug)]
pub enum PaymentInstrument {
    Card(CredentialSource<CardInput>),
    YapeOtp(CredentialSource<YapeInput>),
}

impl PaymentInstrument {
    pub fn card_token(token: impl Into<String>) -> Self {
        PaymentInstrument::Card(CredentialSource::Token(ProviderToken::new(token)))
    }

    pub fn yape_token(token: impl Into<String>) -> Self {
        PaymentInstrument::YapeOtp(CredentialSource::Token(ProviderToken::new(token)))
    }

    pub fn kind(&self) -> InstrumentKind {
        match self {
            PaymentInstrument::Card(_) => InstrumentKind::Card,
            PaymentInstrument::YapeOtp(_) => InstrumentKind::YapeOtp,
        }
    }

    /// Raw credentials awaiting tokenization, if any.
    pub fn raw_credentials(&self) -> Option<RawCredentials> {
        match self {
            PaymentInstrument::Card(CredentialSource::Raw(input)) => {
                Some(RawCredentials::Card(input.clone()))
            }
            PaymentInstrument::YapeOtp(CredentialSource::Raw(input)) => {
                Some(RawCredentials::Yape(input.clone()))
            }
            _ => None,
        }
    }
}

/// Which checkout flow submitted the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentFlow {
    /// Card or Yape donation modal, tied to a movie or not.
    Donation,
    /// Fixed-price rental of one movie.
    Rental,
}

/// One payment attempt as normalised by the HTTP layer.
#[derive(Debug)]
pub struct PaymentRequest {
    pub instrument: PaymentInstrument,
    pub payer_email: String,
    pub payer_identification: Option<Identification>,
    pub amount: Decimal,
    /// `None` means "the policy's currency".
    pub currency: Option<Currency>,
    pub movie_id: Option<String>,
    pub user_id: Option<String>,
    pub description: Option<String>,
    pub payment_method_id: String,
    pub installments: u32,
    pub issuer_id: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    /// Supplied by a client retrying the same attempt; otherwise minted fresh.
    pub idempotency_key: Option<IdempotencyKey>,
}

impl PaymentRequest {
    pub fn new(instrument: PaymentInstrument, payer_email: impl Into<String>, amount: Decimal) -> Self {
        let payment_method_id = match instrument.kind() {
            InstrumentKind::Card => String::new(),
            InstrumentKind::YapeOtp => "yape".to_string(),
        };
        Self {
            instrument,
            payer_email: payer_email.into(),
            payer_identification: None,
            amount,
            currency: None,
            movie_id: None,
            user_id: None,
            description: None,
            payment_method_id,
            installments: 1,
            issuer_id: None,
            phone: None,
            country_code: None,
            idempotency_key: None,
        }
    }

    pub fn for_movie(mut self, user_id: impl Into<String>, movie_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.movie_id = Some(movie_id.into());
        self
    }

    pub fn with_identification(mut self, id_type: &str, number: &str) -> Self {
        self.payer_identification = Some(Identification {
            id_type: id_type.to_string(),
            number: number.to_string(),
        });
        self
    }

    pub fn with_payment_method(mut self, payment_method_id: &str) -> Self {
        self.payment_method_id = payment_method_id.to_string();
        self
    }

    /// Identification for the card payer: explicit, or taken from raw card fields.
    pub fn effective_identification(&self) -> Option<&Identification> {
        self.payer_identification.as_ref().or(match &self.instrument {
            PaymentInstrument::Card(CredentialSource::Raw(input)) => Some(&input.identification),
            _ => None,
        })
    }

    /// Phone stored on the entitlement: explicit, or the Yape wallet phone.
    pub fn effective_phone(&self) -> Option<String> {
        self.phone.clone().or_else(|| match &self.instrument {
            PaymentInstrument::YapeOtp(CredentialSource::Raw(input)) => {
                Some(input.phone.expose().clone())
            }
            _ => None,
        })
    }
}
