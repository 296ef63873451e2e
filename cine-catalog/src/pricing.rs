use cine_core::money::Currency;
use cine_core::payment::InstrumentKind;
use cine_core::{CoreError, CoreResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::movie::MovieListing;

/// Smallest chargeable amount (one cent), used when no usable price is configured.
fn price_floor() -> Decimal {
    Decimal::new(1, 2)
}

/// How a movie is unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingKind {
    FixedPrice,
    MandatoryDonation,
    VoluntaryDonation,
    Free,
}

impl PricingKind {
    /// Parse the catalog's payment-type tag. Case, `_`, `-` and spaces are
    /// ignored. A missing or unrecognised tag resolves to `Free`.
    pub fn from_tag(tag: Option<&str>) -> Self {
        let Some(tag) = tag else {
            return PricingKind::Free;
        };

        let normalized: String = tag
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "fixedprice" | "preciofijo" | "rental" => PricingKind::FixedPrice,
            "mandatorydonation" | "donacionobligatoria" => PricingKind::MandatoryDonation,
            "voluntarydonation" | "donacionvoluntaria" => PricingKind::VoluntaryDonation,
            _ => PricingKind::Free,
        }
    }

    pub fn accepted_instruments(&self) -> &'static [InstrumentKind] {
        match self {
            PricingKind::FixedPrice
            | PricingKind::MandatoryDonation
            | PricingKind::VoluntaryDonation => &[InstrumentKind::Card, InstrumentKind::YapeOtp],
            PricingKind::Free => &[],
        }
    }
}

/// Derived pricing rule for one movie. For donations `amount` is a minimum,
/// for a fixed price it is the exact price, for free content it is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    pub kind: PricingKind,
    pub amount: Decimal,
    pub currency: Currency,
}

impl PricingPolicy {
    pub fn free(currency: Currency) -> Self {
        Self {
            kind: PricingKind::Free,
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn requires_payment(&self) -> bool {
        self.kind != PricingKind::Free
    }

    pub fn minimum_amount(&self) -> Decimal {
        match self.kind {
            PricingKind::Free => Decimal::ZERO,
            _ => self.amount,
        }
    }

    pub fn accepts(&self, instrument: InstrumentKind) -> bool {
        self.kind.accepted_instruments().contains(&instrument)
    }

    /// Exact decimal check of a requested charge against this policy.
    pub fn check_amount(&self, amount: Decimal) -> CoreResult<()> {
        if !self.requires_payment() {
            return Err(CoreError::validation(
                "transaction_amount",
                "content is free and cannot be charged",
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(CoreError::validation(
                "transaction_amount",
                "amount must be greater than zero",
            ));
        }
        if amount < self.minimum_amount() {
            return Err(CoreError::validation(
                "transaction_amount",
                format!(
                    "amount {} is below the minimum of {} {}",
                    amount,
                    self.minimum_amount(),
                    self.currency
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub currency: Currency,

    /// Used for fixed-price movies whose listing carries no usable price
    pub default_fixed_price: Decimal,

    /// Floor for donations, and the minimum for general donations
    pub minimum_donation: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: Currency::Pen,
            default_fixed_price: Decimal::new(1000, 2),
            minimum_donation: Decimal::new(100, 2),
        }
    }
}

/// Pricing Policy Resolver
#[derive(Clone)]
pub struct PricingResolver {
    config: PricingConfig,
}

impl PricingResolver {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Resolve a policy from a payment-type tag and the listing's price.
    pub fn resolve(
        &self,
        tag: Option<&str>,
        price: Option<Decimal>,
        currency: Option<Currency>,
    ) -> PricingPolicy {
        let kind = PricingKind::from_tag(tag);
        let currency = currency.unwrap_or(self.config.currency);

        let fallback = match kind {
            PricingKind::Free => return PricingPolicy::free(currency),
            PricingKind::FixedPrice => self.config.default_fixed_price,
            PricingKind::MandatoryDonation | PricingKind::VoluntaryDonation => {
                self.config.minimum_donation
            }
        };

        let amount = [price.unwrap_or(Decimal::ZERO), fallback]
            .into_iter()
            .map(|candidate| candidate.round_dp(2))
            .find(|candidate| *candidate > Decimal::ZERO)
            .unwrap_or_else(price_floor);

        PricingPolicy {
            kind,
            amount,
            currency,
        }
    }

    pub fn resolve_listing(&self, listing: &MovieListing) -> PricingPolicy {
        self.resolve(listing.payment_type.as_deref(), listing.price, listing.currency)
    }

    /// Policy for a donation not tied to any movie.
    pub fn general_donation(&self) -> PricingPolicy {
        self.resolve(Some("voluntary_donation"), None, None)
    }
}

impl Default for PricingResolver {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}
