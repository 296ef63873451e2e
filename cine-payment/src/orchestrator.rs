use std::sync::Arc;
use std::time::Duration;

use cine_catalog::{MovieCatalog, PricingConfig, PricingKind, PricingPolicy, PricingResolver};
use cine_core::coordination::{InFlightGuard, LeaseToken, ReconciliationOutbox};
use cine_core::idempotency::IdempotencyKey;
use cine_core::money::Currency;
use cine_core::payment::{
    ChargeRequest, InstrumentKind, Payer, PaymentProviderClient, PaymentStatus, ProviderError,
    ProviderToken,
};
use cine_core::repository::{Entitlement, EntitlementRepository, NewEntitlement};
use cine_core::{CoreError, CoreResult, ValidationErrors};
use cine_shared::ReconciliationEntry;
use rust_decimal::Decimal;
use tracing::Instrument;

use crate::adapters::{Adapters, RawCredentials};
use crate::entitlement::EntitlementRecorder;
use crate::request::{CredentialSource, PaymentFlow, PaymentInstrument, PaymentRequest};
use crate::validation;

pub const GENERIC_DECLINE_MESSAGE: &str =
    "The payment was declined. Please try again with another payment method.";

/// Shown when the provider could not be reached or answered garbage.
pub const RETRY_MESSAGE: &str =
    "We could not complete the payment right now. Please try again in a few minutes.";

/// Lifecycle of one payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Received,
    Validated,
    Tokenized,
    Charged,
    Approved,
    Pending,
    InProcess,
    Rejected,
    Entitled,
}

impl AttemptState {
    pub fn can_advance_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Validated, Tokenized)
                | (Tokenized, Charged)
                | (Charged, Approved)
                | (Charged, Pending)
                | (Charged, InProcess)
                | (Charged, Rejected)
                | (Approved, Entitled)
                | (Pending, Entitled)
        )
    }
}

impl From<PaymentStatus> for AttemptState {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Approved => AttemptState::Approved,
            PaymentStatus::Pending => AttemptState::Pending,
            PaymentStatus::InProcess => AttemptState::InProcess,
            PaymentStatus::Rejected => AttemptState::Rejected,
        }
    }
}

struct Attempt {
    key: IdempotencyKey,
    state: AttemptState,
}

impl Attempt {
    fn new(key: IdempotencyKey) -> Self {
        Self {
            key,
            state: AttemptState::Received,
        }
    }

    fn advance(&mut self, next: AttemptState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid payment transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!("Payment attempt {}: {:?} -> {:?}", self.key, self.state, next);
        self.state = next;
    }
}

#[derive(Debug, Clone)]
pub enum EntitlementOutcome {
    Recorded(Entitlement),
    /// The write failed after the charge went through; queued for reconciliation.
    Deferred { reason: String },
    /// No user/movie to unlock, or the status grants no access yet.
    NotApplicable,
}

/// Result of a charge the provider accepted (approved, pending or in process).
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub provider_id: String,
    pub status: PaymentStatus,
    pub status_detail: Option<String>,
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_method_id: String,
    pub installments: u32,
    pub idempotency_key: IdempotencyKey,
    pub final_state: AttemptState,
    pub entitlement: EntitlementOutcome,
}

/// The provider declined the charge.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub provider_id: String,
    pub status_detail: Option<String>,
    /// The provider's reason verbatim, or a generic decline message.
    pub message: String,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    Completed(PaymentReceipt),
    Rejected(Rejection),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Upper bound on the provider charge call
    pub charge_timeout: Duration,
    /// Lease length for the per (user, movie) guard; zero disables it
    pub in_flight_ttl: Duration,
    pub default_country_code: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            charge_timeout: Duration::from_secs(5),
            in_flight_ttl: Duration::from_secs(60),
            default_country_code: "PE".to_string(),
        }
    }
}

/// Holds the `(user, movie)` lease for one attempt. Released explicitly once
/// the attempt settles; if the attempt unwinds first, `Drop` hands the
/// release to the runtime.
struct Lease {
    guard: Arc<dyn InFlightGuard>,
    user_id: String,
    movie_id: String,
    token: LeaseToken,
    released: bool,
}

impl Lease {
    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self
            .guard
            .release(&self.user_id, &self.movie_id, &self.token)
            .await
        {
            tracing::warn!(
                "Failed to release payment lease for {}/{}: {}",
                self.user_id,
                self.movie_id,
                e
            );
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let guard = self.guard.clone();
        let user_id = std::mem::take(&mut self.user_id);
        let movie_id = std::mem::take(&mut self.movie_id);
        let token = self.token.clone();
        runtime.spawn(async move {
            if let Err(e) = guard.release(&user_id, &movie_id, &token).await {
                tracing::warn!("Failed to release payment lease for {}/{}: {}", user_id, movie_id, e);
            }
        });
    }
}

/// Takes a normalised payment request through validation, tokenization,
/// charge and entitlement recording.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    provider: Arc<dyn PaymentProviderClient>,
    adapters: Adapters,
    catalog: Arc<dyn MovieCatalog>,
    pricing: PricingResolver,
    recorder: EntitlementRecorder,
    guard: Option<Arc<dyn InFlightGuard>>,
    outbox: Option<Arc<dyn ReconciliationOutbox>>,
    settings: OrchestratorSettings,
}

impl PaymentOrchestrator {
    pub fn new(
        provider: Arc<dyn PaymentProviderClient>,
        catalog: Arc<dyn MovieCatalog>,
        repository: Arc<dyn EntitlementRepository>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            adapters: Adapters::for_provider(provider.clone()),
            provider,
            catalog,
            pricing: PricingResolver::new(pricing),
            recorder: EntitlementRecorder::new(repository),
            guard: None,
            outbox: None,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_in_flight_guard(mut self, guard: Arc<dyn InFlightGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_outbox(mut self, outbox: Arc<dyn ReconciliationOutbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn with_adapters(mut self, adapters: Adapters) -> Self {
        self.adapters = adapters;
        self
    }

    /// The injected provider client, for the card form's auxiliary lookups.
    pub fn provider(&self) -> &Arc<dyn PaymentProviderClient> {
        &self.provider
    }

    pub fn adapters(&self) -> &Adapters {
        &self.adapters
    }

    /// Resolve the pricing policy for a movie, or the general donation policy.
    pub async fn policy_for(&self, movie_id: Option<&str>) -> CoreResult<PricingPolicy> {
        let Some(movie_id) = movie_id else {
            return Ok(self.pricing.general_donation());
        };
        validation::check_movie_id(movie_id).map_err(|e| CoreError::validation("movieId", e))?;

        match self.catalog.find_listing(movie_id).await {
            Ok(Some(listing)) => Ok(self.pricing.resolve_listing(&listing)),
            Ok(None) => Err(CoreError::validation(
                "movieId",
                format!("unknown movie {}", movie_id),
            )),
            Err(e) => {
                tracing::error!("Catalog lookup for movie {} failed: {}", movie_id, e);
                Err(CoreError::CatalogUnavailable(e.to_string()))
            }
        }
    }

    pub async fn has_entitlement(&self, user_id: &str, movie_id: &str) -> CoreResult<bool> {
        self.recorder.has_access(user_id, movie_id).await
    }

    pub async fn entitlements_for(&self, user_id: &str) -> CoreResult<Vec<Entitlement>> {
        self.recorder.list_for_user(user_id).await
    }

    /// Run one payment attempt end to end.
    ///
    /// Validation and provider failures abort with an error and never touch
    /// the entitlement store. A failed entitlement write after an accepted
    /// charge does not fail the attempt; it is logged and sent to the outbox.
    ///
    /// Once validation passes, the rest of the attempt runs on its own task:
    /// dropping the returned future does not stop a charge from being
    /// recorded or its lease from being released.
    pub async fn process(
        &self,
        mut request: PaymentRequest,
        flow: PaymentFlow,
    ) -> CoreResult<PaymentOutcome> {
        let instrument = request.instrument.kind();
        let key = request
            .idempotency_key
            .take()
            .unwrap_or_else(|| IdempotencyKey::generate(instrument));

        let span = tracing::info_span!(
            "payment_attempt",
            idempotency_key = %key,
            instrument = ?instrument,
            flow = ?flow
        );
        self.run_attempt(request, flow, key).instrument(span).await
    }

    async fn run_attempt(
        &self,
        request: PaymentRequest,
        flow: PaymentFlow,
        key: IdempotencyKey,
    ) -> CoreResult<PaymentOutcome> {
        let mut attempt = Attempt::new(key);
        tracing::info!(
            "Payment attempt received: amount={} movie={:?}",
            request.amount,
            request.movie_id
        );

        let policy = self.policy_for(request.movie_id.as_deref()).await?;
        self.validate(&request, &policy, flow)?;
        attempt.advance(AttemptState::Validated);

        let settlement = self.clone();
        let task = tokio::spawn(
            async move { settlement.settle(request, policy, attempt).await }.in_current_span(),
        );
        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Payment attempt task ended abnormally: {}", e);
                Err(CoreError::PersistenceError(format!(
                    "payment attempt ended abnormally: {}",
                    e
                )))
            }
        }
    }

    async fn settle(
        &self,
        request: PaymentRequest,
        policy: PricingPolicy,
        mut attempt: Attempt,
    ) -> CoreResult<PaymentOutcome> {
        let lease = self.acquire_lease(&request).await?;
        let result = self.charge_and_record(request, &policy, &mut attempt).await;
        if let Some(lease) = lease {
            lease.release().await;
        }
        result
    }

    fn validate(
        &self,
        request: &PaymentRequest,
        policy: &PricingPolicy,
        flow: PaymentFlow,
    ) -> CoreResult<()> {
        let mut errors = ValidationErrors::new();
        let instrument = request.instrument.kind();

        if let Err(e) = validation::check_email(&request.payer_email) {
            errors.push("payer.email", e);
        }

        if flow == PaymentFlow::Rental {
            if request.user_id.is_none() {
                errors.push("userId", "a rental needs a signed-in user");
            }
            match request.movie_id {
                None => errors.push("movieId", "a rental needs a movie"),
                Some(_) if policy.kind != PricingKind::FixedPrice => {
                    errors.push("movieId", "this movie is not offered for rental")
                }
                Some(_) if request.amount > policy.amount => errors.push(
                    "transaction_amount",
                    format!("rental price is {} {}", policy.amount, policy.currency),
                ),
                Some(_) => {}
            }
        }

        match policy.check_amount(request.amount) {
            Ok(()) => {}
            Err(CoreError::ValidationError(e)) => errors.extend(e),
            Err(other) => return Err(other),
        }
        if request.amount.normalize().scale() > 2 {
            errors.push("transaction_amount", "amount must have at most two decimals");
        }
        if policy.requires_payment() && !policy.accepts(instrument) {
            errors.push(
                "payment_method_id",
                format!("{:?} is not accepted for this content", instrument),
            );
        }

        if let Some(currency) = request.currency {
            if currency != policy.currency {
                errors.push(
                    "currency",
                    format!("expected {}, got {}", policy.currency, currency),
                );
            }
        }
        if request.installments == 0 {
            errors.push("installments", "installments must be at least 1");
        }

        match instrument {
            InstrumentKind::Card => {
                if request.payment_method_id.trim().is_empty() {
                    errors.push("payment_method_id", "payment method is required");
                }
                match request.effective_identification() {
                    Some(id) if !id.id_type.trim().is_empty() && !id.number.trim().is_empty() => {}
                    _ => errors.push(
                        "payer.identification",
                        "identification type and number are required for card payments",
                    ),
                }
            }
            InstrumentKind::YapeOtp => {
                if request.payment_method_id != "yape" {
                    errors.push("payment_method_id", "payment method must be \"yape\"");
                }
                if request.installments > 1 {
                    errors.push("installments", "Yape payments are single-installment");
                }
                if policy.currency != Currency::Pen {
                    errors.push("currency", "Yape only settles in PEN");
                }
            }
        }

        match &request.instrument {
            PaymentInstrument::Card(CredentialSource::Token(token))
            | PaymentInstrument::YapeOtp(CredentialSource::Token(token)) => {
                if token.as_str().trim().is_empty() {
                    errors.push("token", "token is required");
                }
            }
            _ => {
                if let Some(raw) = request.instrument.raw_credentials() {
                    if let Err(e) = self.adapters.for_instrument(instrument).validate(&raw) {
                        errors.extend(e);
                    }
                }
            }
        }

        if !errors.is_empty() {
            tracing::info!("Payment attempt rejected by validation: {}", errors);
        }
        errors.into_result()
    }

    async fn acquire_lease(&self, request: &PaymentRequest) -> CoreResult<Option<Lease>> {
        let (Some(guard), Some(user_id), Some(movie_id)) =
            (&self.guard, &request.user_id, &request.movie_id)
        else {
            return Ok(None);
        };
        if self.settings.in_flight_ttl.is_zero() {
            return Ok(None);
        }

        match guard
            .try_acquire(user_id, movie_id, self.settings.in_flight_ttl)
            .await
        {
            Ok(Some(token)) => Ok(Some(Lease {
                guard: guard.clone(),
                user_id: user_id.clone(),
                movie_id: movie_id.clone(),
                token,
                released: false,
            })),
            Ok(None) => {
                tracing::warn!(
                    "Concurrent payment attempt for user {} movie {} refused",
                    user_id,
                    movie_id
                );
                Err(CoreError::Conflict(format!(
                    "a payment for movie {} is already in progress",
                    movie_id
                )))
            }
            Err(e) => {
                tracing::warn!("In-flight guard unavailable, continuing without lease: {}", e);
                Ok(None)
            }
        }
    }

    async fn obtain_token(&self, instrument: PaymentInstrument) -> CoreResult<ProviderToken> {
        match instrument {
            PaymentInstrument::Card(CredentialSource::Token(token))
            | PaymentInstrument::YapeOtp(CredentialSource::Token(token)) => Ok(token),
            PaymentInstrument::Card(CredentialSource::Raw(input)) => {
                self.adapters.card.tokenize(RawCredentials::Card(input)).await
            }
            PaymentInstrument::YapeOtp(CredentialSource::Raw(input)) => {
                self.adapters.yape.tokenize(RawCredentials::Yape(input)).await
            }
        }
    }

    async fn charge_and_record(
        &self,
        request: PaymentRequest,
        policy: &PricingPolicy,
        attempt: &mut Attempt,
    ) -> CoreResult<PaymentOutcome> {
        let instrument = request.instrument.kind();
        let identification = match instrument {
            InstrumentKind::Card => request.effective_identification().cloned(),
            InstrumentKind::YapeOtp => None,
        };
        let phone = request.effective_phone();
        let PaymentRequest {
            instrument: source,
            payer_email,
            amount,
            movie_id,
            user_id,
            description,
            payment_method_id,
            installments,
            issuer_id,
            country_code,
            ..
        } = request;

        let token = self.obtain_token(source).await?;
        attempt.advance(AttemptState::Tokenized);

        let charge = ChargeRequest {
            token,
            amount,
            currency: policy.currency,
            payment_method_id: payment_method_id.clone(),
            installments,
            issuer_id,
            payer: Payer {
                email: payer_email.trim().to_string(),
                identification,
            },
            description: description.unwrap_or_else(|| default_description(policy, movie_id.as_deref())),
            external_reference: movie_id.clone(),
            idempotency_key: attempt.key.clone(),
        };

        let payment = match tokio::time::timeout(
            self.settings.charge_timeout,
            self.provider.charge(charge),
        )
        .await
        {
            Ok(Ok(payment)) => payment,
            Ok(Err(e)) => {
                tracing::error!("Charge failed at provider: {}", e);
                return Err(CoreError::ProviderError(e));
            }
            Err(_) => {
                let millis = self.settings.charge_timeout.as_millis() as u64;
                tracing::error!("Charge timed out after {} ms", millis);
                return Err(CoreError::ProviderError(ProviderError::Timeout(millis)));
            }
        };
        attempt.advance(AttemptState::Charged);

        if payment.provider_id.trim().is_empty() {
            return Err(CoreError::ProviderError(ProviderError::Decode(
                "charge response carried no payment id".to_string(),
            )));
        }

        let status = payment.interpreted_status();
        attempt.advance(status.into());
        tracing::info!(
            "Provider answered {} ({:?}) for payment {}",
            payment.status,
            payment.status_detail,
            payment.provider_id
        );

        if status == PaymentStatus::Rejected {
            let message = payment
                .status_detail
                .clone()
                .filter(|detail| !detail.trim().is_empty())
                .unwrap_or_else(|| GENERIC_DECLINE_MESSAGE.to_string());
            return Ok(PaymentOutcome::Rejected(Rejection {
                provider_id: payment.provider_id,
                status_detail: payment.status_detail,
                message,
                idempotency_key: attempt.key.clone(),
            }));
        }

        let entitlement = match (status.grants_entitlement(), user_id, movie_id) {
            (true, Some(user_id), Some(movie_id)) => {
                let entitlement = NewEntitlement {
                    user_id,
                    movie_id,
                    transaction_id: payment.provider_id.clone(),
                    amount,
                    phone,
                    country_code: country_code
                        .unwrap_or_else(|| self.settings.default_country_code.clone()),
                };
                self.grant(entitlement, attempt).await
            }
            (true, None, Some(movie_id)) => {
                tracing::warn!(
                    "Payment {} for movie {} has no user; no entitlement recorded",
                    payment.provider_id,
                    movie_id
                );
                EntitlementOutcome::NotApplicable
            }
            _ => EntitlementOutcome::NotApplicable,
        };

        Ok(PaymentOutcome::Completed(PaymentReceipt {
            provider_id: payment.provider_id,
            status,
            status_detail: payment.status_detail,
            amount,
            currency: policy.currency,
            payment_method_id: payment.payment_method_id.unwrap_or(payment_method_id),
            installments: payment.installments.unwrap_or(installments),
            idempotency_key: attempt.key.clone(),
            final_state: attempt.state,
            entitlement,
        }))
    }

    async fn grant(&self, entitlement: NewEntitlement, attempt: &mut Attempt) -> EntitlementOutcome {
        match self.recorder.record(entitlement.clone()).await {
            Ok(stored) => {
                attempt.advance(AttemptState::Entitled);
                EntitlementOutcome::Recorded(stored)
            }
            Err(e) => {
                tracing::error!(
                    "Entitlement write failed after accepted charge {}: {}",
                    entitlement.transaction_id,
                    e
                );
                let reason = e.to_string();
                self.enqueue_reconciliation(&entitlement, &reason).await;
                EntitlementOutcome::Deferred { reason }
            }
        }
    }

    async fn enqueue_reconciliation(&self, entitlement: &NewEntitlement, reason: &str) {
        let Some(outbox) = &self.outbox else {
            tracing::error!(
                "No reconciliation outbox configured; transaction {} needs manual reconciliation",
                entitlement.transaction_id
            );
            return;
        };

        let entry = ReconciliationEntry::new(
            entitlement.transaction_id.clone(),
            entitlement.user_id.clone(),
            entitlement.movie_id.clone(),
            entitlement.amount,
            entitlement.phone.clone(),
            entitlement.country_code.clone(),
            reason,
        );
        match outbox.enqueue(entry).await {
            Ok(()) => tracing::warn!(
                "Transaction {} queued for entitlement reconciliation",
                entitlement.transaction_id
            ),
            Err(e) => tracing::error!(
                "Failed to queue reconciliation for transaction {}: {}",
                entitlement.transaction_id,
                e
            ),
        }
    }
}

fn default_description(policy: &PricingPolicy, movie_id: Option<&str>) -> String {
    let label = match policy.kind {
        PricingKind::FixedPrice => "Rental",
        PricingKind::MandatoryDonation | PricingKind::VoluntaryDonation => "Donation",
        PricingKind::Free => "Payment",
    };
    match movie_id {
        Some(movie_id) => format!("{} for movie {}", label, movie_id),
        None => label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_transitions() {
        use AttemptState::*;
        assert!(Received.can_advance_to(Validated));
        assert!(Charged.can_advance_to(InProcess));
        assert!(Approved.can_advance_to(Entitled));
        assert!(Pending.can_advance_to(Entitled));

        assert!(!Received.can_advance_to(Charged));
        assert!(!Rejected.can_advance_to(Entitled));
        assert!(!InProcess.can_advance_to(Entitled));
        assert!(!Entitled.can_advance_to(Approved));
    }

    #[test]
    fn test_status_maps_to_state() {
        assert_eq!(AttemptState::from(PaymentStatus::Pending), AttemptState::Pending);
        assert_eq!(
            AttemptState::from(PaymentStatus::from_provider("weird_status")),
            AttemptState::Rejected
        );
    }

    #[test]
    fn test_default_description() {
        let policy = cine_catalog::PricingResolver::default().resolve(Some("FixedPrice"), None, None);
        assert_eq!(default_description(&policy, Some("550")), "Rental for movie 550");
    }
}
