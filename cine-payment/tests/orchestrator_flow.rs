use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cine_catalog::{InMemoryCatalog, MovieListing, PricingConfig};
use cine_core::coordination::ReconciliationOutbox;
use cine_core::idempotency::IdempotencyKey;
use cine_core::money::Currency;
use cine_core::payment::{Identification, PaymentStatus};
use cine_core::repository::{Entitlement, EntitlementRepository, NewEntitlement};
use cine_core::{CoreError, CoreResult, ProviderError};
use cine_payment::adapters::{CardInput, YapeInput};
use cine_payment::mock::MockPaymentProvider;
use cine_payment::orchestrator::{AttemptState, GENERIC_DECLINE_MESSAGE};
use cine_payment::request::CredentialSource;
use cine_payment::{
    EntitlementOutcome, OrchestratorSettings, PaymentFlow, PaymentInstrument, PaymentOrchestrator,
    PaymentOutcome, PaymentReceipt, PaymentRequest,
};
use cine_shared::Masked;
use cine_store::{InMemoryEntitlementRepository, InMemoryInFlightGuard, InMemoryOutbox};
use rust_decimal_macros::dec;

struct Harness {
    provider: Arc<MockPaymentProvider>,
    repo: Arc<InMemoryEntitlementRepository>,
    outbox: Arc<InMemoryOutbox>,
    orchestrator: PaymentOrchestrator,
}

fn catalog() -> InMemoryCatalog {
    let mut usd = MovieListing::new("m-usd", Some("FixedPrice"), Some(dec!(4.99)));
    usd.currency = Some(Currency::Usd);
    InMemoryCatalog::with_listings([
        MovieListing::new("m-1", Some("FixedPrice"), Some(dec!(10.00))),
        MovieListing::new("m-don", Some("mandatory_donation"), Some(dec!(10.00))),
        MovieListing::new("m-vol", Some("VoluntaryDonation"), None),
        MovieListing::new("m-free", Some("Free"), None),
        usd,
    ])
}

fn harness(provider: MockPaymentProvider) -> Harness {
    harness_with(provider, OrchestratorSettings::default())
}

fn harness_with(provider: MockPaymentProvider, settings: OrchestratorSettings) -> Harness {
    let provider = Arc::new(provider);
    let repo = Arc::new(InMemoryEntitlementRepository::new());
    let outbox = Arc::new(InMemoryOutbox::new());
    let orchestrator = PaymentOrchestrator::new(
        provider.clone(),
        Arc::new(catalog()),
        repo.clone(),
        PricingConfig::default(),
    )
    .with_settings(settings)
    .with_in_flight_guard(Arc::new(InMemoryInFlightGuard::new()))
    .with_outbox(outbox.clone());

    Harness {
        provider,
        repo,
        outbox,
        orchestrator,
    }
}

fn raw_card() -> PaymentInstrument {
    PaymentInstrument::Card(CredentialSource::Raw(CardInput {
        card_number: Masked::new("4509 9535 6623 3704".to_string()),
        expiry_month: "11".to_string(),
        expiry_year: "30".to_string(),
        cvv: Masked::new("123".to_string()),
        cardholder_name: Some("APRO".to_string()),
        identification: Identification {
            id_type: "DNI".to_string(),
            number: "12345678".to_string(),
        },
    }))
}

fn card_request(amount: rust_decimal::Decimal, movie: &str) -> PaymentRequest {
    PaymentRequest::new(raw_card(), "ana@example.com", amount)
        .for_movie("user-1", movie)
        .with_payment_method("visa")
}

fn yape_request(phone: &str, otp: &str, amount: rust_decimal::Decimal) -> PaymentRequest {
    PaymentRequest::new(
        PaymentInstrument::YapeOtp(CredentialSource::Raw(YapeInput::new(phone, otp))),
        "ana@example.com",
        amount,
    )
    .for_movie("user-1", "m-don")
}

fn completed(outcome: PaymentOutcome) -> PaymentReceipt {
    match outcome {
        PaymentOutcome::Completed(receipt) => receipt,
        other => panic!("expected a completed payment, got {other:?}"),
    }
}

fn validation_fields(err: CoreError) -> Vec<String> {
    match err {
        CoreError::ValidationError(errors) => {
            errors.fields().iter().map(|e| e.field.clone()).collect()
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_approved_card_rental_records_entitlement() {
    let h = harness(MockPaymentProvider::approving().with_provider_id("tx_1"));

    let outcome = h
        .orchestrator
        .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
        .await
        .unwrap();

    let receipt = completed(outcome);
    assert_eq!(receipt.status, PaymentStatus::Approved);
    assert_eq!(receipt.provider_id, "tx_1");
    assert_eq!(receipt.final_state, AttemptState::Entitled);

    let stored = h.repo.find_by_transaction("tx_1").await.unwrap();
    assert_eq!(stored.user_id, "user-1");
    assert_eq!(stored.movie_id, "m-1");
    assert_eq!(stored.amount, dec!(10.00));
    assert_eq!(stored.country_code, "PE");
    assert!(matches!(receipt.entitlement, EntitlementOutcome::Recorded(_)));
    assert!(h.orchestrator.has_entitlement("user-1", "m-1").await.unwrap());
}

#[tokio::test]
async fn test_malformed_yape_phone_never_reaches_provider() {
    let h = harness(MockPaymentProvider::approving());

    let err = h
        .orchestrator
        .process(yape_request("12345", "123456", dec!(10.00)), PaymentFlow::Donation)
        .await
        .unwrap_err();

    assert!(validation_fields(err).contains(&"phone".to_string()));
    assert_eq!(h.provider.tokenize_calls(), 0);
    assert_eq!(h.provider.charge_calls(), 0);
}

#[tokio::test]
async fn test_amount_below_minimum_is_rejected_without_charge() {
    let h = harness(MockPaymentProvider::approving());

    let err = h
        .orchestrator
        .process(card_request(dec!(5.00), "m-don"), PaymentFlow::Donation)
        .await
        .unwrap_err();

    assert_eq!(validation_fields(err), vec!["transaction_amount".to_string()]);
    assert_eq!(h.provider.tokenize_calls(), 0);
    assert_eq!(h.provider.charge_calls(), 0);
    assert!(h.repo.is_empty().await);
}

#[tokio::test]
async fn test_amount_one_cent_short_is_rejected() {
    let h = harness(MockPaymentProvider::approving());

    let result = h
        .orchestrator
        .process(card_request(dec!(9.99), "m-1"), PaymentFlow::Rental)
        .await;

    assert!(matches!(result, Err(CoreError::ValidationError(_))));
}

#[tokio::test]
async fn test_charge_timeout_surfaces_provider_error() {
    let settings = OrchestratorSettings {
        charge_timeout: Duration::from_millis(50),
        ..OrchestratorSettings::default()
    };
    let h = harness_with(
        MockPaymentProvider::approving().with_charge_delay(Duration::from_millis(500)),
        settings,
    );

    let err = h
        .orchestrator
        .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ProviderError(ProviderError::Timeout(50))));
    assert!(h.repo.is_empty().await);
    assert!(h.outbox.pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_provider_failure_records_nothing() {
    let h = harness(MockPaymentProvider::approving().failing_charge(ProviderError::Unavailable));

    let err = h
        .orchestrator
        .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ProviderError(ProviderError::Unavailable)));
    assert!(h.repo.is_empty().await);
}

#[tokio::test]
async fn test_pending_yape_donation_grants_access() {
    let h = harness(MockPaymentProvider::with_status("pending").with_provider_id("tx_p"));

    let receipt = completed(
        h.orchestrator
            .process(yape_request("987654321", "123456", dec!(15.00)), PaymentFlow::Donation)
            .await
            .unwrap(),
    );

    assert_eq!(receipt.status, PaymentStatus::Pending);
    let stored = h.repo.find_by_transaction("tx_p").await.unwrap();
    assert_eq!(stored.amount, dec!(15.00));
    assert_eq!(stored.phone.as_deref(), Some("987654321"));
}

#[tokio::test]
async fn test_in_process_records_nothing() {
    let h = harness(MockPaymentProvider::with_status("in_process"));

    let receipt = completed(
        h.orchestrator
            .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
            .await
            .unwrap(),
    );

    assert_eq!(receipt.status, PaymentStatus::InProcess);
    assert_eq!(receipt.final_state, AttemptState::InProcess);
    assert!(matches!(receipt.entitlement, EntitlementOutcome::NotApplicable));
    assert!(h.repo.is_empty().await);
}

#[tokio::test]
async fn test_rejection_carries_provider_detail() {
    let h = harness(MockPaymentProvider::rejecting("cc_rejected_insufficient_amount"));

    let outcome = h
        .orchestrator
        .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
        .await
        .unwrap();

    match outcome {
        PaymentOutcome::Rejected(rejection) => {
            assert_eq!(rejection.message, "cc_rejected_insufficient_amount");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(h.repo.is_empty().await);
}

#[tokio::test]
async fn test_unknown_status_is_treated_as_rejected() {
    let h = harness(MockPaymentProvider::with_status("weird_status"));

    let outcome = h
        .orchestrator
        .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
        .await
        .unwrap();

    match outcome {
        PaymentOutcome::Rejected(rejection) => {
            assert_eq!(rejection.message, GENERIC_DECLINE_MESSAGE);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(h.repo.is_empty().await);
}

#[tokio::test]
async fn test_each_attempt_gets_a_fresh_key() {
    let h = harness(MockPaymentProvider::approving());

    for _ in 0..3 {
        h.orchestrator
            .process(card_request(dec!(12.00), "m-vol"), PaymentFlow::Donation)
            .await
            .unwrap();
    }

    let keys: HashSet<String> = h.provider.charged_keys().into_iter().collect();
    assert_eq!(keys.len(), 3);
    assert_eq!(h.provider.distinct_charges(), 3);
    assert!(keys.iter().all(|k| k.starts_with("card_")));
}

#[tokio::test]
async fn test_retry_with_same_key_is_charged_once() {
    let h = harness(MockPaymentProvider::approving());
    let key = IdempotencyKey::from_client("client-retry-1").unwrap();

    for _ in 0..2 {
        let mut request = card_request(dec!(10.00), "m-1");
        request.idempotency_key = Some(key.clone());
        h.orchestrator
            .process(request, PaymentFlow::Rental)
            .await
            .unwrap();
    }

    assert_eq!(h.provider.charge_calls(), 2);
    assert_eq!(h.provider.distinct_charges(), 1);
    assert_eq!(h.repo.len().await, 1);
}

#[tokio::test]
async fn test_failed_entitlement_write_still_returns_approval() {
    let h = harness(MockPaymentProvider::approving().with_provider_id("tx_9"));
    h.repo.set_unavailable(true);

    let receipt = completed(
        h.orchestrator
            .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
            .await
            .unwrap(),
    );

    assert_eq!(receipt.status, PaymentStatus::Approved);
    assert!(matches!(receipt.entitlement, EntitlementOutcome::Deferred { .. }));

    let pending = h.outbox.pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].transaction_id, "tx_9");
    assert_eq!(pending[0].movie_id, "m-1");
}

#[tokio::test]
async fn test_concurrent_attempt_for_same_movie_conflicts() {
    let h = harness(MockPaymentProvider::approving().with_charge_delay(Duration::from_millis(100)));

    let (first, second) = tokio::join!(
        h.orchestrator
            .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental),
        h.orchestrator
            .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(CoreError::Conflict(_))));
    assert_eq!(h.provider.charge_calls(), 1);

    // Lease is gone once the first attempt finishes.
    let third = h
        .orchestrator
        .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
        .await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn test_free_movie_cannot_be_charged() {
    let h = harness(MockPaymentProvider::approving());

    let result = h
        .orchestrator
        .process(card_request(dec!(10.00), "m-free"), PaymentFlow::Donation)
        .await;

    assert!(matches!(result, Err(CoreError::ValidationError(_))));
    assert_eq!(h.provider.charge_calls(), 0);
}

#[tokio::test]
async fn test_rental_of_donation_title_is_refused() {
    let h = harness(MockPaymentProvider::approving());

    let err = h
        .orchestrator
        .process(card_request(dec!(10.00), "m-don"), PaymentFlow::Rental)
        .await
        .unwrap_err();

    assert!(validation_fields(err).contains(&"movieId".to_string()));
}

#[tokio::test]
async fn test_general_donation_records_no_entitlement() {
    let h = harness(MockPaymentProvider::approving());
    let request = PaymentRequest::new(raw_card(), "ana@example.com", dec!(3.00))
        .with_payment_method("visa");

    let receipt = completed(
        h.orchestrator
            .process(request, PaymentFlow::Donation)
            .await
            .unwrap(),
    );

    assert!(matches!(receipt.entitlement, EntitlementOutcome::NotApplicable));
    assert_eq!(receipt.currency, Currency::Pen);
    assert!(h.repo.is_empty().await);
}

#[tokio::test]
async fn test_unknown_movie_is_a_validation_error() {
    let h = harness(MockPaymentProvider::approving());

    let err = h
        .orchestrator
        .process(card_request(dec!(10.00), "nope"), PaymentFlow::Donation)
        .await
        .unwrap_err();

    assert_eq!(validation_fields(err), vec!["movieId".to_string()]);
}

#[tokio::test]
async fn test_yape_only_settles_in_soles() {
    let h = harness(MockPaymentProvider::approving());
    let request = PaymentRequest::new(
        PaymentInstrument::yape_token("yape_tok_1"),
        "ana@example.com",
        dec!(4.99),
    )
    .for_movie("user-1", "m-usd");

    let err = h
        .orchestrator
        .process(request, PaymentFlow::Donation)
        .await
        .unwrap_err();

    assert!(validation_fields(err).contains(&"currency".to_string()));
    assert_eq!(h.provider.charge_calls(), 0);
}

#[tokio::test]
async fn test_card_token_without_identification_is_rejected() {
    let h = harness(MockPaymentProvider::approving());
    let request = PaymentRequest::new(
        PaymentInstrument::card_token("card_tok_1"),
        "ana@example.com",
        dec!(10.00),
    )
    .for_movie("user-1", "m-1")
    .with_payment_method("visa");

    let err = h
        .orchestrator
        .process(request, PaymentFlow::Rental)
        .await
        .unwrap_err();

    assert!(validation_fields(err).contains(&"payer.identification".to_string()));
}

/// Entitlement store whose writes take a while to land.
struct SlowRepository {
    inner: InMemoryEntitlementRepository,
    write_delay: Duration,
}

#[async_trait]
impl EntitlementRepository for SlowRepository {
    async fn upsert(&self, entitlement: &NewEntitlement) -> CoreResult<Entitlement> {
        tokio::time::sleep(self.write_delay).await;
        self.inner.upsert(entitlement).await
    }

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<Entitlement>> {
        self.inner.list_for_user(user_id).await
    }

    async fn exists_for(&self, user_id: &str, movie_id: &str) -> CoreResult<bool> {
        self.inner.exists_for(user_id, movie_id).await
    }
}

#[tokio::test]
async fn test_caller_going_away_mid_write_still_settles_attempt() {
    let provider = Arc::new(MockPaymentProvider::approving());
    let outbox = Arc::new(InMemoryOutbox::new());
    let orchestrator = PaymentOrchestrator::new(
        provider.clone(),
        Arc::new(catalog()),
        Arc::new(SlowRepository {
            inner: InMemoryEntitlementRepository::new(),
            write_delay: Duration::from_millis(200),
        }),
        PricingConfig::default(),
    )
    .with_in_flight_guard(Arc::new(InMemoryInFlightGuard::new()))
    .with_outbox(outbox.clone());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(provider.distinct_charges(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(orchestrator.has_entitlement("user-1", "m-1").await.unwrap());
    assert!(outbox.pending(10).await.unwrap().is_empty());

    // The lease went with the settled attempt.
    let retry = orchestrator
        .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
        .await;
    assert!(retry.is_ok());
}

#[tokio::test]
async fn test_lapsed_attempt_does_not_free_newer_lease() {
    let h = harness_with(
        MockPaymentProvider::approving().with_charge_delay(Duration::from_millis(500)),
        OrchestratorSettings {
            in_flight_ttl: Duration::from_millis(300),
            ..OrchestratorSettings::default()
        },
    );
    let orchestrator = Arc::new(h.orchestrator);
    let start = |orchestrator: &Arc<PaymentOrchestrator>| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
                .await
        })
    };

    let first = start(&orchestrator);
    // First lease lapses at 300 ms; its charge answers at 500 ms.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let second = start(&orchestrator);

    first.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second lease is held until 700 ms.
    let third = orchestrator
        .process(card_request(dec!(10.00), "m-1"), PaymentFlow::Rental)
        .await;
    assert!(matches!(third, Err(CoreError::Conflict(_))));

    second.await.unwrap().unwrap();
    assert_eq!(h.provider.charge_calls(), 2);
}

#[tokio::test]
async fn test_movie_id_with_reserved_characters_is_refused() {
    let h = harness(MockPaymentProvider::approving());

    for movie in ["m-1?x=1", "m-1/../m-don", "m-1#top"] {
        let err = h
            .orchestrator
            .process(card_request(dec!(10.00), movie), PaymentFlow::Rental)
            .await
            .unwrap_err();
        assert_eq!(validation_fields(err), vec!["movieId".to_string()]);
    }
    assert_eq!(h.provider.charge_calls(), 0);
}
