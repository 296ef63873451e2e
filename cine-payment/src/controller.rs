//! Checkout controllers: the logic behind the card donation, Yape donation
//! and rental forms, independent of any rendering.
//!
//! A controller checks the form locally, tokenizes through an adapter, posts
//! the token to the orchestrator endpoint and turns the reply into something
//! the form can show. One submission at a time per controller instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cine_catalog::PricingPolicy;
use cine_core::payment::{PaymentStatus, ProviderToken};
use cine_core::{CoreError, CoreResult, ValidationErrors};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::adapters::{CardInput, PaymentMethodAdapter, RawCredentials, YapeInput};
use crate::orchestrator::{PaymentOrchestrator, PaymentOutcome, RETRY_MESSAGE};
use crate::request::PaymentFlow;
use crate::validation;
use crate::wire::{
    CardDeclinedResponse, CardPaymentBody, CardPaymentResponse, EntitledResponse, ErrorResponse,
    PayerBody, YapeErrorResponse, YapePaymentBody, YapePaymentResponse,
};

const REVIEW_FIELDS_MESSAGE: &str = "Please review the highlighted fields.";

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("could not reach the payment service: {0}")]
    Network(String),
    #[error("payment service answered HTTP {status}: {message}")]
    Server { status: u16, message: String },
    #[error("unreadable payment service response: {0}")]
    Decode(String),
}

/// What the orchestrator endpoint said about one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointReply {
    Accepted {
        payment_id: String,
        status: PaymentStatus,
        status_detail: Option<String>,
    },
    Declined {
        message: String,
        status_detail: Option<String>,
    },
    Invalid {
        message: String,
        field_errors: ValidationErrors,
    },
    /// Another attempt for the same movie is still running.
    InProgress { message: String },
    Unavailable { message: String },
}

impl EndpointReply {
    /// Map an orchestrator result the way the HTTP layer does.
    pub fn from_result(result: CoreResult<PaymentOutcome>) -> Self {
        match result {
            Ok(PaymentOutcome::Completed(receipt)) => EndpointReply::Accepted {
                payment_id: receipt.provider_id,
                status: receipt.status,
                status_detail: receipt.status_detail,
            },
            Ok(PaymentOutcome::Rejected(rejection)) => EndpointReply::Declined {
                message: rejection.message,
                status_detail: rejection.status_detail,
            },
            Err(CoreError::ValidationError(errors)) => EndpointReply::Invalid {
                message: errors.to_string(),
                field_errors: errors,
            },
            Err(CoreError::Conflict(message)) => EndpointReply::InProgress { message },
            Err(_) => EndpointReply::Unavailable {
                message: RETRY_MESSAGE.to_string(),
            },
        }
    }
}

/// The server side of a checkout form.
#[async_trait]
pub trait OrchestratorEndpoint: Send + Sync {
    /// `POST /pay/card`, or `POST /pay/rental` for the rental flow.
    async fn pay_card(
        &self,
        body: CardPaymentBody,
        flow: PaymentFlow,
    ) -> Result<EndpointReply, ControllerError>;

    async fn pay_yape(&self, body: YapePaymentBody) -> Result<EndpointReply, ControllerError>;

    async fn is_entitled(&self, user_id: &str, movie_id: &str) -> Result<bool, ControllerError>;
}

/// Talks to the API over HTTP.
pub struct HttpOrchestratorEndpoint {
    client: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

impl HttpOrchestratorEndpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ControllerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControllerError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token: None,
        })
    }

    /// Bearer token of the signed-in viewer, forwarded on every call.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<(u16, String), ControllerError> {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ControllerError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ControllerError::Network(e.to_string()))?;
        Ok((status, text))
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ControllerError> {
    serde_json::from_str(body).map_err(|e| ControllerError::Decode(e.to_string()))
}

/// Interpret a `/pay/card` or `/pay/rental` response.
pub fn parse_card_reply(status: u16, body: &str) -> Result<EndpointReply, ControllerError> {
    match status {
        200 => {
            let response: CardPaymentResponse = decode(body)?;
            Ok(EndpointReply::Accepted {
                payment_id: response.id,
                status: PaymentStatus::from_provider(&response.status),
                status_detail: response.status_detail,
            })
        }
        402 => {
            let response: CardDeclinedResponse = decode(body)?;
            Ok(EndpointReply::Declined {
                message: response.error,
                status_detail: response.status_detail,
            })
        }
        400 => {
            let response: ErrorResponse = decode(body)?;
            let mut field_errors = ValidationErrors::new();
            for e in response.details.unwrap_or_default() {
                field_errors.push(e.field, e.message);
            }
            Ok(EndpointReply::Invalid {
                message: response.error,
                field_errors,
            })
        }
        409 => {
            let response: ErrorResponse = decode(body)?;
            Ok(EndpointReply::InProgress {
                message: response.error,
            })
        }
        500..=599 => {
            let message = decode::<ErrorResponse>(body)
                .map(|r| r.error)
                .unwrap_or_else(|_| RETRY_MESSAGE.to_string());
            Ok(EndpointReply::Unavailable { message })
        }
        other => Err(ControllerError::Server {
            status: other,
            message: body.to_string(),
        }),
    }
}

/// Interpret a `/pay/yape` response.
pub fn parse_yape_reply(status: u16, body: &str) -> Result<EndpointReply, ControllerError> {
    match status {
        200 | 201 => {
            let response: YapePaymentResponse = decode(body)?;
            match PaymentStatus::from_provider(&response.status) {
                PaymentStatus::Rejected => Ok(EndpointReply::Declined {
                    message: response.message,
                    status_detail: response.detail,
                }),
                accepted => Ok(EndpointReply::Accepted {
                    payment_id: response.id,
                    status: accepted,
                    status_detail: response.detail,
                }),
            }
        }
        400 => {
            let response: YapeErrorResponse = decode(body)?;
            Ok(EndpointReply::Invalid {
                message: response.error_message,
                field_errors: ValidationErrors::new(),
            })
        }
        409 => {
            let response: YapeErrorResponse = decode(body)?;
            Ok(EndpointReply::InProgress {
                message: response.error_message,
            })
        }
        500..=599 => {
            let message = decode::<YapeErrorResponse>(body)
                .map(|r| r.error_message)
                .unwrap_or_else(|_| RETRY_MESSAGE.to_string());
            Ok(EndpointReply::Unavailable { message })
        }
        other => Err(ControllerError::Server {
            status: other,
            message: body.to_string(),
        }),
    }
}

#[async_trait]
impl OrchestratorEndpoint for HttpOrchestratorEndpoint {
    async fn pay_card(
        &self,
        body: CardPaymentBody,
        flow: PaymentFlow,
    ) -> Result<EndpointReply, ControllerError> {
        let path = match flow {
            PaymentFlow::Donation => "/pay/card",
            PaymentFlow::Rental => "/pay/rental",
        };
        let (status, text) = self.post(path, &body).await?;
        parse_card_reply(status, &text)
    }

    async fn pay_yape(&self, body: YapePaymentBody) -> Result<EndpointReply, ControllerError> {
        let (status, text) = self.post("/pay/yape", &body).await?;
        parse_yape_reply(status, &text)
    }

    async fn is_entitled(&self, user_id: &str, movie_id: &str) -> Result<bool, ControllerError> {
        let request = self
            .client
            .get(format!("{}/entitlements/{}/{}", self.base_url, user_id, movie_id));
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ControllerError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::Server {
                status: status.as_u16(),
                message: status.to_string(),
            });
        }
        let body: EntitledResponse = response
            .json()
            .await
            .map_err(|e| ControllerError::Decode(e.to_string()))?;
        Ok(body.entitled)
    }
}

/// Calls the orchestrator directly, with no HTTP in between.
pub struct InProcessEndpoint {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl InProcessEndpoint {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl OrchestratorEndpoint for InProcessEndpoint {
    async fn pay_card(
        &self,
        body: CardPaymentBody,
        flow: PaymentFlow,
    ) -> Result<EndpointReply, ControllerError> {
        let result = self.orchestrator.process(body.into_request(), flow).await;
        Ok(EndpointReply::from_result(result))
    }

    async fn pay_yape(&self, body: YapePaymentBody) -> Result<EndpointReply, ControllerError> {
        let result = self
            .orchestrator
            .process(body.into_request(), PaymentFlow::Donation)
            .await;
        Ok(EndpointReply::from_result(result))
    }

    async fn is_entitled(&self, user_id: &str, movie_id: &str) -> Result<bool, ControllerError> {
        self.orchestrator
            .has_entitlement(user_id, movie_id)
            .await
            .map_err(|e| ControllerError::Server {
                status: 500,
                message: e.to_string(),
            })
    }
}

/// Who is paying and for what.
#[derive(Debug, Clone, Default)]
pub struct CheckoutContext {
    pub payer_email: String,
    pub movie_id: Option<String>,
    pub user_id: Option<String>,
}

/// Card form fields other than the amount.
#[derive(Debug, Clone)]
pub struct CardForm {
    pub card: CardInput,
    pub payment_method_id: String,
    pub installments: u32,
    pub issuer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedPayment {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub status_detail: Option<String>,
    /// Playback access as re-read after the payment.
    pub entitled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerOutcome {
    /// The form closes. `payment` is `None` when nothing had to be paid.
    Completed { payment: Option<AcceptedPayment> },
    /// The form stays open showing `message` and any field errors.
    Failed {
        message: String,
        field_errors: ValidationErrors,
    },
    /// A submission from this form is already running.
    Busy,
}

impl ControllerOutcome {
    fn failed(message: impl Into<String>) -> Self {
        ControllerOutcome::Failed {
            message: message.into(),
            field_errors: ValidationErrors::new(),
        }
    }

    fn invalid(field_errors: ValidationErrors) -> Self {
        ControllerOutcome::Failed {
            message: REVIEW_FIELDS_MESSAGE.to_string(),
            field_errors,
        }
    }
}

/// Held while a submission runs; clears the busy flag on drop.
struct SubmitPermit<'a>(&'a AtomicBool);

impl Drop for SubmitPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Checkout {
    endpoint: Arc<dyn OrchestratorEndpoint>,
    adapter: Arc<dyn PaymentMethodAdapter>,
    policy: PricingPolicy,
    context: CheckoutContext,
    submitting: AtomicBool,
}

impl Checkout {
    fn new(
        endpoint: Arc<dyn OrchestratorEndpoint>,
        adapter: Arc<dyn PaymentMethodAdapter>,
        policy: PricingPolicy,
        context: CheckoutContext,
    ) -> Self {
        Self {
            endpoint,
            adapter,
            policy,
            context,
            submitting: AtomicBool::new(false),
        }
    }

    fn try_begin(&self) -> Option<SubmitPermit<'_>> {
        self.submitting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SubmitPermit(&self.submitting))
    }

    fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::Acquire)
    }

    /// Same format rules the server applies, reported per field.
    fn check_form(&self, amount: Decimal, credentials: &RawCredentials) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validation::check_email(&self.context.payer_email) {
            errors.push("payer.email", e);
        }
        if let Err(CoreError::ValidationError(e)) = self.policy.check_amount(amount) {
            errors.extend(e);
        }
        if let Err(e) = self.adapter.validate(credentials) {
            errors.extend(e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    async fn tokenize(
        &self,
        amount: Decimal,
        credentials: RawCredentials,
    ) -> Result<ProviderToken, ControllerOutcome> {
        self.check_form(amount, &credentials)
            .map_err(ControllerOutcome::invalid)?;

        self.adapter
            .tokenize(credentials)
            .await
            .map_err(|e| match e {
                CoreError::ValidationError(errors) => ControllerOutcome::invalid(errors),
                other => {
                    tracing::warn!("Tokenization failed in checkout: {}", other);
                    ControllerOutcome::failed(RETRY_MESSAGE)
                }
            })
    }

    async fn finish(&self, reply: Result<EndpointReply, ControllerError>) -> ControllerOutcome {
        match reply {
            Ok(EndpointReply::Accepted {
                payment_id,
                status,
                status_detail,
            }) => {
                let entitled = self.refresh_entitlement().await;
                ControllerOutcome::Completed {
                    payment: Some(AcceptedPayment {
                        payment_id,
                        status,
                        status_detail,
                        entitled,
                    }),
                }
            }
            Ok(EndpointReply::Declined { message, .. }) => ControllerOutcome::failed(message),
            Ok(EndpointReply::Invalid {
                message,
                field_errors,
            }) => ControllerOutcome::Failed {
                message,
                field_errors,
            },
            Ok(EndpointReply::InProgress { message }) | Ok(EndpointReply::Unavailable { message }) => {
                ControllerOutcome::failed(message)
            }
            Err(e) => {
                tracing::warn!("Payment endpoint call failed: {}", e);
                ControllerOutcome::failed(RETRY_MESSAGE)
            }
        }
    }

    async fn refresh_entitlement(&self) -> bool {
        let (Some(user_id), Some(movie_id)) = (&self.context.user_id, &self.context.movie_id) else {
            return false;
        };
        match self.endpoint.is_entitled(user_id, movie_id).await {
            Ok(entitled) => entitled,
            Err(e) => {
                tracing::warn!("Could not refresh entitlement for movie {}: {}", movie_id, e);
                false
            }
        }
    }

    async fn submit_card(&self, amount: Decimal, form: CardForm, flow: PaymentFlow) -> ControllerOutcome {
        let Some(_permit) = self.try_begin() else {
            return ControllerOutcome::Busy;
        };
        if !self.policy.requires_payment() {
            return ControllerOutcome::Completed { payment: None };
        }

        let identification = form.card.identification.clone();
        let token = match self.tokenize(amount, RawCredentials::Card(form.card)).await {
            Ok(token) => token,
            Err(outcome) => return outcome,
        };

        let body = CardPaymentBody {
            token: token.into_inner(),
            transaction_amount: amount,
            payment_method_id: form.payment_method_id,
            payer: PayerBody {
                email: self.context.payer_email.trim().to_string(),
                identification: Some(identification),
            },
            installments: Some(form.installments),
            issuer_id: form.issuer_id,
            movie_id: self.context.movie_id.clone(),
            user_id: self.context.user_id.clone(),
            description: None,
            phone: None,
            country_code: None,
            currency: Some(self.policy.currency),
        };
        self.finish(self.endpoint.pay_card(body, flow).await).await
    }

    async fn submit_yape(&self, amount: Decimal, input: YapeInput) -> ControllerOutcome {
        let Some(_permit) = self.try_begin() else {
            return ControllerOutcome::Busy;
        };
        if !self.policy.requires_payment() {
            return ControllerOutcome::Completed { payment: None };
        }

        let phone = input.phone.expose().trim().to_string();
        let token = match self.tokenize(amount, RawCredentials::Yape(input)).await {
            Ok(token) => token,
            Err(outcome) => return outcome,
        };

        let body = YapePaymentBody {
            token: token.into_inner(),
            transaction_amount: amount,
            payment_method_id: "yape".to_string(),
            payer: PayerBody {
                email: self.context.payer_email.trim().to_string(),
                identification: None,
            },
            description: None,
            installments: Some(1),
            movie_id: self.context.movie_id.clone(),
            user_id: self.context.user_id.clone(),
            phone: Some(phone),
        };
        self.finish(self.endpoint.pay_yape(body).await).await
    }
}

/// Card donation modal: the payer picks the amount.
pub struct CardDonationController {
    checkout: Checkout,
}

impl CardDonationController {
    pub fn new(
        endpoint: Arc<dyn OrchestratorEndpoint>,
        adapter: Arc<dyn PaymentMethodAdapter>,
        policy: PricingPolicy,
        context: CheckoutContext,
    ) -> Self {
        Self {
            checkout: Checkout::new(endpoint, adapter, policy, context),
        }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.checkout.policy
    }

    pub fn is_submitting(&self) -> bool {
        self.checkout.is_submitting()
    }

    pub async fn submit(&self, amount: Decimal, form: CardForm) -> ControllerOutcome {
        self.checkout
            .submit_card(amount, form, PaymentFlow::Donation)
            .await
    }
}

/// Yape donation modal.
pub struct YapeDonationController {
    checkout: Checkout,
}

impl YapeDonationController {
    pub fn new(
        endpoint: Arc<dyn OrchestratorEndpoint>,
        adapter: Arc<dyn PaymentMethodAdapter>,
        policy: PricingPolicy,
        context: CheckoutContext,
    ) -> Self {
        Self {
            checkout: Checkout::new(endpoint, adapter, policy, context),
        }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.checkout.policy
    }

    pub fn is_submitting(&self) -> bool {
        self.checkout.is_submitting()
    }

    pub async fn submit(&self, amount: Decimal, input: YapeInput) -> ControllerOutcome {
        self.checkout.submit_yape(amount, input).await
    }
}

/// Rental checkout: always charges the policy's fixed price by card.
pub struct RentalController {
    checkout: Checkout,
}

impl RentalController {
    pub fn new(
        endpoint: Arc<dyn OrchestratorEndpoint>,
        adapter: Arc<dyn PaymentMethodAdapter>,
        policy: PricingPolicy,
        context: CheckoutContext,
    ) -> Self {
        Self {
            checkout: Checkout::new(endpoint, adapter, policy, context),
        }
    }

    pub fn price(&self) -> Decimal {
        self.checkout.policy.amount
    }

    pub fn is_submitting(&self) -> bool {
        self.checkout.is_submitting()
    }

    pub async fn submit(&self, form: CardForm) -> ControllerOutcome {
        let price = self.price();
        self.checkout
            .submit_card(price, form, PaymentFlow::Rental)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{CardAdapter, YapeAdapter};
    use crate::mock::MockPaymentProvider;
    use cine_catalog::PricingResolver;
    use cine_core::payment::Identification;
    use cine_shared::Masked;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct ScriptedEndpoint {
        reply: EndpointReply,
        entitled: bool,
        calls: AtomicUsize,
        hold: Option<Arc<Notify>>,
    }

    impl ScriptedEndpoint {
        fn new(reply: EndpointReply) -> Self {
            Self {
                reply,
                entitled: true,
                calls: AtomicUsize::new(0),
                hold: None,
            }
        }

        fn approving() -> Self {
            Self::new(EndpointReply::Accepted {
                payment_id: "tx_1".to_string(),
                status: PaymentStatus::Approved,
                status_detail: Some("accredited".to_string()),
            })
        }

        fn held_by(mut self, notify: Arc<Notify>) -> Self {
            self.hold = Some(notify);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn answer(&self) -> Result<EndpointReply, ControllerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            Ok(self.reply.clone())
        }
    }

    #[async_trait]
    impl OrchestratorEndpoint for ScriptedEndpoint {
        async fn pay_card(
            &self,
            _body: CardPaymentBody,
            _flow: PaymentFlow,
        ) -> Result<EndpointReply, ControllerError> {
            self.answer().await
        }

        async fn pay_yape(&self, _body: YapePaymentBody) -> Result<EndpointReply, ControllerError> {
            self.answer().await
        }

        async fn is_entitled(&self, _user_id: &str, _movie_id: &str) -> Result<bool, ControllerError> {
            Ok(self.entitled)
        }
    }

    fn context() -> CheckoutContext {
        CheckoutContext {
            payer_email: "ana@example.com".to_string(),
            movie_id: Some("550".to_string()),
            user_id: Some("user-1".to_string()),
        }
    }

    fn card_form(number: &str) -> CardForm {
        CardForm {
            card: CardInput {
                card_number: Masked::new(number.to_string()),
                expiry_month: "11".to_string(),
                expiry_year: "99".to_string(),
                cvv: Masked::new("123".to_string()),
                cardholder_name: Some("APRO".to_string()),
                identification: Identification {
                    id_type: "DNI".to_string(),
                    number: "12345678".to_string(),
                },
            },
            payment_method_id: "visa".to_string(),
            installments: 1,
            issuer_id: None,
        }
    }

    fn rental_policy() -> PricingPolicy {
        PricingResolver::default().resolve(Some("FixedPrice"), Some(dec!(10.00)), None)
    }

    #[tokio::test]
    async fn test_free_content_never_reaches_the_server() {
        let provider = Arc::new(MockPaymentProvider::approving());
        let endpoint = Arc::new(ScriptedEndpoint::approving());
        let policy = PricingResolver::default().resolve(Some("Free"), None, None);
        let controller = CardDonationController::new(
            endpoint.clone(),
            Arc::new(CardAdapter::new(provider.clone())),
            policy,
            context(),
        );

        let outcome = controller.submit(dec!(5.00), card_form("4509953566233704")).await;

        assert_eq!(outcome, ControllerOutcome::Completed { payment: None });
        assert_eq!(endpoint.calls(), 0);
        assert_eq!(provider.tokenize_calls(), 0);
    }

    #[tokio::test]
    async fn test_amount_below_price_is_a_field_error() {
        let provider = Arc::new(MockPaymentProvider::approving());
        let endpoint = Arc::new(ScriptedEndpoint::approving());
        let controller = CardDonationController::new(
            endpoint.clone(),
            Arc::new(CardAdapter::new(provider.clone())),
            rental_policy(),
            context(),
        );

        let outcome = controller.submit(dec!(5.00), card_form("4509953566233704")).await;

        match outcome {
            ControllerOutcome::Failed { field_errors, .. } => {
                assert!(field_errors.contains_field("transaction_amount"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(provider.tokenize_calls(), 0);
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_yape_phone_stays_local() {
        let provider = Arc::new(MockPaymentProvider::approving());
        let endpoint = Arc::new(ScriptedEndpoint::approving());
        let controller = YapeDonationController::new(
            endpoint.clone(),
            Arc::new(YapeAdapter::new(provider.clone())),
            rental_policy(),
            context(),
        );

        let outcome = controller
            .submit(dec!(10.00), YapeInput::new("12345", "123456"))
            .await;

        assert!(matches!(
            outcome,
            ControllerOutcome::Failed { ref field_errors, .. } if field_errors.contains_field("phone")
        ));
        assert_eq!(provider.tokenize_calls(), 0);
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_rental_completes_and_refreshes_entitlement() {
        let provider = Arc::new(MockPaymentProvider::approving());
        let endpoint = Arc::new(ScriptedEndpoint::approving());
        let controller = RentalController::new(
            endpoint.clone(),
            Arc::new(CardAdapter::new(provider.clone())),
            rental_policy(),
            context(),
        );

        let outcome = controller.submit(card_form("4509 9535 6623 3704")).await;

        match outcome {
            ControllerOutcome::Completed { payment: Some(payment) } => {
                assert_eq!(payment.payment_id, "tx_1");
                assert_eq!(payment.status, PaymentStatus::Approved);
                assert!(payment.entitled);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(provider.tokenize_calls(), 1);
        assert!(!controller.is_submitting());
    }

    #[tokio::test]
    async fn test_decline_keeps_form_open_with_provider_message() {
        let endpoint = Arc::new(ScriptedEndpoint::new(EndpointReply::Declined {
            message: "cc_rejected_insufficient_amount".to_string(),
            status_detail: Some("cc_rejected_insufficient_amount".to_string()),
        }));
        let controller = CardDonationController::new(
            endpoint,
            Arc::new(CardAdapter::new(Arc::new(MockPaymentProvider::approving()))),
            rental_policy(),
            context(),
        );

        let outcome = controller.submit(dec!(10.00), card_form("4509953566233704")).await;

        assert_eq!(
            outcome,
            ControllerOutcome::Failed {
                message: "cc_rejected_insufficient_amount".to_string(),
                field_errors: ValidationErrors::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_second_submit_while_running_is_busy() {
        let notify = Arc::new(Notify::new());
        let endpoint = Arc::new(ScriptedEndpoint::approving().held_by(notify.clone()));
        let controller = CardDonationController::new(
            endpoint.clone(),
            Arc::new(CardAdapter::new(Arc::new(MockPaymentProvider::approving()))),
            rental_policy(),
            context(),
        );

        let (first, second) = tokio::join!(
            controller.submit(dec!(10.00), card_form("4509953566233704")),
            async {
                let outcome = controller.submit(dec!(10.00), card_form("4509953566233704")).await;
                notify.notify_one();
                outcome
            }
        );

        assert!(matches!(first, ControllerOutcome::Completed { .. }));
        assert_eq!(second, ControllerOutcome::Busy);
        assert_eq!(endpoint.calls(), 1);
        assert!(!controller.is_submitting());
    }

    #[test]
    fn test_parse_card_replies() {
        let ok = parse_card_reply(
            200,
            r#"{"id":"tx_9","status":"pending","status_detail":"pending_contingency","transaction_amount":10.0,"payment_method_id":"visa","installments":1}"#,
        )
        .unwrap();
        assert!(matches!(ok, EndpointReply::Accepted { status: PaymentStatus::Pending, .. }));

        let invalid = parse_card_reply(
            400,
            r#"{"error":"Validation failed","details":[{"field":"payer.email","message":"email is required"}]}"#,
        )
        .unwrap();
        match invalid {
            EndpointReply::Invalid { field_errors, .. } => {
                assert!(field_errors.contains_field("payer.email"))
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            parse_card_reply(504, "gateway timeout").unwrap(),
            EndpointReply::Unavailable { .. }
        ));
        assert!(parse_card_reply(200, "not json").is_err());
    }

    #[test]
    fn test_parse_yape_rejected_reply() {
        let reply = parse_yape_reply(
            201,
            r#"{"id":"tx_3","status":"rejected","detail":"cc_rejected_other_reason","message":"Payment rejected"}"#,
        )
        .unwrap();
        assert_eq!(
            reply,
            EndpointReply::Declined {
                message: "Payment rejected".to_string(),
                status_detail: Some("cc_rejected_other_reason".to_string()),
            }
        );
    }
}
