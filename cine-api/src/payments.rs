use std::str::FromStr;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use cine_core::idempotency::IdempotencyKey;
use cine_core::identity::SessionUser;
use cine_core::payment::{CardIssuer, IdentificationType, InstallmentOption, PaymentMethodInfo};
use cine_payment::wire::{
    CardDeclinedResponse, CardPaymentBody, CardPaymentResponse, YapePaymentBody,
    YapePaymentResponse,
};
use cine_payment::{PaymentFlow, PaymentOutcome, PaymentRequest};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{AppError, YapeError};
use crate::state::AppState;

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/pay/card", post(pay_card))
        .route("/pay/rental", post(pay_rental))
        .route("/pay/yape", post(pay_yape))
        .route("/pay/identification-types", get(identification_types))
        .route("/pay/issuers", get(card_issuers))
        .route("/pay/installments", get(installments))
        .route("/pay/payment-methods", get(payment_methods))
}

// ============================================================================
// Request helpers
// ============================================================================

/// A retrying client resends its attempt key; a malformed one is refused
/// rather than silently replaced.
fn idempotency_key(headers: &HeaderMap) -> Result<Option<IdempotencyKey>, AppError> {
    let Some(value) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(IdempotencyKey::from_client)
        .map(Some)
        .ok_or_else(|| AppError::BadRequest("Invalid X-Idempotency-Key header".to_string()))
}

/// The session subject wins over any `userId` in the body.
fn apply_session(request: &mut PaymentRequest, session: Option<&SessionUser>) {
    let Some(user) = session else {
        return;
    };

    if let Some(claimed) = request.user_id.as_deref() {
        if claimed != user.user_id {
            tracing::warn!(
                "Body userId {} replaced by session subject {}",
                claimed,
                user.user_id
            );
        }
    }
    request.user_id = Some(user.user_id.clone());

    if request.payer_email.trim().is_empty() {
        if let Some(email) = &user.email {
            request.payer_email = email.clone();
        }
    }
}

fn prepare(
    mut request: PaymentRequest,
    headers: &HeaderMap,
    session: Option<Extension<SessionUser>>,
) -> Result<PaymentRequest, AppError> {
    request.idempotency_key = idempotency_key(headers)?;
    apply_session(&mut request, session.as_ref().map(|Extension(user)| user));
    Ok(request)
}

fn bad_body(rejection: JsonRejection) -> AppError {
    tracing::debug!("Unreadable payment body: {}", rejection);
    AppError::BadRequest(rejection.body_text())
}

// ============================================================================
// Card and rental
// ============================================================================

pub async fn pay_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Option<Extension<SessionUser>>,
    body: Result<Json<CardPaymentBody>, JsonRejection>,
) -> Result<Response, AppError> {
    charge_card(state, headers, session, body, PaymentFlow::Donation).await
}

pub async fn pay_rental(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Option<Extension<SessionUser>>,
    body: Result<Json<CardPaymentBody>, JsonRejection>,
) -> Result<Response, AppError> {
    charge_card(state, headers, session, body, PaymentFlow::Rental).await
}

async fn charge_card(
    state: AppState,
    headers: HeaderMap,
    session: Option<Extension<SessionUser>>,
    body: Result<Json<CardPaymentBody>, JsonRejection>,
    flow: PaymentFlow,
) -> Result<Response, AppError> {
    let Json(body) = body.map_err(bad_body)?;
    let request = prepare(body.into_request(), &headers, session)?;

    match state.orchestrator.process(request, flow).await? {
        PaymentOutcome::Completed(receipt) => {
            Ok((StatusCode::OK, Json(CardPaymentResponse::from(&receipt))).into_response())
        }
        PaymentOutcome::Rejected(rejection) => Ok((
            StatusCode::PAYMENT_REQUIRED,
            Json(CardDeclinedResponse::from(&rejection)),
        )
            .into_response()),
    }
}

// ============================================================================
// Yape
// ============================================================================

/// Accepted and declined charges both answer 201; the body's `status` tells
/// them apart.
pub async fn pay_yape(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Option<Extension<SessionUser>>,
    body: Result<Json<YapePaymentBody>, JsonRejection>,
) -> Result<(StatusCode, Json<YapePaymentResponse>), YapeError> {
    let Json(body) = body.map_err(bad_body)?;
    let request = prepare(body.into_request(), &headers, session)?;

    let response = match state
        .orchestrator
        .process(request, PaymentFlow::Donation)
        .await?
    {
        PaymentOutcome::Completed(receipt) => YapePaymentResponse::from(&receipt),
        PaymentOutcome::Rejected(rejection) => YapePaymentResponse::from(&rejection),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

// ============================================================================
// Card form lookups
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BinQuery {
    pub bin: String,
}

#[derive(Debug, Deserialize)]
pub struct InstallmentsQuery {
    pub amount: String,
    pub bin: String,
}

fn check_bin(bin: &str) -> Result<&str, AppError> {
    let bin = bin.trim();
    if bin.len() < 6 || !bin.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::BadRequest(
            "bin must be at least 6 digits".to_string(),
        ));
    }
    Ok(bin)
}

pub async fn identification_types(
    State(state): State<AppState>,
) -> Result<Json<Vec<IdentificationType>>, AppError> {
    let types = state.orchestrator.provider().identification_types().await?;
    Ok(Json(types))
}

pub async fn card_issuers(
    State(state): State<AppState>,
    Query(query): Query<BinQuery>,
) -> Result<Json<Vec<CardIssuer>>, AppError> {
    let bin = check_bin(&query.bin)?;
    let issuers = state.orchestrator.provider().card_issuers(bin).await?;
    Ok(Json(issuers))
}

pub async fn installments(
    State(state): State<AppState>,
    Query(query): Query<InstallmentsQuery>,
) -> Result<Json<Vec<InstallmentOption>>, AppError> {
    let bin = check_bin(&query.bin)?;
    let amount = Decimal::from_str(query.amount.trim())
        .ok()
        .filter(|amount| *amount > Decimal::ZERO)
        .ok_or_else(|| AppError::BadRequest("amount must be a positive number".to_string()))?;

    let options = state.orchestrator.provider().installments(amount, bin).await?;
    Ok(Json(options))
}

pub async fn payment_methods(
    State(state): State<AppState>,
    Query(query): Query<BinQuery>,
) -> Result<Json<Vec<PaymentMethodInfo>>, AppError> {
    let bin = check_bin(&query.bin)?;
    let methods = state.orchestrator.provider().payment_methods(bin).await?;
    Ok(Json(methods))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use cine_payment::PaymentInstrument;
    use rust_decimal_macros::dec;

    fn request() -> PaymentRequest {
        PaymentRequest::new(PaymentInstrument::card_token("tok"), "", dec!(10))
    }

    #[test]
    fn test_missing_idempotency_header_is_fine() {
        assert_eq!(idempotency_key(&HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn test_malformed_idempotency_header_is_refused() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_static("has spaces"));
        assert!(matches!(idempotency_key(&headers), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_session_subject_overrides_body_user() {
        let mut req = request();
        req.user_id = Some("someone-else".to_string());
        let user = SessionUser::new("u-1").with_email("u1@example.com");

        apply_session(&mut req, Some(&user));

        assert_eq!(req.user_id.as_deref(), Some("u-1"));
        assert_eq!(req.payer_email, "u1@example.com");
    }

    #[test]
    fn test_anonymous_request_keeps_body_user() {
        let mut req = request();
        req.user_id = Some("u-9".to_string());

        apply_session(&mut req, None);

        assert_eq!(req.user_id.as_deref(), Some("u-9"));
    }

    #[test]
    fn test_bin_must_be_digits() {
        assert!(check_bin("450995").is_ok());
        assert!(check_bin("4509").is_err());
        assert!(check_bin("45099x").is_err());
    }
}
