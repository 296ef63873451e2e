use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};
use cine_core::identity::SessionUser;
use cine_core::repository::Entitlement;
use cine_payment::wire::EntitledResponse;

use crate::error::AppError;
use crate::middleware::auth::require_owner;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/entitlements/{user_id}", get(list_entitlements))
        .route("/entitlements/{user_id}/{movie_id}", get(check_entitlement))
}

pub async fn list_entitlements(
    State(state): State<AppState>,
    session: Option<Extension<SessionUser>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Entitlement>>, AppError> {
    require_owner(session.as_deref(), &user_id)?;
    let entitlements = state.orchestrator.entitlements_for(&user_id).await?;
    Ok(Json(entitlements))
}

pub async fn check_entitlement(
    State(state): State<AppState>,
    session: Option<Extension<SessionUser>>,
    Path((user_id, movie_id)): Path<(String, String)>,
) -> Result<Json<EntitledResponse>, AppError> {
    require_owner(session.as_deref(), &user_id)?;
    let entitled = state.orchestrator.has_entitlement(&user_id, &movie_id).await?;
    Ok(Json(EntitledResponse { entitled }))
}
