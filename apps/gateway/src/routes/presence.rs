use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/presence/{user_id}", get(get_presence))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceResponse {
    pub user_id: String,
    pub online: bool,
    /// `online`, `away`, `busy` or `offline`.
    pub status: &'static str,
    pub connections: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/presence/{user_id}",
    tag = "Presence",
    security(("bearer" = [])),
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Current presence", body = PresenceResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn get_presence(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceResponse>, ApiError> {
    let connections = state.hub.connections_for(&user_id).len();
    Ok(Json(PresenceResponse {
        online: connections > 0,
        status: state.hub.status(&user_id).as_str(),
        connections,
        user_id,
    }))
}
