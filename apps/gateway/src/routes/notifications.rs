//! Social notification trigger used by the CRUD services.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::models::notification::{Notification, NotificationKind};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/notifications", post(create_notification))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateNotificationRequest {
    pub recipient_id: Option<String>,
    pub kind: Option<NotificationKind>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Value,
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications",
    tag = "Notifications",
    security(("bearer" = [])),
    request_body = CreateNotificationRequest,
    responses(
        (status = 201, description = "Notification created and dispatched", body = Notification),
        (status = 204, description = "Self-notification ignored"),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn create_notification(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateNotificationRequest>,
) -> Result<Response, ApiError> {
    let mut errors = Vec::new();
    let recipient_id = body.recipient_id.unwrap_or_default();
    if recipient_id.trim().is_empty() {
        errors.push(FieldError {
            field: "recipient_id".to_string(),
            message: "Recipient is required".to_string(),
        });
    }
    let kind = match body.kind {
        Some(
            kind @ (NotificationKind::Like
            | NotificationKind::Comment
            | NotificationKind::Follow
            | NotificationKind::Mention),
        ) => Some(kind),
        _ => {
            errors.push(FieldError {
                field: "kind".to_string(),
                message: "Kind must be one of like, comment, follow, mention".to_string(),
            });
            None
        }
    };
    let (Some(kind), true) = (kind, errors.is_empty()) else {
        return Err(ApiError::validation(errors));
    };

    if recipient_id == user_id {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let notification = state
        .notifier
        .notify(&recipient_id, &user_id, kind, body.payload)
        .await;
    Ok((StatusCode::CREATED, Json(notification)).into_response())
}
