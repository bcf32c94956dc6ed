//! Direct-message endpoints for clients without a gateway connection.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::gateway::events::SendMessagePayload;
use crate::models::message::{Message, MAX_CONTENT_CHARS};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", post(send_message))
        .route("/messages/pending", get(pending_messages))
}

// ---------------------------------------------------------------------------
// POST /api/v1/messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub recipient_id: Option<String>,
    pub content: Option<String>,
    #[serde(default, with = "crate::models::snowflake_id::option")]
    #[schema(value_type = Option<String>)]
    pub reply_to: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/api/v1/messages",
    tag = "Messages",
    security(("bearer" = [])),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message sent", body = Message),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn send_message(
    AuthUser { user_id, identity }: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let mut errors = Vec::new();
    let recipient_id = body.recipient_id.unwrap_or_default();
    if recipient_id.trim().is_empty() {
        errors.push(FieldError {
            field: "recipient_id".to_string(),
            message: "Recipient is required".to_string(),
        });
    } else if recipient_id == user_id {
        errors.push(FieldError {
            field: "recipient_id".to_string(),
            message: "Cannot send a message to yourself".to_string(),
        });
    }

    let content = body.content.unwrap_or_default();
    if content.trim().is_empty() {
        errors.push(FieldError {
            field: "content".to_string(),
            message: "Message content is required".to_string(),
        });
    } else if content.chars().count() > MAX_CONTENT_CHARS {
        errors.push(FieldError {
            field: "content".to_string(),
            message: format!("Message content must be {MAX_CONTENT_CHARS} characters or fewer"),
        });
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let message = state
        .messages
        .send(
            None,
            &identity,
            SendMessagePayload {
                recipient_id,
                content,
                reply_to: body.reply_to,
                client_ref: None,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

// ---------------------------------------------------------------------------
// GET /api/v1/messages/pending
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingMessagesResponse {
    pub messages: Vec<Message>,
}

#[utoipa::path(
    get,
    path = "/api/v1/messages/pending",
    tag = "Messages",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Undelivered messages, now marked delivered", body = PendingMessagesResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn pending_messages(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<PendingMessagesResponse>, ApiError> {
    let messages = state.messages.pending(&user_id).await?;
    Ok(Json(PendingMessagesResponse { messages }))
}
