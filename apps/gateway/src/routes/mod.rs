pub mod health;
pub mod messages;
pub mod notifications;
pub mod presence;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .merge(SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", ApiDoc::openapi()))
        .nest(
            "/api/v1",
            messages::router()
                .merge(notifications::router())
                .merge(presence::router()),
        )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Messages
        messages::send_message,
        messages::pending_messages,
        // Notifications
        notifications::create_notification,
        // Presence
        presence::get_presence,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::message::Message,
            crate::models::notification::Notification,
            crate::models::notification::NotificationKind,
            crate::models::notification::DeliveryMethod,
            crate::models::call::Call,
            crate::models::call::CallKind,
            crate::models::call::CallStatus,
            // Route request/response types
            health::HealthResponse,
            messages::SendMessageRequest,
            messages::PendingMessagesResponse,
            notifications::CreateNotificationRequest,
            presence::PresenceResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Messages", description = "Direct messaging"),
        (name = "Notifications", description = "Notification fan-out"),
        (name = "Presence", description = "Who is online"),
    )
)]
pub struct ApiDoc;
