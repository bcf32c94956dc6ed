//! Bearer-token extraction for the REST surface.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::tokens::{self, Identity};
use crate::error::ApiError;
use crate::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <jwt>` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub identity: Identity,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = tokens::bearer_credential(&parts.headers, None)?;
        let identity = state.verifier.resolve_identity(token).await?;

        Ok(AuthUser {
            user_id: identity.user_id.clone(),
            identity,
        })
    }
}
