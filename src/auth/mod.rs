pub mod jwt;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::pg::PgConnection;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    memos::{directory, Actor, WorkflowError},
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub username: String,
    pub role: String,
}

impl AuthenticatedUser {
    /// Resolves the caller against the user directory. Role and department
    /// come from the directory, not from the token.
    pub fn actor(&self, conn: &mut PgConnection) -> AppResult<Actor> {
        match directory::load_actor(conn, self.user_id) {
            Ok(actor) => Ok(actor),
            Err(WorkflowError::NotFound(_)) => Err(AppError::unauthorized()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
        })
    }
}
