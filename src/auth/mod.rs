pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::{AuthProvider, Role, User},
    schema::users,
    state::AppState,
};

/// The per-request session: resolved from the bearer token, never from request bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub auth_provider: AuthProvider,
}

impl AuthenticatedUser {
    pub fn require_role(&self, allowed: &[Role]) -> AppResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "access denied for role {}",
                self.role
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<User> for AuthenticatedUser {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            auth_provider: user.auth_provider,
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
                .map_err(|_| AppError::unauthenticated("missing bearer token"))?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthenticated("invalid or expired token"))?;

        let mut conn = state.db()?;
        let user: Option<User> = users::table
            .find(claims.sub)
            .first(&mut conn)
            .optional()?;

        match user {
            Some(user) if user.email == claims.email => Ok(user.into()),
            _ => Err(AppError::unauthenticated("user not found")),
        }
    }
}
