use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::app::AppState;
use crate::models::{User, UserRole};
use crate::store::StoreError;
use crate::utils::error::AppError;

/// The signed-in user behind a `Authorization: Bearer <token>` header.
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn require_customer(self) -> Result<User, AppError> {
        self.require(UserRole::Customer)
    }

    pub fn require_provider(self) -> Result<User, AppError> {
        self.require(UserRole::Provider)
    }

    fn require(self, role: UserRole) -> Result<User, AppError> {
        if self.0.role != role {
            return Err(AppError::Forbidden(format!(
                "This action requires a {} account",
                match role {
                    UserRole::Customer => "customer",
                    UserRole::Provider => "provider",
                }
            )));
        }
        Ok(self.0)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::AuthError("Missing bearer token".to_string()))?;
        let claims = state.tokens.verify(token)?;

        // Accounts deleted after the token was issued are rejected too.
        let user = match state.store.get_user(claims.sub).await {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => {
                return Err(AppError::AuthError("Invalid or expired session".to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(AuthUser(user))
    }
}
