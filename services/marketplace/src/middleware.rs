use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use tutorhub_common::{AppError, UserRole};

use crate::AppState;

/// Authenticated caller, attached to the request by `auth_middleware`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = headers
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Authentication("Missing or invalid authorization header".to_string())
        })?;

    let token = Uuid::parse_str(token)
        .map_err(|_| AppError::Authentication("Invalid session token".to_string()))?;

    let user_id = state
        .store
        .session_user(token)
        .await?
        .ok_or_else(|| AppError::Authentication("Invalid or expired session".to_string()))?;

    let user = state
        .store
        .user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("Invalid or expired session".to_string()))?;

    request.extensions_mut().insert(AuthUser {
        user_id: user.user_id,
        role: user.role,
    });

    Ok(next.run(request).await)
}
