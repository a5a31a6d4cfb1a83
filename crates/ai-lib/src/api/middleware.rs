//! Bearer authentication and role gates

use super::AppState;
use crate::auth::{AccessInfo, Role};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

/// Validate the caller's token and attach its [`AccessInfo`] to the request
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.auth.authenticate_headers(request.headers()) {
        Ok(access) => {
            request.extensions_mut().insert(access);
            next.run(request).await
        }
        Err(e) => {
            debug!(error = %e, path = %request.uri().path(), "Rejected request");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

async fn require_role(role: Role, request: Request, next: Next) -> Response {
    match request.extensions().get::<AccessInfo>() {
        Some(access) if access.role == role => next.run(request).await,
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Admit only service accounts
pub async fn only_service(request: Request, next: Next) -> Response {
    require_role(Role::Service, request, next).await
}

/// Admit only site administrators
pub async fn only_admin(request: Request, next: Next) -> Response {
    require_role(Role::SiteAdmin, request, next).await
}
