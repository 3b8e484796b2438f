//! Bearer-token authentication, grounded on `api/middleware.rs`'s `auth_middleware`:
//! constant-time comparison via `subtle::ConstantTimeEq` to avoid a timing oracle on the token.

use super::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.api_token.as_ref() else {
        tracing::error!("no API token configured — rejecting all authenticated requests");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header.strip_prefix("Bearer ").ok_or(StatusCode::UNAUTHORIZED)?;

    if !bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!("rejected request with invalid bearer token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
