use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::handlers::ErrorResponse;
use crate::state::AppState;

/// Bearer-token check for message routes.
///
/// Disabled when `auth.api_token` is not configured.
#[tracing::instrument(skip(state, req, next))]
pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.auth.api_token.as_deref() else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match provided {
        Some(token) if ct_eq(token.as_bytes(), expected.as_bytes()) => next.run(req).await,
        Some(_) => {
            tracing::warn!("Invalid API token");
            unauthorized()
        }
        None => {
            tracing::warn!("Missing or malformed authorization header");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    ErrorResponse::new("unauthorized", "A valid bearer token is required").into_response()
}

/// Constant-time byte comparison
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
