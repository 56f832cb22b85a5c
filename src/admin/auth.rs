use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;

/// Bearer-key gate for the admin routes. An empty key locks everyone out.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = &state.config.admin.api_key;

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(key) if !expected.is_empty() && key == expected => Ok(next.run(request).await),
        _ => {
            tracing::warn!("Rejected admin request with missing or wrong key");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
