use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::errors::auth_error::AuthError;
use crate::state::AppState;

/// Identity of an authenticated admin caller.
///
/// `id` is `None` when authentication is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub id: Option<String>,
}

impl AuthContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Token from `Authorization: Bearer <token>`, falling back to `?token=`.
fn extract_token(request: &Request) -> Result<String, AuthError> {
    if let Some(auth_header) = request.headers().get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            return Ok(token.trim().to_string());
        }
        return Err(AuthError::InvalidAuthHeader);
    }

    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "token" {
                return Ok(value.into_owned());
            }
        }
    }

    Err(AuthError::MissingAuthHeader)
}

/// Bearer-token check for the admin routes.
///
/// Tokens are compared in constant time against the configured API secrets.
/// When `auth_required` is off every request passes with an empty
/// [`AuthContext`].
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if !state.config.auth_required {
        request.extensions_mut().insert(AuthContext::empty());
        return Ok(next.run(request).await);
    }

    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    if !state.config.has_api_secret_auth() {
        return Err(AuthError::ConfigError(
            "authentication required but no API secrets configured".to_string(),
        ));
    }

    let token = extract_token(&request)?;
    match state.config.find_api_secret_id(&token) {
        Some(secret_id) => {
            tracing::info!(
                method = %method,
                path = %path,
                auth_id = %secret_id,
                "API secret authentication successful"
            );
            request
                .extensions_mut()
                .insert(AuthContext::new(secret_id));
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(
                method = %method,
                path = %path,
                "API secret authentication failed: token mismatch"
            );
            Err(AuthError::Unauthorized("Invalid API secret".to_string()))
        }
    }
}
