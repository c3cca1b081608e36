//! Optional bearer-token check applied by the host in front of the extension
//! routes. The routes themselves never look at credentials.

use crate::error::{ExtensionError, ExtensionResult};
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

const BEARER_PREFIX: &str = "Bearer ";

/// Accepted bearer tokens. Empty means authentication is off.
#[derive(Clone, Default)]
pub struct AuthConfig {
    tokens: Vec<String>,
}

impl AuthConfig {
    pub fn from_tokens(tokens: &[String]) -> ExtensionResult<Self> {
        let mut accepted: Vec<String> = Vec::with_capacity(tokens.len());
        for token in tokens {
            let trimmed = token.trim();
            if trimmed.is_empty() {
                return Err(ExtensionError::configuration(
                    "Empty value in EXT_AUTH_TOKENS",
                ));
            }
            if !accepted.iter().any(|t| t == trimmed) {
                accepted.push(trimmed.to_string());
            }
        }
        Ok(Self { tokens: accepted })
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Compare against every configured token without short-circuiting.
    fn accepts(&self, provided: &str) -> bool {
        self.tokens.iter().fold(false, |found, expected| {
            let equal = expected.len() == provided.len()
                && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()));
            found | equal
        })
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_count", &self.tokens.len())
            .finish()
    }
}

/// Reject requests without a valid `Authorization: Bearer <token>` header.
pub async fn require_bearer(
    State(auth): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let verdict = bearer_token(&request).and_then(|token| {
        if auth.accepts(token) {
            Ok(())
        } else {
            Err("Invalid bearer token")
        }
    });
    match verdict {
        Ok(()) => next.run(request).await,
        Err(reason) => {
            warn!(path = %request.uri().path(), reason, "Rejected request");
            unauthorized(reason)
        }
    }
}

fn bearer_token(request: &Request<Body>) -> Result<&str, &'static str> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or("Missing Authorization header")?
        .to_str()
        .map_err(|_| "Authorization header contains invalid characters")?;
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or("Expected 'Authorization: Bearer <token>'")?;
    if token.is_empty() {
        return Err("Bearer token is empty");
    }
    Ok(token)
}

fn unauthorized(message: &str) -> Response {
    #[derive(Serialize)]
    struct ErrorBody<'a> {
        code: &'static str,
        message: &'a str,
    }

    (
        StatusCode::UNAUTHORIZED,
        axum::Json(ErrorBody {
            code: "unauthorized",
            message,
        }),
    )
        .into_response()
}
