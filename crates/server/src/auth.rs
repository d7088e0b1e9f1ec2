//! Bearer-token middleware for the HTTP transport.
//!
//! CORS preflights pass through untouched so browsers can negotiate before
//! they have credentials attached. The secret comparison is constant-time.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{Method, StatusCode, header};
use serde_json::json;

#[derive(Clone)]
pub struct AuthState {
    token: Arc<String>,
}

impl AuthState {
    pub fn new(token: String) -> Self {
        Self {
            token: Arc::new(token),
        }
    }

    /// Validate an `Authorization` header value: `Bearer <secret>` with a
    /// case-insensitive scheme.
    fn check(&self, header: &str) -> bool {
        let Some((scheme, secret)) = header.split_once(' ') else {
            return false;
        };
        scheme.eq_ignore_ascii_case("bearer")
            && constant_time_eq(secret.trim().as_bytes(), self.token.as_bytes())
    }
}

pub async fn require_bearer(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| state.check(value));

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response()
    }
}

/// Length check first, then a full XOR fold with no early exit on content.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secrez"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let state = AuthState::new("deadbeef".to_string());
        assert!(state.check("Bearer deadbeef"));
        assert!(state.check("bearer deadbeef"));
        assert!(state.check("BEARER deadbeef"));
    }

    #[test]
    fn wrong_or_malformed_credentials_fail() {
        let state = AuthState::new("deadbeef".to_string());
        assert!(!state.check("Bearer wrong"));
        assert!(!state.check("Basic deadbeef"));
        assert!(!state.check("deadbeef"));
        assert!(!state.check(""));
    }
}
