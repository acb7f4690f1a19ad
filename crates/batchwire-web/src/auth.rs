//! Session authentication.
//!
//! Sessions are issued elsewhere; this server only maps session tokens to
//! user ids. The resolved id is the only identity a connection may bind to.

use std::collections::HashMap;

use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Known session tokens.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    tokens: HashMap<String, String>,
}

impl SessionStore {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// User id behind a session token.
    pub fn resolve(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// Authenticated user of a request.
///
/// The token comes from `Authorization: Bearer ...`, or from `?token=` for
/// browser WebSocket clients that cannot set headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).or_else(|| {
            Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|q| q.0.token)
        });

        let Some(token) = token else {
            debug!(path = %parts.uri.path(), "Request without session token");
            return Err(ApiError::Unauthorized);
        };

        state
            .sessions
            .resolve(&token)
            .map(|user| AuthUser(user.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_resolve() {
        let store = SessionStore::new(HashMap::from([("tok-1".to_string(), "alice".to_string())]));
        assert_eq!(store.resolve("tok-1"), Some("alice"));
        assert_eq!(store.resolve("tok-2"), None);
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok-1"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok-1"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
