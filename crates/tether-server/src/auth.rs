//! Connection admission at WebSocket upgrade.
//!
//! Identity is checked once, before the upgrade completes; rejected
//! attempts get a plain `401` and never become sessions. This is
//! independent of any in-band auth envelope a client chooses to send
//! after connecting.

use std::collections::HashMap;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Decides whether a connection attempt may become a session.
pub trait Authenticator: Send + Sync {
    /// Returns `true` when the upgrade request may proceed.
    fn authenticate(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> bool;
}

/// Admits every connection. The default.
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _headers: &HeaderMap, _query: &HashMap<String, String>) -> bool {
        true
    }
}

/// Requires a fixed bearer token, either as an `Authorization: Bearer`
/// header or a `token` query parameter (for clients that cannot set
/// headers on upgrade requests).
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Creates an authenticator accepting exactly this token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Authenticator for StaticToken {
    fn authenticate(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> bool {
        let header_ok = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| token == self.token);
        header_ok || query.get("token").is_some_and(|token| *token == self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn allow_all_admits_everything() {
        assert!(AllowAll.authenticate(&HeaderMap::new(), &HashMap::new()));
    }

    #[test]
    fn bearer_header_matches() {
        let auth = StaticToken::new("s3cret");
        assert!(auth.authenticate(&headers_with_bearer("s3cret"), &HashMap::new()));
        assert!(!auth.authenticate(&headers_with_bearer("wrong"), &HashMap::new()));
    }

    #[test]
    fn query_token_matches() {
        let auth = StaticToken::new("s3cret");
        let query: HashMap<String, String> = [("token".to_string(), "s3cret".to_string())]
            .into_iter()
            .collect();
        assert!(auth.authenticate(&HeaderMap::new(), &query));
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let auth = StaticToken::new("s3cret");
        assert!(!auth.authenticate(&HeaderMap::new(), &HashMap::new()));
    }

    #[test]
    fn non_bearer_authorization_is_rejected() {
        let auth = StaticToken::new("s3cret");
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, "Basic s3cret".parse().unwrap());
        assert!(!auth.authenticate(&headers, &HashMap::new()));
    }
}
