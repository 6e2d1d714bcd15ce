//! Session verification seam.
//!
//! The ingest pipeline only sees request cookies and a [`SessionVerifier`].
//! Concrete providers (Supabase, signed cookies) live in the app crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Identity;

/// Cookies sent with a request, by name.
#[derive(Debug, Clone, Default)]
pub struct RequestCookies(BTreeMap<String, String>);

impl RequestCookies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestCookies {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Why a session was rejected. The display text is returned to the client
/// as the `details` of a 401.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No user found")]
    MissingSession,

    #[error("{0}")]
    InvalidSession(String),

    #[error("auth provider error: {0}")]
    Provider(String),
}

/// Resolves request cookies to an authenticated [`Identity`].
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, cookies: &RequestCookies) -> Result<Identity, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_cookies_from_iter() {
        let cookies: RequestCookies = vec![("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(cookies.get("a"), Some("1"));
        assert_eq!(cookies.get("c"), None);
        assert!(!cookies.is_empty());
        assert!(RequestCookies::new().is_empty());
    }

    #[test]
    fn test_missing_session_message() {
        assert_eq!(AuthError::MissingSession.to_string(), "No user found");
    }
}
