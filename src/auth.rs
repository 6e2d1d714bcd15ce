//! Session verifiers for the auth gate.
//!
//! Two providers implement [`SessionVerifier`]:
//!
//! - [`SupabaseSessionVerifier`] reads the Supabase SSR auth cookie and
//!   validates its access token with `GET <SUPABASE_URL>/auth/v1/user`.
//! - [`SignedSessionVerifier`] checks a local HMAC-SHA256 signed cookie of
//!   the form `<user_id>.<expires_unix>.<hex signature>`, keyed by
//!   `BRAIN_SESSION_SECRET`. `brain session <user>` mints these.
//!
//! Cookie values and tokens are never logged.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

use brain_core::models::Identity;
use brain_core::session::{AuthError, RequestCookies, SessionVerifier};

use crate::config::{AuthConfig, AuthProvider, Secrets};

type HmacSha256 = Hmac<Sha256>;

/// Default cookie name for signed sessions.
pub const SIGNED_COOKIE_NAME: &str = "brain-session";

/// Supabase SSR splits large cookies into `name.0`, `name.1`, …
const MAX_COOKIE_CHUNKS: usize = 32;

/// Build the verifier selected by `[auth].provider`.
pub fn build_verifier(config: &AuthConfig, secrets: &Secrets) -> Result<Arc<dyn SessionVerifier>> {
    match config.provider {
        AuthProvider::Supabase => {
            let (Some(url), Some(anon_key)) = (&secrets.supabase_url, &secrets.supabase_anon_key)
            else {
                bail!("auth.provider = \"supabase\" requires SUPABASE_URL and SUPABASE_ANON_KEY");
            };
            let verifier = SupabaseSessionVerifier::new(
                url,
                anon_key.clone(),
                config.cookie_name.clone(),
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Arc::new(verifier))
        }
        AuthProvider::Signed => {
            let Some(secret) = &secrets.session_secret else {
                bail!("auth.provider = \"signed\" requires BRAIN_SESSION_SECRET");
            };
            Ok(Arc::new(SignedSessionVerifier::new(
                secret.clone(),
                config.cookie_name.clone(),
            )))
        }
    }
}

// ============ Supabase ============

pub struct SupabaseSessionVerifier {
    client: reqwest::Client,
    base_url: String,
    anon_key: SecretString,
    cookie_name: String,
}

/// `sb-<project-ref>-auth-token`, where the project ref is the first label
/// of the Supabase host (`https://abcd.supabase.co` → `abcd`).
pub fn default_supabase_cookie_name(supabase_url: &str) -> String {
    let host = supabase_url
        .split("://")
        .nth(1)
        .unwrap_or(supabase_url)
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    let project_ref = host.split('.').next().unwrap_or(host);
    format!("sb-{}-auth-token", project_ref)
}

impl SupabaseSessionVerifier {
    pub fn new(
        supabase_url: &str,
        anon_key: SecretString,
        cookie_name: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = supabase_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            cookie_name: cookie_name.unwrap_or_else(|| default_supabase_cookie_name(&base_url)),
            base_url,
            anon_key,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }
}

/// Read the session cookie, joining `name.0`, `name.1`, … chunks when the
/// unsplit cookie is absent.
pub fn read_session_cookie(cookies: &RequestCookies, name: &str) -> Option<String> {
    if let Some(value) = cookies.get(name) {
        return Some(value.to_string());
    }
    let mut joined = String::new();
    for i in 0..MAX_COOKIE_CHUNKS {
        match cookies.get(&format!("{}.{}", name, i)) {
            Some(part) => joined.push_str(part),
            None => break,
        }
    }
    (!joined.is_empty()).then_some(joined)
}

/// Extract the access token from a Supabase session cookie value.
///
/// Accepts the `base64-` prefixed encoding, a JSON session object with
/// `access_token`, and the legacy JSON array `[access_token, refresh_token, …]`.
pub fn extract_access_token(raw: &str) -> Result<String, AuthError> {
    let decoded = match raw.strip_prefix("base64-") {
        Some(encoded) => {
            let trimmed = encoded.trim_end_matches('=');
            let bytes = URL_SAFE_NO_PAD
                .decode(trimmed)
                .or_else(|_| STANDARD.decode(encoded))
                .map_err(|_| AuthError::InvalidSession("malformed session cookie".into()))?;
            String::from_utf8(bytes)
                .map_err(|_| AuthError::InvalidSession("malformed session cookie".into()))?
        }
        None => raw.to_string(),
    };

    let value: Value = serde_json::from_str(&decoded)
        .map_err(|_| AuthError::InvalidSession("malformed session cookie".into()))?;

    let token = match &value {
        Value::Object(map) => map.get("access_token").and_then(Value::as_str),
        Value::Array(items) => items.first().and_then(Value::as_str),
        _ => None,
    };

    match token {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(AuthError::InvalidSession(
            "session cookie has no access token".into(),
        )),
    }
}

#[derive(Deserialize)]
struct SupabaseUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize, Default)]
struct SupabaseErrorBody {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[async_trait]
impl SessionVerifier for SupabaseSessionVerifier {
    async fn verify(&self, cookies: &RequestCookies) -> Result<Identity, AuthError> {
        let raw = read_session_cookie(cookies, &self.cookie_name).ok_or(AuthError::MissingSession)?;
        let token = extract_access_token(&raw)?;

        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let user: SupabaseUser = response
                .json()
                .await
                .map_err(|e| AuthError::Provider(format!("invalid user response: {}", e)))?;
            return Ok(Identity {
                user_id: user.id,
                email: user.email,
            });
        }

        let body: SupabaseErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .msg
            .or(body.message)
            .or(body.error_description)
            .unwrap_or_else(|| format!("auth provider returned {}", status));

        if status.is_client_error() {
            Err(AuthError::InvalidSession(message))
        } else {
            Err(AuthError::Provider(message))
        }
    }
}

// ============ Signed cookies ============

pub struct SignedSessionVerifier {
    secret: SecretString,
    cookie_name: String,
}

impl SignedSessionVerifier {
    pub fn new(secret: SecretString, cookie_name: Option<String>) -> Self {
        Self {
            secret,
            cookie_name: cookie_name.unwrap_or_else(|| SIGNED_COOKIE_NAME.to_string()),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }
}

fn sign(secret: &str, payload: &str) -> Result<HmacSha256, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AuthError::Provider(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Mint a session token for `user_id` valid until `expires_unix`.
pub fn issue_session_token(
    secret: &SecretString,
    user_id: &str,
    expires_unix: i64,
) -> Result<String, AuthError> {
    if user_id.trim().is_empty() {
        return Err(AuthError::InvalidSession("user id must not be empty".into()));
    }
    let payload = format!("{}.{}", user_id, expires_unix);
    let mac = sign(secret.expose_secret(), &payload)?;
    Ok(format!("{}.{}", payload, hex::encode(mac.finalize().into_bytes())))
}

/// Verify a signed token against `now_unix` and return the user id.
pub fn verify_session_token(
    secret: &SecretString,
    token: &str,
    now_unix: i64,
) -> Result<String, AuthError> {
    let invalid = || AuthError::InvalidSession("invalid session signature".into());

    let mut parts = token.rsplitn(3, '.');
    let (Some(signature), Some(expires), Some(user_id)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let signature = hex::decode(signature).map_err(|_| invalid())?;
    let mac = sign(secret.expose_secret(), &format!("{}.{}", user_id, expires))?;
    mac.verify_slice(&signature).map_err(|_| invalid())?;

    let expires: i64 = expires.parse().map_err(|_| invalid())?;
    if expires <= now_unix {
        return Err(AuthError::InvalidSession("session expired".into()));
    }
    if user_id.is_empty() {
        return Err(invalid());
    }
    Ok(user_id.to_string())
}

#[async_trait]
impl SessionVerifier for SignedSessionVerifier {
    async fn verify(&self, cookies: &RequestCookies) -> Result<Identity, AuthError> {
        let token = cookies
            .get(&self.cookie_name)
            .ok_or(AuthError::MissingSession)?;
        let user_id = verify_session_token(&self.secret, token, chrono::Utc::now().timestamp())?;
        Ok(Identity::new(user_id))
    }
}
