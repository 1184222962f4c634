//! Kite Connect credentials and login flow.
//!
//! A session starts with the user logging in at [`KiteCredentials::login_url`].
//! Kite redirects back with a one-time `request_token`, which is exchanged
//! for an access token by posting it with a SHA-256 checksum of
//! `api_key + request_token + api_secret`.
//!
//! The secret and the access token are never logged.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use straddle_core::KiteConfig;

/// API key plus the secrets needed to sign in and make requests.
#[derive(Clone)]
pub struct KiteCredentials {
    api_key: String,
    api_secret: SecretString,
    access_token: Option<SecretString>,
}

impl std::fmt::Debug for KiteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("has_access_token", &self.access_token.is_some())
            .finish()
    }
}

impl KiteCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
            access_token: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &KiteConfig) -> Self {
        let creds = Self::new(config.api_key.clone(), config.api_secret.clone());
        match config.access_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => creds.with_access_token(token),
            None => creds,
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(SecretString::from(token.into()));
        self
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }

    /// Where the user signs in to obtain a request token.
    #[must_use]
    pub fn login_url(&self, base: &str) -> String {
        format!("{base}?v=3&api_key={}", self.api_key)
    }

    /// Hex SHA-256 of `api_key + request_token + api_secret`.
    #[must_use]
    pub fn checksum(&self, request_token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.api_key.as_bytes());
        hasher.update(request_token.as_bytes());
        hasher.update(self.api_secret.expose_secret().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `Authorization` header value, if signed in.
    pub(crate) fn authorization(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .map(|t| format!("token {}:{}", self.api_key, t.expose_secret()))
    }
}
