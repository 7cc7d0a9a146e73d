//! Credential management for API keys.
//!
//! Keys are stored in the system keyring, with environment variables as a
//! read-only fallback for CI and headless hosts.
//!
//! # Example
//!
//! ```ignore
//! use reelcheck_models::auth::CredentialStore;
//!
//! let store = CredentialStore::new("reelcheck").with_env_fallback();
//! store.set("google", "AIza...")?;
//! let key = store.get("google")?;
//! ```

use std::collections::BTreeSet;
use std::env;

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::{Error, Result};

/// An API key whose `Debug` output never shows the value.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Create a new API key from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    /// Expose the secret key value.
    ///
    /// Only call this when building the outgoing request.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey([REDACTED])")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Environment variables consulted for each provider, in priority order.
const ENV_VARS: &[(&str, &[&str])] = &[
    ("google", &["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
    ("anthropic", &["ANTHROPIC_API_KEY"]),
];

/// Environment variable names for a provider.
pub fn env_vars_for_provider(provider: &str) -> &'static [&'static str] {
    ENV_VARS
        .iter()
        .find(|(p, _)| *p == provider)
        .map(|(_, vars)| *vars)
        .unwrap_or(&[])
}

/// Providers the store knows how to look up.
pub fn known_providers() -> impl Iterator<Item = &'static str> {
    ENV_VARS.iter().map(|(p, _)| *p)
}

/// Credential storage backed by the system keyring with environment fallback.
///
/// Lookups try the keyring first and then, when enabled, the provider's
/// environment variables. Writes always go to the keyring.
pub struct CredentialStore {
    service_name: String,
    env_fallback: bool,
}

impl CredentialStore {
    /// Create a new credential store for a keyring service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            env_fallback: false,
        }
    }

    /// Enable environment variable fallback.
    pub fn with_env_fallback(mut self) -> Self {
        self.env_fallback = true;
        self
    }

    /// Get an API key for a provider.
    ///
    /// # Errors
    ///
    /// Returns `Error::CredentialsNotFound` if no credentials are found.
    pub fn get(&self, provider: &str) -> Result<ApiKey> {
        if let Some(key) = self.get_from_keyring(provider) {
            debug!(provider, "retrieved API key from keyring");
            return Ok(key);
        }

        if self.env_fallback
            && let Some(key) = self.get_from_env(provider)
        {
            debug!(provider, "retrieved API key from environment");
            return Ok(key);
        }

        Err(Error::CredentialsNotFound(provider.to_string()))
    }

    /// Store an API key for a provider in the system keyring.
    pub fn set(&self, provider: &str, key: &str) -> Result<()> {
        let entry = self.keyring_entry(provider)?;
        entry
            .set_password(key)
            .map_err(|e| Error::Keyring(e.to_string()))?;
        debug!(provider, "stored API key in keyring");
        Ok(())
    }

    /// Delete an API key from the system keyring.
    ///
    /// # Errors
    ///
    /// Returns `Error::CredentialsNotFound` if the keyring has no entry.
    pub fn delete(&self, provider: &str) -> Result<()> {
        let entry = self.keyring_entry(provider)?;
        entry.delete_credential().map_err(|e| match e {
            keyring::Error::NoEntry => Error::CredentialsNotFound(provider.to_string()),
            _ => Error::Keyring(e.to_string()),
        })?;
        debug!(provider, "deleted API key from keyring");
        Ok(())
    }

    /// Check if credentials exist for a provider.
    pub fn has(&self, provider: &str) -> bool {
        self.get(provider).is_ok()
    }

    /// List providers with a usable credential, sorted by name.
    pub fn list_providers(&self) -> Vec<String> {
        let mut providers = BTreeSet::new();
        for provider in known_providers() {
            if self.has_in_keyring(provider) || (self.env_fallback && self.has_in_env(provider)) {
                providers.insert(provider.to_string());
            }
        }
        providers.into_iter().collect()
    }

    /// Check if a credential exists in the keyring.
    pub fn has_in_keyring(&self, provider: &str) -> bool {
        self.get_from_keyring(provider).is_some()
    }

    /// Check if a credential exists in environment variables.
    pub fn has_in_env(&self, provider: &str) -> bool {
        self.get_from_env(provider).is_some()
    }

    /// Where the credential for a provider would be read from.
    pub fn credential_source(&self, provider: &str) -> Option<CredentialSource> {
        if self.has_in_keyring(provider) {
            Some(CredentialSource::Keyring)
        } else if self.env_fallback && self.has_in_env(provider) {
            Some(CredentialSource::Environment)
        } else {
            None
        }
    }

    fn keyring_entry(&self, provider: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service_name, provider).map_err(|e| Error::Keyring(e.to_string()))
    }

    fn get_from_keyring(&self, provider: &str) -> Option<ApiKey> {
        let entry = self.keyring_entry(provider).ok()?;
        entry.get_password().ok().map(ApiKey::new)
    }

    fn get_from_env(&self, provider: &str) -> Option<ApiKey> {
        env_vars_for_provider(provider)
            .iter()
            .find_map(|var| env::var(var).ok().filter(|v| !v.is_empty()))
            .map(ApiKey::new)
    }
}

/// Source of a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Stored in system keyring.
    Keyring,
    /// From environment variable.
    Environment,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Keyring => write!(f, "keyring"),
            CredentialSource::Environment => write!(f, "environment"),
        }
    }
}
