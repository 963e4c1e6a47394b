//! Secure Broker Credentials Management
//!
//! Per-account brokerage credentials are provisioned by an external process and
//! are read-only here. Secrets are wrapped in `secrecy::Secret` so they never
//! leak through logs or debug output.

use crate::BrokerError;
use secrecy::{ExposeSecret, Secret};

/// Secure brokerage credentials with protected secrets
#[derive(Clone)]
pub struct BrokerCredentials {
    /// Brokerage client code (public identifier)
    pub client_id: String,
    /// Login password (never log or expose)
    pub password: Secret<String>,
    /// Base32 shared secret used to derive one-time codes
    pub totp_secret: Secret<String>,
    /// API key sent with every request
    pub api_key: Secret<String>,
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("client_id", &self.client_id)
            .field("password", &"[REDACTED]")
            .field("totp_secret", &"[REDACTED]")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl BrokerCredentials {
    /// Create new credentials with the provided values
    pub fn new(
        client_id: impl Into<String>,
        password: impl Into<String>,
        totp_secret: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            password: Secret::new(password.into()),
            totp_secret: Secret::new(totp_secret.into()),
            api_key: Secret::new(api_key.into()),
        }
    }

    /// Validate that every field needed for a login is present
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.client_id.trim().is_empty() {
            return Err(BrokerError::Authentication(
                "client id cannot be empty".to_string(),
            ));
        }

        if self.password.expose_secret().is_empty() {
            return Err(BrokerError::Authentication(
                "password cannot be empty".to_string(),
            ));
        }

        if self.totp_secret.expose_secret().trim().is_empty() {
            return Err(BrokerError::Authentication(
                "one-time code secret cannot be empty".to_string(),
            ));
        }

        if self.api_key.expose_secret().is_empty() {
            return Err(BrokerError::Authentication(
                "API key cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the password (exposes secret - use carefully)
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Get the one-time code secret (exposes secret - use carefully)
    pub fn totp_secret(&self) -> &str {
        self.totp_secret.expose_secret()
    }

    /// Get the API key (exposes secret - use carefully)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}
