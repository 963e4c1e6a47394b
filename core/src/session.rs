//! Per-account brokerage sessions with guaranteed teardown.
//!
//! `SessionManager::acquire` logs in with a one-time code generated at call time and hands back
//! a `SessionGuard`. The guard terminates the session exactly once: through `release`, or from
//! `Drop` when the owning future is cancelled or unwinds.

use broker_connectors::{totp, BrokerConnector, BrokerCredentials, BrokerSession};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, ExecutionResult};

#[derive(Clone)]
pub struct SessionManager {
    connector: Arc<dyn BrokerConnector>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self { connector }
    }

    /// Log in on behalf of one account. Authentication failures are not retried.
    pub async fn acquire(&self, credentials: &BrokerCredentials) -> ExecutionResult<SessionGuard> {
        credentials
            .validate()
            .map_err(|e| ExecutionError::Auth(e.to_string()))?;

        let guard = SessionGuard::new(
            self.connector.new_session(credentials),
            credentials.client_id.clone(),
        );

        let one_time_code = match totp::generate_now(credentials.totp_secret.expose_secret()) {
            Ok(code) => code,
            Err(e) => {
                guard.release().await;
                return Err(ExecutionError::Auth(e.to_string()));
            }
        };

        let reply = guard
            .session()
            .authenticate(
                &credentials.client_id,
                credentials.password.expose_secret(),
                &one_time_code,
            )
            .await;

        match reply {
            Ok(reply) if reply.success => {
                info!(client_id = %credentials.client_id, "brokerage session established");
                Ok(guard)
            }
            Ok(reply) => {
                guard.release().await;
                let code = reply.error_code.map(|c| format!(" ({c})")).unwrap_or_default();
                Err(ExecutionError::Auth(format!("{}{}", reply.message, code)))
            }
            Err(e) => {
                guard.release().await;
                Err(ExecutionError::Auth(e.to_string()))
            }
        }
    }
}

/// Scoped ownership of an authenticated (or half-authenticated) session
pub struct SessionGuard {
    session: Arc<dyn BrokerSession>,
    client_id: String,
    released: bool,
}

impl SessionGuard {
    fn new(session: Arc<dyn BrokerSession>, client_id: String) -> Self {
        Self {
            session,
            client_id,
            released: false,
        }
    }

    pub fn session(&self) -> &dyn BrokerSession {
        self.session.as_ref()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Terminate the session. Failures are logged, never escalated.
    pub async fn release(mut self) {
        self.released = true;
        match self.session.terminate(&self.client_id).await {
            Ok(()) => debug!(client_id = %self.client_id, "session released"),
            Err(e) => warn!(client_id = %self.client_id, error = %e, "session release failed"),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let session = Arc::clone(&self.session);
        let client_id = self.client_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(client_id = %client_id, "session dropped unreleased, terminating in background");
                handle.spawn(async move {
                    if let Err(e) = session.terminate(&client_id).await {
                        warn!(client_id = %client_id, error = %e, "background session release failed");
                    }
                });
            }
            Err(_) => {
                warn!(client_id = %client_id, "session dropped outside a runtime, not terminated");
            }
        }
    }
}
