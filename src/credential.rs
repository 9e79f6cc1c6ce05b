//! Bearer credential lifecycle
//!
//! A [`CredentialManager`] is either holding a token or not. A held token is
//! dropped lazily once `now >= expires_at`, or explicitly through
//! [`CredentialManager::invalidate`] when the web service rejects it. Every
//! change is written through to `api_key.json` so the next process can reuse
//! the token.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::persist::LockedJsonFile;

/// File name of the persisted credential inside the cache directory
pub const CREDENTIAL_FILE: &str = "api_key.json";

/// A bearer token together with its issue and expiry times
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialToken {
    pub token: String,
    #[serde(default)]
    pub role: String,
    /// When the token was issued to us
    pub accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CredentialToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && now < self.expires_at
    }
}

/// Token and role handed out by a successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthGrant {
    pub token: String,
    #[serde(default)]
    pub role: String,
}

/// Obtains a fresh credential from the web service
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<AuthGrant>;
}

/// Holds the current credential and refreshes it on demand
pub struct CredentialManager {
    authenticator: Arc<dyn Authenticator>,
    file: Option<LockedJsonFile>,
    token_ttl: Duration,
    state: Mutex<Option<CredentialToken>>,
}

impl CredentialManager {
    /// Creates a manager backed by the credential file at `path`
    ///
    /// A missing or malformed file leaves the manager without a token; a
    /// malformed one is deleted.
    pub fn load(
        path: impl Into<PathBuf>,
        token_ttl: Duration,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let file = LockedJsonFile::new(path);
        let token = file
            .read_or_discard::<CredentialToken>()
            .unwrap_or_else(|err| {
                warn!(path = %file.path().display(), error = %err, "cannot read credential file");
                None
            });
        if let Some(ref token) = token {
            debug!(role = %token.role, expires_at = %token.expires_at, "loaded persisted credential");
        }
        Self {
            authenticator,
            file: Some(file),
            token_ttl,
            state: Mutex::new(token),
        }
    }

    /// Creates a manager that never touches the filesystem
    pub fn in_memory(token_ttl: Duration, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            file: None,
            token_ttl,
            state: Mutex::new(None),
        }
    }

    /// The token currently held, valid or not
    pub async fn current(&self) -> Option<CredentialToken> {
        self.state.lock().await.clone()
    }

    /// Returns a token valid at `now`, authenticating if needed
    ///
    /// Authentication failures are returned as-is; retrying is the caller's
    /// business. Concurrent callers share a single refresh.
    pub async fn ensure_valid(&self, now: DateTime<Utc>) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.as_ref() {
            if token.is_valid_at(now) {
                return Ok(token.token.clone());
            }
            debug!(expires_at = %token.expires_at, "credential expired");
            *state = None;
        }

        let grant = self.authenticator.authenticate().await?;
        if grant.token.is_empty() {
            return Err(Error::AuthenticationFailed {
                message: "Authorization response carried no token".to_string(),
                detail: None,
            });
        }

        let token = CredentialToken {
            token: grant.token,
            role: grant.role,
            accessed_at: now,
            expires_at: now + self.token_ttl,
        };
        if let Some(file) = self.file.clone() {
            let path = file.path().to_path_buf();
            let persisted = token.clone();
            match tokio::task::spawn_blocking(move || file.write(&persisted)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(path = %path.display(), error = %err, "cannot persist credential")
                }
                Err(err) => warn!(path = %path.display(), error = %err, "credential write task failed"),
            }
        }
        info!(role = %token.role, expires_at = %token.expires_at, "obtained new credential");

        let value = token.token.clone();
        *state = Some(token);
        Ok(value)
    }

    /// Forgets the current token, in memory and on disk
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = None;
        self.forget_persisted().await;
        debug!("credential invalidated");
    }

    /// Forgets the current token only if it is still `rejected`
    ///
    /// A token another caller obtained after `rejected` was handed out is
    /// kept. Returns whether the credential was dropped.
    pub async fn invalidate_token(&self, rejected: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.as_ref() {
            Some(token) if token.token == rejected => {
                *state = None;
                self.forget_persisted().await;
                debug!("rejected credential invalidated");
                true
            }
            Some(_) => {
                debug!("credential already refreshed, keeping it");
                false
            }
            None => false,
        }
    }

    async fn forget_persisted(&self) {
        let Some(file) = self.file.clone() else {
            return;
        };
        let path = file.path().to_path_buf();
        match tokio::task::spawn_blocking(move || file.remove()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(path = %path.display(), error = %err, "cannot remove credential file")
            }
            Err(err) => warn!(path = %path.display(), error = %err, "credential removal task failed"),
        }
    }
}
