//! Cache-first fetch with credential refresh
//!
//! A fetch consults the cache, falls back to the web service with a valid
//! bearer token, and writes the fresh result through to the cache. A
//! rejected token is refreshed and the call repeated exactly once.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::descriptor::RequestDescriptor;
use super::response::Fetched;
use super::transport::{RawResponse, Transport};
use crate::cache::{CacheError, CacheManager, Payload};
use crate::credential::CredentialManager;
use crate::error::{Error, Result};

/// Status the web service uses for a rejected or expired token
pub const STATUS_TOKEN_INVALID: u16 = 401;

/// How a raw response is handled
#[derive(Debug)]
enum Outcome {
    Success(Payload),
    Unauthorized { detail: Option<String> },
    Failed(Error),
}

/// Classifies a raw response
///
/// Any 2xx status is a success. JSON bodies are parsed, an empty body or a
/// JSON `null` is an empty value and anything else is kept as opaque bytes.
fn classify(raw: RawResponse) -> Outcome {
    if raw.status == STATUS_TOKEN_INVALID {
        let (_, detail) = raw.error_fields();
        return Outcome::Unauthorized { detail };
    }

    if !(200..300).contains(&raw.status) {
        let (message, detail) = raw.error_fields();
        return Outcome::Failed(Error::Remote {
            message: message.unwrap_or_else(|| format!("Request failed with status {}", raw.status)),
            detail,
        });
    }

    if raw.body.iter().all(u8::is_ascii_whitespace) {
        return Outcome::Success(Payload::Empty);
    }

    if raw.is_json() {
        return match raw.json_body() {
            Some(Value::Null) => Outcome::Success(Payload::Empty),
            Some(value) => Outcome::Success(Payload::Json(value)),
            None => Outcome::Failed(Error::Remote {
                message: "Response is not in JSON format".to_string(),
                detail: Some(String::from_utf8_lossy(&raw.body).chars().take(200).collect()),
            }),
        };
    }

    Outcome::Success(Payload::Binary {
        content_type: raw
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        bytes: raw.body,
    })
}

/// Coordinates the cache, the credential and the transport for each fetch
pub struct RequestOrchestrator {
    cache: CacheManager,
    credentials: CredentialManager,
    transport: Arc<dyn Transport>,
    cache_ttl: Duration,
    use_cache: AtomicBool,
    auto_cleanup: AtomicBool,
}

impl RequestOrchestrator {
    pub fn new(
        cache: CacheManager,
        credentials: CredentialManager,
        transport: Arc<dyn Transport>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            credentials,
            transport,
            cache_ttl,
            use_cache: AtomicBool::new(true),
            auto_cleanup: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Enables or disables cache lookups; results are cached either way
    pub fn set_use_cache(&self, enabled: bool) {
        self.use_cache.store(enabled, Ordering::Relaxed);
    }

    /// Enables or disables expired-entry cleanup before every fetch
    pub fn set_auto_cleanup(&self, enabled: bool) {
        self.auto_cleanup.store(enabled, Ordering::Relaxed);
    }

    pub fn auto_cleanup(&self) -> bool {
        self.auto_cleanup.load(Ordering::Relaxed)
    }

    pub async fn fetch(&self, descriptor: &RequestDescriptor) -> Result<Fetched> {
        self.fetch_at(descriptor, Utc::now()).await
    }

    /// Fetches `descriptor` as of `now`
    ///
    /// # Returns
    /// * `Ok(Fetched)` from the cache when a fresh entry exists, otherwise
    ///   from the web service
    /// * `Err(Error::InvalidRequest)` for an empty path
    /// * `Err(Error::AuthenticationFailed)` when no credential can be
    ///   obtained or the web service rejects a freshly obtained one
    /// * `Err(Error::Remote)` for any other failed call
    pub async fn fetch_at(
        &self,
        descriptor: &RequestDescriptor,
        now: DateTime<Utc>,
    ) -> Result<Fetched> {
        let path = descriptor.path_template.as_str();
        if CacheManager::key_of(path).is_empty() {
            return Err(Error::InvalidRequest(
                "path must be a non-empty endpoint identifier".to_string(),
            ));
        }

        if self.auto_cleanup() {
            if let Err(err) = self.with_cache(move |cache| cache.cleanup_expired(now)).await {
                warn!(error = %err, "automatic cache cleanup failed");
            }
        }

        if self.use_cache.load(Ordering::Relaxed) {
            let key = path.to_string();
            match self.with_cache(move |cache| cache.lookup(&key, now)).await {
                Ok(Some(hit)) if hit.is_fresh() => {
                    return Ok(Fetched {
                        value: hit.value,
                        from_cache: true,
                        accessed_at: hit.entry.accessed_at,
                        expires_at: Some(hit.entry.expires_at),
                    });
                }
                Ok(_) => {}
                Err(err) => warn!(%path, error = %err, "cache lookup failed, fetching"),
            }
        }

        let value = self.fetch_remote(descriptor, now).await?;

        let key = path.to_string();
        let stored = value.clone();
        let ttl = self.cache_ttl;
        let saved = self
            .with_cache(move |cache| cache.save(&key, &stored, ttl, now))
            .await;
        let expires_at = match saved {
            Ok(entry) => Some(entry.expires_at),
            Err(CacheError::Serialization(reason)) => {
                debug!(%path, %reason, "response not cacheable");
                None
            }
            Err(err) => {
                warn!(%path, error = %err, "cannot cache response");
                None
            }
        };

        Ok(Fetched {
            value,
            from_cache: false,
            accessed_at: now,
            expires_at,
        })
    }

    /// Runs a cache operation on the blocking pool
    ///
    /// Index locks block the calling thread until granted.
    async fn with_cache<T, F>(&self, op: F) -> std::result::Result<T, CacheError>
    where
        F: FnOnce(&CacheManager) -> std::result::Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let cache = self.cache.clone();
        let cache_dir = cache.cache_dir().to_path_buf();
        tokio::task::spawn_blocking(move || op(&cache))
            .await
            .unwrap_or_else(|err| {
                Err(CacheError::Io {
                    path: cache_dir,
                    source: io::Error::new(io::ErrorKind::Other, err),
                })
            })
    }

    async fn fetch_remote(&self, descriptor: &RequestDescriptor, now: DateTime<Utc>) -> Result<Payload> {
        let mut fresh_attempt = false;
        loop {
            let token = self.credentials.ensure_valid(now).await?;
            debug!(method = %descriptor.method, url = %descriptor.url, "calling web service");
            let raw = self
                .transport
                .perform(descriptor.method, &descriptor.url, &token)
                .await
                .map_err(|err| Error::Remote {
                    message: err.to_string(),
                    detail: None,
                })?;

            match classify(raw) {
                Outcome::Success(value) => return Ok(value),
                Outcome::Failed(err) => return Err(err),
                Outcome::Unauthorized { detail } if fresh_attempt => {
                    self.credentials.invalidate_token(&token).await;
                    return Err(Error::AuthenticationFailed {
                        message: "API key invalid, check your credential".to_string(),
                        detail,
                    });
                }
                Outcome::Unauthorized { .. } => {
                    warn!(path = %descriptor.path_template, "credential rejected, re-authenticating");
                    self.credentials.invalidate_token(&token).await;
                    fresh_attempt = true;
                }
            }
        }
    }
}
