//! Client context tying configuration, endpoints, cache and credentials together

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::api::{
    normalize_path, ApiResponse, EndpointTable, Fetched, HttpAuthenticator, RequestDescriptor,
    RequestOrchestrator, ReqwestTransport,
};
use crate::cache::{CacheManager, CacheStats, CleanupReport, ClearReport};
use crate::config::Settings;
use crate::credential::{CredentialManager, CREDENTIAL_FILE};
use crate::error::{Error, Result};

/// One configured connection to a SISTER deployment
///
/// Built once at startup and passed to whatever needs to fetch; there is no
/// process-wide instance.
pub struct SisterClient {
    endpoints: EndpointTable,
    base_url: Url,
    orchestrator: RequestOrchestrator,
}

impl SisterClient {
    pub fn new(endpoints: EndpointTable, base_url: Url, orchestrator: RequestOrchestrator) -> Self {
        Self {
            endpoints,
            base_url,
            orchestrator,
        }
    }

    /// Builds a client from validated settings
    ///
    /// Loads the API document, creates the HTTP client and restores any
    /// credential persisted in the cache directory.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let endpoints = EndpointTable::load(&settings.api_spec)?;
        let base_url = settings.ws_url(&endpoints)?;
        let cache_dir = settings.resolve_cache_dir()?;

        let transport = ReqwestTransport::new(settings.timeout())
            .map_err(|e| Error::Configuration(format!("cannot create HTTP client: {}", e)))?;
        let authenticator =
            HttpAuthenticator::new(transport.client().clone(), &base_url, settings.login()?)?;
        let credentials = CredentialManager::load(
            cache_dir.join(CREDENTIAL_FILE),
            settings.token_ttl(),
            Arc::new(authenticator),
        );
        let orchestrator = RequestOrchestrator::new(
            CacheManager::with_dir(cache_dir),
            credentials,
            Arc::new(transport),
            settings.cache_ttl(),
        );
        orchestrator.set_auto_cleanup(settings.auto_cleanup_cache);

        info!(
            base_url = %base_url,
            endpoints = endpoints.len(),
            sandbox = settings.use_sandbox,
            "client ready"
        );
        Ok(Self::new(endpoints, base_url, orchestrator))
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn orchestrator(&self) -> &RequestOrchestrator {
        &self.orchestrator
    }

    /// Resolves a logical path and its parameters into a request descriptor
    ///
    /// # Returns
    /// * `Err(Error::InvalidRequest)` for an empty path, a path the API
    ///   document does not declare, or a missing required parameter
    pub fn describe(&self, path: &str, params: &[(String, String)]) -> Result<RequestDescriptor> {
        let path = normalize_path(path)?;
        let endpoint = self
            .endpoints
            .endpoint(&path)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown endpoint '{}'", path)))?;
        RequestDescriptor::resolve(&self.base_url, &path, endpoint, params)
    }

    pub async fn fetch(&self, path: &str, params: &[(String, String)]) -> Result<Fetched> {
        self.fetch_at(path, params, Utc::now()).await
    }

    pub async fn fetch_at(
        &self,
        path: &str,
        params: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<Fetched> {
        let descriptor = self.describe(path, params)?;
        debug!(path = %descriptor.path_template, url = %descriptor.url, "fetching");
        self.orchestrator.fetch_at(&descriptor, now).await
    }

    /// Fetches `path` and folds the outcome into an [`ApiResponse`]
    pub async fn get_data(&self, path: &str, params: &[(String, String)]) -> ApiResponse {
        ApiResponse::from_result(self.fetch(path, params).await)
    }

    /// Enables or disables serving from the cache
    pub fn use_cache(&self, enabled: bool) {
        self.orchestrator.set_use_cache(enabled);
    }

    pub fn set_auto_cleanup(&self, enabled: bool) {
        self.orchestrator.set_auto_cleanup(enabled);
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.orchestrator.cache().stats()?)
    }

    pub fn cleanup_expired_cache(&self) -> Result<CleanupReport> {
        Ok(self.orchestrator.cache().cleanup_expired(Utc::now())?)
    }

    pub fn clear_all_cache(&self) -> Result<ClearReport> {
        Ok(self.orchestrator.cache().clear_all()?)
    }

    /// Evicts the cached entry for `path`; `Ok(false)` if there was none
    pub fn delete_cache_by_path(&self, path: &str) -> Result<bool> {
        Ok(self.orchestrator.cache().evict(path)?)
    }
}
