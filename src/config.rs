//! Connection settings and cache policy

use chrono::Duration;
use std::path::PathBuf;
use url::Url;

use crate::api::{EndpointTable, LoginCredentials};
use crate::cache::CacheManager;
use crate::error::{Error, Result};

/// Default location of the OpenAPI document
pub const DEFAULT_API_SPEC: &str = "config/api_spec.yaml";

/// Everything needed to talk to one SISTER deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root URL of the deployment, e.g. `https://sister.example.ac.id`
    pub sister_url: Option<String>,
    /// Use the sandbox server instead of production
    pub use_sandbox: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub id_pengguna: Option<String>,
    /// OpenAPI document describing the endpoints
    pub api_spec: PathBuf,
    /// Cache directory; the platform cache dir when unset
    pub cache_dir: Option<PathBuf>,
    pub cache_expiration_days: u32,
    pub token_ttl_minutes: u32,
    pub api_timeout_seconds: u64,
    pub auto_cleanup_cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sister_url: None,
            use_sandbox: true,
            username: None,
            password: None,
            id_pengguna: None,
            api_spec: PathBuf::from(DEFAULT_API_SPEC),
            cache_dir: None,
            cache_expiration_days: 1,
            token_ttl_minutes: 60,
            api_timeout_seconds: 30,
            auto_cleanup_cache: false,
        }
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !v.trim().is_empty())
}

impl Settings {
    /// Checks that every connection setting is present and well-formed
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("SISTER_URL", &self.sister_url),
            ("SISTER_USERNAME", &self.username),
            ("SISTER_PASSWORD", &self.password),
            ("SISTER_ID_PENGGUNA", &self.id_pengguna),
        ]
        .into_iter()
        .filter(|(_, value)| !present(value))
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "Missing required settings: {}",
                missing.join(", ")
            )));
        }

        self.root_url()?;
        if self.cache_expiration_days == 0 {
            return Err(Error::Configuration(
                "CACHE_EXPIRATION_DAYS must be at least 1".to_string(),
            ));
        }
        if self.api_timeout_seconds == 0 {
            return Err(Error::Configuration(
                "API_TIMEOUT_SECONDS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn root_url(&self) -> Result<Url> {
        let raw = self
            .sister_url
            .as_deref()
            .ok_or_else(|| Error::Configuration("SISTER_URL is not set".to_string()))?;
        let url = Url::parse(raw.trim())
            .map_err(|e| Error::Configuration(format!("{} is not a valid URL: {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Configuration(format!(
                "{} is not an http(s) URL",
                raw
            )));
        }
        Ok(url)
    }

    /// Base URL of the web service: the deployment root plus the server path
    /// the API document declares for sandbox or production
    pub fn ws_url(&self, endpoints: &EndpointTable) -> Result<Url> {
        let root = self.root_url()?;
        let server = if self.use_sandbox {
            endpoints.server_url("sandbox")
        } else {
            endpoints.production_server_url()
        };
        match server {
            None => Ok(root),
            Some(server) if server.starts_with("http://") || server.starts_with("https://") => {
                Url::parse(server)
                    .map_err(|e| Error::Configuration(format!("invalid server URL {}: {}", server, e)))
            }
            Some(server) => {
                let joined = format!(
                    "{}/{}",
                    root.as_str().trim_end_matches('/'),
                    server.trim_start_matches('/')
                );
                Url::parse(&joined)
                    .map_err(|e| Error::Configuration(format!("invalid server URL {}: {}", joined, e)))
            }
        }
    }

    pub fn login(&self) -> Result<LoginCredentials> {
        match (&self.username, &self.password, &self.id_pengguna) {
            (Some(username), Some(password), Some(id_pengguna)) => Ok(LoginCredentials {
                username: username.clone(),
                password: password.clone(),
                id_pengguna: id_pengguna.clone(),
            }),
            _ => Err(Error::Configuration(
                "SISTER_USERNAME, SISTER_PASSWORD and SISTER_ID_PENGGUNA are required".to_string(),
            )),
        }
    }

    /// Configured cache directory, or the platform cache dir
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        resolve_cache_dir(self.cache_dir.clone())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::days(i64::from(self.cache_expiration_days))
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::minutes(i64::from(self.token_ttl_minutes))
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.api_timeout_seconds)
    }
}

/// `explicit`, or `~/.cache/sister/` (platform equivalent) when unset
pub fn resolve_cache_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => CacheManager::default_dir().ok_or_else(|| {
            Error::Configuration(
                "cannot determine a cache directory, set SISTER_CACHE_DIR".to_string(),
            )
        }),
    }
}
