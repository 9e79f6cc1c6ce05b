//! Per-call request descriptors

use url::Url;

use super::endpoints::{Endpoint, ParamLocation};
use super::transport::HttpMethod;
use crate::error::{Error, Result};

/// Everything needed to perform and cache one logical request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    /// Logical path as declared, e.g. `/sdm/{id_sdm}`; cache keys derive from it
    pub path_template: String,
    /// Path with placeholders substituted
    pub resolved_path: String,
    pub path_params: Vec<(String, String)>,
    pub query_params: Vec<(String, String)>,
    /// Absolute URL to call
    pub url: Url,
}

/// Trims a logical path and makes sure it starts with `/`
///
/// Fails with [`Error::InvalidRequest`] when nothing but separators remains.
pub fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.trim_matches('/').is_empty() {
        return Err(Error::InvalidRequest(
            "path must be a non-empty endpoint identifier".to_string(),
        ));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(Error::InvalidRequest(format!(
            "path '{}' must not contain whitespace",
            trimmed
        )));
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{}", trimmed))
    }
}

impl RequestDescriptor {
    /// Resolves `path_template` against `base_url` with the given parameters
    ///
    /// Parameters named by a `{placeholder}` in the template are bound into
    /// the path; everything else becomes a query pair, in the order given.
    ///
    /// # Returns
    /// * `Err(Error::InvalidRequest)` if the path is empty, a required
    ///   parameter is missing, or a placeholder stays unresolved
    pub fn resolve(
        base_url: &Url,
        path_template: &str,
        endpoint: &Endpoint,
        params: &[(String, String)],
    ) -> Result<Self> {
        let path_template = normalize_path(path_template)?;

        for declared in endpoint.parameters.iter().filter(|p| p.required) {
            if !params.iter().any(|(name, _)| name == &declared.name) {
                return Err(Error::InvalidRequest(format!(
                    "missing required parameter '{}' for {}",
                    declared.name, path_template
                )));
            }
        }

        let mut path_params = Vec::new();
        let mut query_params = Vec::new();
        for (name, value) in params {
            let placeholder = format!("{{{}}}", name);
            let declared_in_path = endpoint
                .parameters
                .iter()
                .any(|p| &p.name == name && p.location == ParamLocation::Path);
            if declared_in_path || path_template.contains(&placeholder) {
                path_params.push((name.clone(), value.clone()));
            } else {
                query_params.push((name.clone(), value.clone()));
            }
        }

        let mut segments = Vec::new();
        for segment in path_template.split('/').filter(|s| !s.is_empty()) {
            let mut resolved = segment.to_string();
            for (name, value) in &path_params {
                resolved = resolved.replace(&format!("{{{}}}", name), value);
            }
            if resolved.contains('{') && resolved.contains('}') {
                return Err(Error::InvalidRequest(format!(
                    "unresolved placeholder in '{}'",
                    segment
                )));
            }
            segments.push(resolved);
        }

        let mut url = base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Configuration(format!("'{}' cannot be a base URL", base_url)))?
            .pop_if_empty()
            .extend(&segments);
        url.set_query(None);
        if !query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &query_params {
                pairs.append_pair(name, value);
            }
        }

        Ok(Self {
            method: endpoint.method,
            resolved_path: format!("/{}", segments.join("/")),
            path_template,
            path_params,
            query_params,
            url,
        })
    }
}
