//! Endpoint table built from the web service's OpenAPI document
//!
//! The document is parsed once at startup into a map from logical path to
//! [`Endpoint`]; fetches look their method and declared parameters up here
//! instead of generating accessors at runtime.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use super::transport::HttpMethod;
use crate::error::{Error, Result};

/// Where a parameter is bound in the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
}

/// A declared endpoint parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
}

/// Method and parameters of one logical path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub parameters: Vec<Parameter>,
}

impl Endpoint {
    pub fn new(method: HttpMethod, parameters: Vec<Parameter>) -> Self {
        Self { method, parameters }
    }
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    servers: Vec<ServerDoc>,
    #[serde(default)]
    paths: BTreeMap<String, PathItemDoc>,
    #[serde(default)]
    components: ComponentsDoc,
}

#[derive(Debug, Deserialize)]
struct ServerDoc {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct ComponentsDoc {
    #[serde(default)]
    parameters: BTreeMap<String, ParameterDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct PathItemDoc {
    #[serde(default)]
    parameters: Vec<ParameterRef>,
    get: Option<OperationDoc>,
    post: Option<OperationDoc>,
    patch: Option<OperationDoc>,
    delete: Option<OperationDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationDoc {
    #[serde(default)]
    parameters: Vec<ParameterRef>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ParameterRef {
    Ref {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Inline(ParameterDoc),
}

#[derive(Debug, Clone, Deserialize)]
struct ParameterDoc {
    name: String,
    #[serde(rename = "in")]
    location: String,
    #[serde(default)]
    required: bool,
}

const COMPONENT_PARAMETER_PREFIX: &str = "#/components/parameters/";

/// Logical path to endpoint lookup table
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    servers: Vec<String>,
    endpoints: HashMap<String, Endpoint>,
}

impl EndpointTable {
    /// Reads and parses the YAML document at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read API document {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses an OpenAPI-style YAML document
    ///
    /// When a path declares several operations the first of GET, POST,
    /// PATCH, DELETE is used. Header and cookie parameters are ignored.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let doc: Document = serde_yaml::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid API document: {}", e)))?;

        let mut endpoints = HashMap::with_capacity(doc.paths.len());
        for (path, item) in &doc.paths {
            let (method, operation) = match (&item.get, &item.post, &item.patch, &item.delete) {
                (Some(op), _, _, _) => (HttpMethod::Get, op),
                (None, Some(op), _, _) => (HttpMethod::Post, op),
                (None, None, Some(op), _) => (HttpMethod::Patch, op),
                (None, None, None, Some(op)) => (HttpMethod::Delete, op),
                (None, None, None, None) => continue,
            };

            let mut parameters: Vec<Parameter> = Vec::new();
            for param in item.parameters.iter().chain(&operation.parameters) {
                let Some(param) = resolve_parameter(param, &doc.components)? else {
                    continue;
                };
                // Operation-level parameters override path-level ones.
                parameters.retain(|p| p.name != param.name);
                parameters.push(param);
            }
            endpoints.insert(path.clone(), Endpoint::new(method, parameters));
        }

        Ok(Self {
            servers: doc.servers.into_iter().map(|s| s.url).collect(),
            endpoints,
        })
    }

    /// Builds a table from explicit entries, without servers
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = (String, Endpoint)>) -> Self {
        Self {
            servers: Vec::new(),
            endpoints: endpoints.into_iter().collect(),
        }
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// First server URL containing `name`, case-insensitively
    pub fn server_url(&self, name: &str) -> Option<&str> {
        let needle = name.to_lowercase();
        self.servers
            .iter()
            .find(|url| url.to_lowercase().contains(&needle))
            .map(String::as_str)
    }

    /// Production server: the first one that is not a sandbox
    pub fn production_server_url(&self) -> Option<&str> {
        self.servers
            .iter()
            .find(|url| !url.to_lowercase().contains("sandbox"))
            .map(String::as_str)
    }

    pub fn endpoint(&self, path: &str) -> Option<&Endpoint> {
        self.endpoints.get(path)
    }

    /// All logical paths, sorted
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

fn resolve_parameter(param: &ParameterRef, components: &ComponentsDoc) -> Result<Option<Parameter>> {
    let doc = match param {
        ParameterRef::Inline(doc) => doc,
        ParameterRef::Ref { reference } => {
            let name = reference
                .strip_prefix(COMPONENT_PARAMETER_PREFIX)
                .ok_or_else(|| {
                    Error::Configuration(format!("unsupported parameter reference '{}'", reference))
                })?;
            components.parameters.get(name).ok_or_else(|| {
                Error::Configuration(format!("unknown parameter reference '{}'", reference))
            })?
        }
    };

    let location = match doc.location.as_str() {
        "path" => ParamLocation::Path,
        "query" => ParamLocation::Query,
        _ => return Ok(None),
    };
    Ok(Some(Parameter {
        name: doc.name.clone(),
        location,
        // Path parameters are always required.
        required: doc.required || location == ParamLocation::Path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
openapi: 3.0.0
info:
  title: SISTER
  version: "1.0"
servers:
  - url: /ws-sandbox.php/1.0
  - url: /ws.php/1.0
paths:
  /authorize:
    post:
      summary: Request a token
  /referensi/sdm:
    get:
      parameters:
        - name: nidn
          in: query
          required: false
        - $ref: '#/components/parameters/NamaParam'
  /sdm/{id_sdm}:
    parameters:
      - name: id_sdm
        in: path
    get:
      parameters:
        - name: Authorization
          in: header
          required: true
components:
  parameters:
    NamaParam:
      name: nama
      in: query
      required: true
"#;

    #[test]
    fn test_parses_servers_and_paths() {
        let table = EndpointTable::from_yaml_str(DOCUMENT).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.paths(), vec!["/authorize", "/referensi/sdm", "/sdm/{id_sdm}"]);
        assert_eq!(table.server_url("sandbox"), Some("/ws-sandbox.php/1.0"));
        assert_eq!(table.production_server_url(), Some("/ws.php/1.0"));
    }

    #[test]
    fn test_endpoint_method_and_parameters() {
        let table = EndpointTable::from_yaml_str(DOCUMENT).unwrap();

        let authorize = table.endpoint("/authorize").unwrap();
        assert_eq!(authorize.method, HttpMethod::Post);
        assert!(authorize.parameters.is_empty());

        let sdm = table.endpoint("/referensi/sdm").unwrap();
        assert_eq!(sdm.method, HttpMethod::Get);
        assert_eq!(
            sdm.parameters,
            vec![
                Parameter {
                    name: "nidn".to_string(),
                    location: ParamLocation::Query,
                    required: false,
                },
                Parameter {
                    name: "nama".to_string(),
                    location: ParamLocation::Query,
                    required: true,
                },
            ]
        );
    }

    #[test]
    fn test_path_level_parameters_are_inherited() {
        let table = EndpointTable::from_yaml_str(DOCUMENT).unwrap();
        let detail = table.endpoint("/sdm/{id_sdm}").unwrap();
        assert_eq!(detail.parameters.len(), 1, "header parameters are ignored");
        assert_eq!(detail.parameters[0].location, ParamLocation::Path);
        assert!(detail.parameters[0].required);
    }

    #[test]
    fn test_unknown_reference_is_a_configuration_error() {
        let doc = r#"
paths:
  /x:
    get:
      parameters:
        - $ref: '#/components/parameters/Missing'
"#;
        let err = EndpointTable::from_yaml_str(doc).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_yaml_is_a_configuration_error() {
        let err = EndpointTable::from_yaml_str("paths: [unclosed").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
