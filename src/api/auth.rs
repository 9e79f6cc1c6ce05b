//! Credential exchange against the `/authorize` endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use tracing::debug;
use url::Url;

use super::transport::{RawResponse, TransportError};
use crate::credential::{AuthGrant, Authenticator};
use crate::error::{Error, Result};

const STATUS_SUCCESS: u16 = 200;

/// Account used to obtain a bearer token
#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
    pub id_pengguna: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("id_pengguna", &self.id_pengguna)
            .finish()
    }
}

/// Authenticates by posting the account to `<ws_url>/authorize`
#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    client: Client,
    authorize_url: Url,
    credentials: LoginCredentials,
}

impl HttpAuthenticator {
    pub fn new(client: Client, ws_url: &Url, credentials: LoginCredentials) -> Result<Self> {
        let authorize_url = Url::parse(&format!(
            "{}/authorize",
            ws_url.as_str().trim_end_matches('/')
        ))
        .map_err(|e| Error::Configuration(format!("invalid web service URL: {}", e)))?;
        Ok(Self {
            client,
            authorize_url,
            credentials,
        })
    }

    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }
}

fn remote(err: TransportError) -> Error {
    Error::AuthenticationFailed {
        message: err.to_string(),
        detail: None,
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self) -> Result<AuthGrant> {
        debug!(url = %self.authorize_url, user = %self.credentials.username, "requesting credential");
        let response = self
            .client
            .post(self.authorize_url.clone())
            .json(&self.credentials)
            .send()
            .await
            .map_err(|e| remote(e.into()))?;
        let raw = RawResponse::from_reqwest(response).await.map_err(remote)?;

        let Some(body) = raw.json_body() else {
            return Err(Error::AuthenticationFailed {
                message: "Response is not in JSON format, check your URL".to_string(),
                detail: None,
            });
        };

        if raw.status == STATUS_SUCCESS {
            return serde_json::from_value::<AuthGrant>(body).map_err(|e| {
                Error::AuthenticationFailed {
                    message: "Authorization response carried no token".to_string(),
                    detail: Some(e.to_string()),
                }
            });
        }

        let (message, detail) = raw.error_fields();
        Err(Error::AuthenticationFailed {
            message: message
                .unwrap_or_else(|| format!("Authorization failed with status {}", raw.status)),
            detail,
        })
    }
}
