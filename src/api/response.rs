//! Uniform result shape handed back to callers

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::Payload;
use crate::error::Result;

/// A successful fetch together with its cache provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub value: Payload,
    /// Whether the value came from the local cache
    pub from_cache: bool,
    /// When the value was fetched from the web service
    pub accessed_at: DateTime<Utc>,
    /// When the cached copy goes stale; `None` if the value was not cached
    pub expires_at: Option<DateTime<Utc>>,
}

/// Success flag, message, detail, data and provenance of one fetch
///
/// Failures are folded into the same shape: `status` is false, `message`
/// and `detail` carry the error and `data` is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: bool,
    pub message: String,
    pub detail: String,
    #[serde(serialize_with = "serialize_payload")]
    pub data: Payload,
    #[serde(rename = "content-type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub from_cache: bool,
    pub accessed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiResponse {
    pub fn from_result(result: Result<Fetched>) -> Self {
        match result {
            Ok(fetched) => Self {
                status: true,
                message: String::new(),
                detail: String::new(),
                content_type: fetched.value.content_type().map(str::to_string),
                data: fetched.value,
                from_cache: fetched.from_cache,
                accessed_at: Some(fetched.accessed_at),
                expires_at: fetched.expires_at,
            },
            Err(err) => Self {
                status: false,
                message: err.message(),
                detail: err.detail().unwrap_or_default().to_string(),
                data: Payload::Empty,
                content_type: None,
                from_cache: false,
                accessed_at: None,
                expires_at: None,
            },
        }
    }
}

fn serialize_payload<S: serde::Serializer>(
    payload: &Payload,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    payload.to_json().serialize(serializer)
}
