//! Web service access: endpoint table, request descriptors, transport and
//! the cache-first orchestrator

pub mod auth;
pub mod descriptor;
pub mod endpoints;
pub mod orchestrator;
pub mod response;
pub mod transport;

pub use auth::{HttpAuthenticator, LoginCredentials};
pub use descriptor::{normalize_path, RequestDescriptor};
pub use endpoints::{Endpoint, EndpointTable, ParamLocation, Parameter};
pub use orchestrator::{RequestOrchestrator, STATUS_TOKEN_INVALID};
pub use response::{ApiResponse, Fetched};
pub use transport::{HttpMethod, RawResponse, ReqwestTransport, Transport, TransportError};
