//! SISTER web service client library
//!
//! Cache-first fetching with bearer-token refresh. The modules are public so
//! the binary and the integration tests share the same building blocks.

pub mod api;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod logging;
pub mod persist;

pub use client::SisterClient;
pub use error::{Error, Result};
