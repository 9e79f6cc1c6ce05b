//! Command-line interface parsing for the SISTER client
//!
//! Every connection setting can come from a flag or from the environment
//! variable of the same meaning, so a `.env`-style shell setup keeps working.

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{Settings, DEFAULT_API_SPEC};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A `--param` value is not of the form `name=value`
    #[error("Invalid parameter: '{0}'. Expected name=value")]
    InvalidParam(String),
}

/// SISTER client - fetch web service data through a local cache
#[derive(Parser, Debug)]
#[command(name = "sister")]
#[command(about = "Cached client for the SISTER web service")]
#[command(version)]
pub struct Cli {
    /// Cache directory (defaults to the platform cache dir)
    #[arg(long, global = true, env = "SISTER_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch an endpoint, serving from the cache when fresh
    ///
    /// Examples:
    ///   sister fetch /referensi/sdm -p nidn=0219128601
    ///   sister fetch /sdm/{id_sdm} -p id_sdm=abc --no-cache
    Fetch(FetchArgs),

    /// Inspect or maintain the local cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Logical endpoint path as declared in the API document
    pub path: String,

    /// Request parameter, repeatable
    #[arg(short, long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Skip cache lookups; the response is still cached
    #[arg(long)]
    pub no_cache: bool,

    /// Remove expired cache entries before fetching
    #[arg(long, env = "AUTO_CLEANUP_CACHE", value_parser = BoolishValueParser::new())]
    pub auto_cleanup: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Connection settings shared by every command that talks to the web service
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Root URL of the SISTER deployment
    #[arg(long, env = "SISTER_URL", value_name = "URL")]
    pub url: Option<String>,

    /// Use the sandbox server (true) or production (false)
    #[arg(
        long,
        env = "USE_SANDBOX",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        value_name = "BOOL"
    )]
    pub use_sandbox: bool,

    #[arg(long, env = "SISTER_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "SISTER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, env = "SISTER_ID_PENGGUNA", value_name = "ID")]
    pub id_pengguna: Option<String>,

    /// OpenAPI document describing the endpoints
    #[arg(long, env = "SISTER_API_SPEC", default_value = DEFAULT_API_SPEC, value_name = "FILE")]
    pub api_spec: PathBuf,

    /// Days a cached response stays fresh
    #[arg(long, env = "CACHE_EXPIRATION_DAYS", default_value_t = 1, value_name = "DAYS")]
    pub cache_expiration_days: u32,

    /// Minutes an access token is trusted before re-authenticating
    #[arg(long, env = "TOKEN_TTL_MINUTES", default_value_t = 60, value_name = "MINUTES")]
    pub token_ttl_minutes: u32,

    /// HTTP timeout in seconds
    #[arg(long, env = "API_TIMEOUT_SECONDS", default_value_t = 30, value_name = "SECONDS")]
    pub api_timeout_seconds: u64,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CacheCommand {
    /// Show entry count and total size
    Stats,
    /// Remove expired entries
    Cleanup,
    /// Remove every entry
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Remove the entry for one endpoint path
    Delete {
        /// Logical endpoint path
        path: String,
    },
}

/// Parses a `name=value` parameter.
///
/// # Arguments
/// * `s` - The parameter string from CLI
///
/// # Returns
/// * `Ok((name, value))`; the value may be empty or contain `=`
/// * `Err(CliError::InvalidParam)` if there is no `=` or the name is empty
pub fn parse_param(s: &str) -> Result<(String, String), CliError> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(CliError::InvalidParam(s.to_string())),
    }
}

impl FetchArgs {
    /// Creates Settings from the parsed arguments.
    pub fn settings(&self, cache_dir: Option<PathBuf>) -> Settings {
        let connection = self.connection.clone();
        Settings {
            sister_url: connection.url,
            use_sandbox: connection.use_sandbox,
            username: connection.username,
            password: connection.password,
            id_pengguna: connection.id_pengguna,
            api_spec: connection.api_spec,
            cache_dir,
            cache_expiration_days: connection.cache_expiration_days,
            token_ttl_minutes: connection.token_ttl_minutes,
            api_timeout_seconds: connection.api_timeout_seconds,
            auto_cleanup_cache: self.auto_cleanup,
        }
    }
}
