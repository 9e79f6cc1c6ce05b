//! SISTER client - fetch web service data through a local cache
//!
//! `sister fetch` prints the uniform JSON response on stdout; `sister cache`
//! inspects and maintains the cache directory without touching the network.

use std::io::{self, BufRead, Write};

use clap::Parser;
use tracing::debug;

use sister::api::ApiResponse;
use sister::cache::CacheManager;
use sister::cli::{CacheCommand, Cli, Command, FetchArgs};
use sister::config::resolve_cache_dir;
use sister::SisterClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    sister::logging::init(cli.verbose);

    match cli.command {
        Command::Fetch(args) => run_fetch(args, cli.cache_dir).await,
        Command::Cache(command) => {
            let cache = CacheManager::with_dir(resolve_cache_dir(cli.cache_dir)?);
            debug!(dir = %cache.cache_dir().display(), "using cache directory");
            run_cache(&cache, command)
        }
    }
}

async fn run_fetch(
    args: FetchArgs,
    cache_dir: Option<std::path::PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = args.settings(cache_dir);
    let client = SisterClient::from_settings(&settings)?;
    client.use_cache(!args.no_cache);

    let response: ApiResponse = client.get_data(&args.path, &args.params).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.status {
        Ok(())
    } else {
        Err(response.message.into())
    }
}

fn run_cache(cache: &CacheManager, command: CacheCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        CacheCommand::Stats => {
            let stats = cache.stats()?;
            println!("Total Cache Entries: {}", stats.count);
            println!(
                "Total Size: {:.2} MB ({} bytes)",
                stats.total_megabytes(),
                stats.total_payload_bytes
            );
        }
        CacheCommand::Cleanup => {
            let report = cache.cleanup_expired(chrono::Utc::now())?;
            println!("Removed {} expired cache entries", report.removed_count);
            println!("Remaining Cache Entries: {}", report.remaining_count);
        }
        CacheCommand::Clear { yes } => {
            if !yes && !confirm("Clear all cached responses? [y/N] ")? {
                println!("Cancelled");
                return Ok(());
            }
            let report = cache.clear_all()?;
            println!(
                "Cleared {} cache entries ({} files removed)",
                report.removed_count, report.removed_files
            );
        }
        CacheCommand::Delete { path } => {
            if cache.evict(&path)? {
                println!("Cache deleted for: {}", path);
            } else {
                println!("No cache found for: {}", path);
            }
        }
    }
    Ok(())
}

/// Asks a yes/no question on stdout; anything but y/yes is a no
fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
