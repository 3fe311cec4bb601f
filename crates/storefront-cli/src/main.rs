//! Storefront CLI - print a business's categories.
//!
//! Fetches the category list of one business through the same fetch policy
//! the storefront UI uses (cache, retries and all) and prints it as an
//! indented tree or as JSON.

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storefront_core::{ApiClient, BusinessId, Category, CategoryFetchPolicy, Config};

// ============================================================================
// Constants
// ============================================================================

const ENV_API_URL: &str = "STOREFRONT_API_URL";
const ENV_TOKEN: &str = "STOREFRONT_TOKEN";
const ENV_BUSINESS_ID: &str = "STOREFRONT_BUSINESS_ID";
const ENV_LOG_FILE: &str = "STOREFRONT_LOG_FILE";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr. When `STOREFRONT_LOG_FILE` is set they are also
/// written to that file; the returned guard must be held until exit so
/// buffered lines get flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_FILE).ok().filter(|p| !p.is_empty()) {
        Some(path) => {
            let path = Path::new(&path);
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path.file_name().unwrap_or(path.as_os_str());
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Print a storefront business's categories
#[derive(Parser, Debug)]
#[command(name = "storefront")]
#[command(version)]
struct Args {
    /// Business to show; defaults to $STOREFRONT_BUSINESS_ID, then the last business viewed
    business_id: Option<String>,

    /// Bearer token for the API; defaults to $STOREFRONT_TOKEN
    #[arg(long)]
    token: Option<String>,

    /// Print the category snapshot as JSON
    #[arg(long)]
    json: bool,

    /// Ignore cached data and fetch again
    #[arg(long)]
    refresh: bool,
}

/// Pick the business to show: command line, then environment, then the
/// last business viewed. Blank values fall through to the next source.
fn resolve_business(
    arg: Option<String>,
    env: Option<String>,
    last: Option<BusinessId>,
) -> Option<BusinessId> {
    arg.and_then(BusinessId::parse)
        .or_else(|| env.and_then(BusinessId::parse))
        .or(last)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _log_guard = init_tracing();

    let mut config = Config::load()?;

    let business = resolve_business(
        args.business_id.clone(),
        std::env::var(ENV_BUSINESS_ID).ok(),
        config.last_business(),
    );
    let token = args.token.clone().or_else(|| std::env::var(ENV_TOKEN).ok());
    let base_url = std::env::var(ENV_API_URL).unwrap_or_else(|_| config.api_base_url().to_string());

    let client = ApiClient::new(base_url)?;
    info!(base_url = client.base_url(), business = ?business, "Fetching categories");
    let policy = CategoryFetchPolicy::with_config(client, &config.query);

    let result = if args.refresh {
        policy.refetch(business.as_ref(), token.as_deref()).await
    } else {
        policy.fetch(business.as_ref(), token.as_deref()).await
    };
    let categories = result?;

    // `fetch` only succeeds with a business selected
    if let Some(business) = &business {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&policy.snapshot(business))?);
        } else {
            print_tree(business, &categories);
            if let Some(age) = policy.snapshot(business).age_display() {
                println!("\nUpdated {}", age);
            }
        }

        if config.last_business_id.as_deref() != Some(business.as_str()) {
            config.last_business_id = Some(business.to_string());
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
        }
    }

    Ok(())
}

fn print_tree(business: &BusinessId, categories: &[Category]) {
    if categories.is_empty() {
        println!("{} has no categories", business);
        return;
    }

    println!("Categories for {} ({})", business, categories.len());
    for (depth, category) in Category::tree_order(categories) {
        let indent = "  ".repeat(depth + 1);
        match &category.slug {
            Some(slug) => println!("{}{} [{}]", indent, category.name, slug),
            None => println!("{}{}", indent, category.name),
        }
    }
}
