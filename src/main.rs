//! Scanlate - webtoon and manga chapter translation pipeline.
//!
//! A tool for fetching, translating, and republishing webtoon chapters
//! from various hosting sites.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanlate::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "scanlate=info"
    } else {
        "scanlate=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
