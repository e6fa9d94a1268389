//! csrf-refresh - keeps a page's CSRF token fresh.
//!
//! With `--once`, fetches a token and prints the resulting header attribute.
//! Otherwise runs the JSON-lines page bridge on stdin/stdout while the
//! proactive refresh timer runs.

use anyhow::Context;
use clap::Parser;
use csrf_refresh::{
    run_bridge, spawn_refresh_loop, AuthFailureHandler, ChannelPage, CsrfTokenClient,
    HeaderStore, Settings,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "csrf-refresh", version, about)]
struct Args {
    /// JSON settings file
    #[arg(short, long, env = "CSRF_REFRESH_CONFIG")]
    config: Option<PathBuf>,

    /// Initial request-header attribute (a JSON object)
    #[arg(long)]
    headers: Option<String>,

    /// Fetch one token, print the header attribute and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "csrf_refresh=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    let client = CsrfTokenClient::new(&settings).context("building token client")?;
    info!(endpoint = %client.endpoint(), "csrf token endpoint");
    let headers = HeaderStore::new(args.headers);
    let (bus, _refresh_loop) = spawn_refresh_loop(Arc::new(client), headers.clone(), &settings);

    if args.once {
        bus.request_token().await.context("refreshing csrf token")?;
        let out = json!({
            "headers": headers.attribute().await,
            "refreshedAt": bus.last_refreshed_at().await,
        });
        println!("{out}");
        return Ok(());
    }

    let (page, page_events) = ChannelPage::new();
    let handler = AuthFailureHandler::new(bus, Arc::new(page), &settings);
    let input = BufReader::new(tokio::io::stdin());

    tokio::select! {
        res = run_bridge(&handler, page_events, input, tokio::io::stdout()) => res?,
        _ = tokio::signal::ctrl_c() => {}
    }

    Ok(())
}
