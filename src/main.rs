//! Deal notifier: polls a pricing source, ranks the best discounts and posts them to a chat webhook.

mod config;
mod deal_engine;
mod error;
mod routes;

use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use deal_engine::{scheduler, DealEngine, Trigger};

/// Deal finder bot
#[derive(Parser)]
#[command(name = "deal-notifier", about = "Posts the best current deals to a chat webhook")]
struct Cli {
    /// Run the pipeline once and exit, without the HTTP server or scheduler.
    #[arg(long)]
    once: bool,

    /// Log the webhook payload instead of posting it.
    #[arg(long)]
    dry_run: bool,
}

fn credential_status(value: Option<&str>) -> &'static str {
    match value {
        Some(v) if !v.is_empty() => "✅ Set",
        _ => "❌ Missing",
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deal_notifier=info,tower_http=info".into()),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("🤖 Deal Finder Bot starting...");

    let mut cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    cfg.engine.dry_run = cli.dry_run;

    info!(
        "Environment: source={}, api_key={}, webhook={}, affiliate_id={}",
        cfg.engine.source,
        credential_status(cfg.engine.upstream.api_key.as_deref()),
        credential_status(Some(cfg.engine.webhook_url.as_str())),
        cfg.engine.format.affiliate_tag,
    );
    info!(
        "Selection: discount {}..={}%, min_price={:?}, top {}",
        cfg.engine.thresholds.min_discount,
        cfg.engine.thresholds.max_discount,
        cfg.engine.thresholds.min_price,
        cfg.engine.thresholds.top_n,
    );

    let engine = match DealEngine::new(cfg.engine.clone()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.once {
        engine.run_once(Trigger::Once).await;
        return;
    }

    // Run once on startup
    let startup = engine.clone();
    tokio::spawn(async move {
        startup.run_once(Trigger::Startup).await;
    });

    scheduler::spawn(engine.clone(), cfg.run_interval);
    info!(
        "✅ Bot is running. {} deals will be fetched every {}s.",
        engine.config().source,
        cfg.run_interval.as_secs()
    );

    let app = routes::trigger::trigger_routes(engine).layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", cfg.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind port {}: {}", cfg.port, e);
            std::process::exit(1);
        }
    };
    info!("📡 Listening on port {}", cfg.port);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("HTTP server error: {}", e);
    }

    info!("👋 Bot shutting down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
