//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! BOT_TOKEN=... cargo run -p cord-gateway
//! ```
//!
//! Configuration is loaded from environment variables. Every event is logged; stop with Ctrl-C.

use anyhow::Context;
use cord_common::{try_init_tracing_with_config, ClientConfig, TracingConfig};
use cord_core::EventType;
use cord_gateway::{EventDispatcher, ShardCoordinator, WebSocketConnector, WILDCARD};
use cord_http::RestClient;
use cord_ratelimit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const BUCKET_IDLE: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    let config = match ClientConfig::from_env().context("Failed to load configuration") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "Gateway client failed");
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    info!(
        env = ?config.app.env,
        shard_count = %config.gateway.shard_count,
        version = config.gateway.version,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(
        config.rest.global_requests_per_second,
        config.gateway.identify_interval(),
    ));
    let rest = Arc::new(RestClient::new(&config, Arc::clone(&limiter))?);

    let dispatcher = Arc::new(EventDispatcher::new(config.gateway.extra_intents));
    dispatcher.register_handler(EventType::Ready, |event| async move {
        info!(shard_id = event.shard_id, "Shard ready");
        Ok(())
    });
    dispatcher.register_handler(WILDCARD, |event| async move {
        info!(
            shard_id = event.shard_id,
            seq = event.sequence,
            event = %event.name,
            "Event received"
        );
        Ok(())
    });

    let prune = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                ticker.tick().await;
                limiter.prune_idle(BUCKET_IDLE);
            }
        })
    };

    let shard_count = config.gateway.shard_count;
    let coordinator = ShardCoordinator::new(
        config,
        rest,
        Arc::new(WebSocketConnector),
        limiter,
        dispatcher,
    )
    .with_status_callback(|shard_id, status| {
        info!(shard_id, status = ?status, "Shard status changed");
    });

    coordinator.start(shard_count).await?;
    info!("Gateway client running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    coordinator.shutdown().await;
    prune.abort();
    Ok(())
}
