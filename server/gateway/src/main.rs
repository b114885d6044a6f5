mod auth;
mod config;
mod gateway;
mod metrics_adapter;
mod state;

use anyhow::Result;
use clap::Parser;
use config::Config;
use dmr_metrics::{MetricsConfig, MetricsServer};
use dmr_router::{Bus, DefaultCallTracker, ParrotService, RegistrationTable, RoutingHub, SubscriptionManager};
use dmr_store::PgStore;
use gateway::Gateway;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();

    let ms = MetricsServer::install(MetricsConfig {
        listen: cfg.metrics_listen.clone(),
        namespace: "dmr",
    })?;
    tokio::spawn(async move {
        let _ = ms.serve().await;
    });

    let pool = PgPoolOptions::new()
        .max_connections(32)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("../store/migrations").run(&pool).await?;

    let store: Arc<dyn dmr_store::Store> = Arc::new(PgStore::new(pool));

    let shutdown = CancellationToken::new();

    let bus = Arc::new(Bus::new());
    let registrations = Arc::new(RegistrationTable::new());
    let call_tracker = Arc::new(DefaultCallTracker::new(Arc::clone(&store)));
    {
        let call_tracker = Arc::clone(&call_tracker);
        let shutdown = shutdown.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(dmr_router::CALL_IDLE_TIMEOUT);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => call_tracker.expire_idle().await,
                }
            }
        });
    }
    let call_tracker: Arc<dyn dmr_router::CallTracker> = call_tracker;
    let parrot = Arc::new(ParrotService::new(
        Arc::clone(&bus),
        Arc::clone(&call_tracker),
        shutdown.child_token(),
    ));
    let subscriptions = Arc::new(SubscriptionManager::with_channel_capacity(
        Arc::clone(&bus),
        Arc::clone(&store),
        Arc::clone(&registrations),
        shutdown.child_token(),
        cfg.channel_capacity,
    ));
    let hub = Arc::new(RoutingHub::new(
        Arc::clone(&bus),
        Arc::clone(&store),
        call_tracker,
        parrot,
        Arc::clone(&subscriptions),
        Arc::clone(&registrations),
    ));

    let gateway = Arc::new(
        Gateway::bind(
            &cfg,
            store,
            hub,
            subscriptions,
            registrations,
            shutdown.child_token(),
        )
        .await?,
    );

    tokio::select! {
        r = gateway.run() => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    }

    Ok(())
}
