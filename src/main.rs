use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use notification_dispatch::{
    api::run_api_server,
    clients::{
        broker::ConnectionManager,
        consumer::{Consumer, MessageHandler},
        delivery::DeliveryForwarder,
        health::HealthChecker,
        publisher::Publisher,
        rbmq::RabbitMqClient,
        redis::RedisStatusStore,
        service::ServiceClients,
    },
    config::Config,
    models::topology::Topology,
};
use tokio::{signal, task::JoinSet, time::sleep};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CONSUMER_RESTART_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    init_tracing();

    info!(service = %config.service_name, "Starting notification dispatch worker");

    let manager: Arc<dyn ConnectionManager> = Arc::new(RabbitMqClient::new(&config));
    let publisher = Publisher::new(Arc::clone(&manager), config.max_pending_publishes);

    let mut consumer = Consumer::new(
        Arc::clone(&manager),
        publisher,
        config.retry_policy(),
        usize::from(config.prefetch_count),
    );

    if let Some(redis_url) = &config.redis_url {
        match RedisStatusStore::connect(redis_url, &config).await {
            Ok(store) => consumer = consumer.with_status_store(Arc::new(store)),
            Err(e) => warn!(error = %e, "Status tracking disabled"),
        }
    }

    let consumer = Arc::new(consumer);
    let clients = ServiceClients::from_config(&config)?;
    let handler: Arc<dyn MessageHandler> = Arc::new(DeliveryForwarder::new(&clients));
    let health_checker = HealthChecker::new(&config.service_name, Arc::clone(&manager), clients.all());

    let mut workers = JoinSet::new();
    for (queue, _) in Topology::standard().live_queues() {
        workers.spawn(run_consumer(Arc::clone(&consumer), queue, Arc::clone(&handler)));
    }

    let server_port = config.server_port;
    let server = tokio::spawn(async move {
        if let Err(e) = run_api_server(server_port, health_checker).await {
            error!(error = %e, "Health check server stopped");
        }
    });

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping consumers");

    workers.abort_all();
    while workers.join_next().await.is_some() {}
    server.abort();

    manager.close().await;
    info!("Shutdown complete");

    Ok(())
}

/// Keeps a consumer attached to `queue`; each restart goes through `acquire`, which reconnects if needed.
async fn run_consumer(consumer: Arc<Consumer>, queue: &'static str, handler: Arc<dyn MessageHandler>) {
    loop {
        match consumer.consume(queue, Arc::clone(&handler)).await {
            Ok(()) => warn!(queue, "Consumer stream ended, restarting"),
            Err(e) => error!(queue, error = %e, "Consumer failed, restarting"),
        }

        sleep(CONSUMER_RESTART_DELAY).await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
