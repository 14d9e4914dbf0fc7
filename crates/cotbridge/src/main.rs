use std::sync::Arc;

use tracing::{error, info};

use cotbridge::{egress, ingress, mcast, Bridge};
use taklink_core::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.base_dir)?;

    if config.upstream.is_empty() || config.downstream.is_empty() {
        error!("no multicast groups configured");
        return Err("no multicast groups configured".into());
    }

    let bridge = Arc::new(Bridge::new(&config)?);
    let local = Arc::new(mcast::local_addresses(config.bridge_ip));
    info!(
        upstream = config.upstream.len(),
        downstream = config.downstream.len(),
        local_addrs = local.len(),
        spool = %config.spool_dir().display(),
        "cotbridge starting"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut tasks = Vec::new();
    for group in &config.upstream {
        let socket = mcast::join_group(*group, config.bridge_ip).map_err(|e| {
            error!(group = %group, error = %e, "upstream bind failed");
            e
        })?;
        tasks.push(tokio::spawn(ingress::ingress_loop(
            bridge.clone(),
            socket,
            *group,
            local.clone(),
            shutdown_rx.clone(),
        )));
    }

    let sender = mcast::downstream_sender(config.bridge_ip)?;
    tasks.push(tokio::spawn(egress::egress_loop(
        bridge.clone(),
        sender,
        config.downstream.clone(),
        shutdown_rx.clone(),
    )));

    tokio::signal::ctrl_c().await?;
    info!("cotbridge shutting down");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
