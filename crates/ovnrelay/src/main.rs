use std::sync::Arc;

use tracing::info;

use ovn::{Keypair, MemoryHub, OverlayTransport};
use ovnrelay::{discovery, PeerDiscovery, Relay};
use taklink_core::{clock, config, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cfg = Config::from_env();
    std::fs::create_dir_all(&cfg.base_dir)?;

    // Give the radio time to settle before the transport comes up.
    if !cfg.startup_delay.is_zero() {
        info!(seconds = cfg.startup_delay.as_secs(), "waiting for radio");
        tokio::time::sleep(cfg.startup_delay).await;
    }

    // Fresh identity each run; peers pick up the new destination from our
    // announces. The in-process driver stands in until a radio driver is
    // configured.
    let keypair = Keypair::generate();
    let hub = MemoryHub::new();
    let (transport, events) = hub.join(&keypair, config::APP_NAME, config::ASPECT);
    let transport: Arc<dyn OverlayTransport> = Arc::new(transport);

    info!(
        destination = %transport.local_destination(),
        identity = %keypair.public_key_hex(),
        "overlay up"
    );

    let peer_discovery = Arc::new(PeerDiscovery::new(
        cfg.peer_discovery_path(),
        transport.local_destination(),
        cfg.peer_timeout,
        clock::unix_secs(),
    )?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let announcer = tokio::spawn(discovery::announce_loop(
        transport.clone(),
        peer_discovery.clone(),
        config::local_hostname(),
        cfg.announce_interval,
        shutdown_rx.clone(),
    ));

    let relay = Relay::new(cfg, transport, peer_discovery)?;
    relay.run(events, shutdown_rx).await;

    announcer.abort();
    info!("ovnrelay stopped");
    Ok(())
}
