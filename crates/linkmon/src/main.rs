use std::time::Duration;

use tracing::{error, info, warn};

use linkmon::{BatctlSource, LinkMonitor, TelemetrySource};
use taklink_core::{clock, config, status, Config, Throttle};

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
    let status_path = config.node_status_path();

    // Nothing to monitor without the provisioning-owned host map.
    let hosts = config::load_hostname_map(&config.hostname_map_path).map_err(|e| {
        error!(path = %config.hostname_map_path.display(), error = %e, "hostname map unavailable");
        e
    })?;
    if config.local_mac.is_none() {
        warn!("TAKLINK_LOCAL_MAC unset; the local node cannot be excluded from monitoring");
    }

    info!(
        nodes = hosts.len(),
        status = %status_path.display(),
        "linkmon starting"
    );

    let mut monitor = LinkMonitor::new(hosts, config.local_mac.clone(), config.link);
    if let Some(previous) = status::read_status(&status_path) {
        info!(nodes = previous.nodes.len(), "seeding counters from previous run");
        monitor.seed_from(&previous);
    }

    let mut source = BatctlSource::new();
    let mut telemetry_warn = Throttle::per_minute();
    let mut write_warn = Throttle::per_minute();

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // A failed collection classifies like an empty mesh; the
                // monitor keeps running either way.
                let samples = match source.sample() {
                    Ok(samples) => samples,
                    Err(e) => {
                        if let Some(suppressed) = telemetry_warn.allow() {
                            warn!(error = %e, suppressed, "telemetry collection failed");
                        }
                        Vec::new()
                    }
                };

                let snapshot = monitor.apply_samples(&samples, clock::unix_secs());
                if let Err(e) = status::write_status(&status_path, &snapshot) {
                    if let Some(suppressed) = write_warn.allow() {
                        warn!(error = %e, suppressed, "status write failed");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("linkmon shutting down");
                break;
            }
        }
    }

    Ok(())
}
