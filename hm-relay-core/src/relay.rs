//! Bootstrap orchestration: configuration, device resolution, one
//! forwarder per cloud broker in use, the health endpoint, and orderly
//! shutdown.

use crate::forwarder::{Forwarder, Side};
use crate::health::{BrokerHealth, HealthServer, HealthState};
use crate::registry::DeviceRegistry;
use hm_relay_error::{HmError, HmResult};
use hm_relay_models::broker::BrokerCatalog;
use hm_relay_models::config::BridgeConfig;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct HmRelay {
    forwarders: Vec<Arc<Forwarder>>,
    health: HealthServer,
    cancel: CancellationToken,
}

impl HmRelay {
    /// Load config and catalog, resolve the device set, and start every
    /// component. Any error here is fatal to the process.
    pub async fn init(config_path: &Path, brokers_path: &Path) -> HmResult<Self> {
        let config = BridgeConfig::load(config_path)?;
        info!(path = %config_path.display(), "configuration loaded");

        let catalog = BrokerCatalog::load(brokers_path)?;
        if catalog.is_empty() {
            return Err(HmError::Config("broker catalog is empty".to_string()));
        }
        info!(path = %brokers_path.display(), "broker catalog loaded");

        let registry = DeviceRegistry::bootstrap(&config, &catalog).await?;

        let cancel = CancellationToken::new();
        let default_inverse = config.inverse_forwarding.unwrap_or(false);
        let mut forwarders = Vec::new();
        for (broker_id, devices) in registry.by_broker() {
            let broker = catalog
                .get(&broker_id)
                .ok_or_else(|| HmError::UnknownBroker(broker_id.clone()))?;
            forwarders.push(Forwarder::spawn(
                broker_id,
                broker,
                devices,
                &config.broker_url,
                default_inverse,
                cancel.child_token(),
            )?);
        }

        let health = HealthServer::start(HealthState {
            brokers: forwarders
                .iter()
                .map(|f| BrokerHealth {
                    broker_id: f.broker_id().to_string(),
                    cloud: f.healthy_flag(Side::Cloud),
                    local: f.healthy_flag(Side::Local),
                })
                .collect(),
        })?;

        info!(forwarders = forwarders.len(), "relay started");
        Ok(Self {
            forwarders,
            health,
            cancel,
        })
    }

    /// Run until SIGINT or SIGTERM, then shut everything down. In-flight
    /// publishes may be lost; no drain is attempted.
    pub async fn run(self) -> HmResult<()> {
        wait_for_shutdown_signal().await;
        self.shutdown().await
    }

    async fn shutdown(self) -> HmResult<()> {
        for forwarder in &self.forwarders {
            forwarder.stop();
        }
        self.cancel.cancel();
        self.health.stop().await;
        info!("relay stopped");
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler, waiting for SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = term.recv() => info!("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
