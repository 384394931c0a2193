//! Health endpoint: a plain status reflector over the forwarders'
//! connection flags.

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpResponse, HttpServer};
use chrono::Utc;
use hm_relay_error::{HmError, HmResult};
use hm_relay_models::constants::HEALTH_BIND;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Connection flags of one forwarder, shared with its event tasks.
#[derive(Clone)]
pub struct BrokerHealth {
    pub broker_id: String,
    pub cloud: Arc<AtomicBool>,
    pub local: Arc<AtomicBool>,
}

#[derive(Clone, Default)]
pub struct HealthState {
    pub brokers: Vec<BrokerHealth>,
}

/// `GET /health`. The `local` flag is the conjunction of every forwarder's
/// local session; each broker id reflects its cloud session.
async fn health(state: web::Data<HealthState>) -> HttpResponse {
    let mut brokers = serde_json::Map::new();
    let mut local_ok = true;
    for b in &state.brokers {
        brokers.insert(b.broker_id.clone(), json!(b.cloud.load(Ordering::Acquire)));
        local_ok &= b.local.load(Ordering::Acquire);
    }
    brokers.insert("local".to_string(), json!(local_ok));

    HttpResponse::Ok().json(json!({
        "status": "ok",
        "brokers": brokers,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// The spawned health server; unknown paths get actix's default 404.
pub struct HealthServer {
    handle: ServerHandle,
}

impl HealthServer {
    pub fn start(state: HealthState) -> HmResult<Self> {
        let data = web::Data::new(state);
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .route("/health", web::get().to(health))
        })
        .workers(1)
        .bind(HEALTH_BIND)
        .map_err(|e| HmError::Msg(format!("cannot bind health endpoint {HEALTH_BIND}: {e}")))?
        .run();

        let handle = server.handle();
        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "health endpoint failed");
            }
        });
        info!(bind = HEALTH_BIND, "health endpoint started");
        Ok(Self { handle })
    }

    pub async fn stop(&self) {
        self.handle.stop(true).await;
    }
}
