//! Per-broker forwarder: two long-lived MQTT sessions, the decision
//! engine, and the background sweep.

mod engine;
mod limiter;
mod mqtt;
mod topics;

pub use engine::{ForwardEngine, ForwardPlan};
pub use topics::{DeviceRoute, Role, Side};

use hm_relay_error::HmResult;
use hm_relay_models::constants::{MAP_SWEEP_INTERVAL, RELAY_PROPERTY, RELAY_TAG_LEN};
use hm_relay_models::{BrokerDefinition, Device};
use rumqttc::v5::mqttbytes::v5::{Packet, Publish, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One MQTT session and its liveness flag.
struct ConnectionEntry {
    client: AsyncClient,
    healthy: Arc<AtomicBool>,
}

impl ConnectionEntry {
    fn new(client: AsyncClient) -> Self {
        Self {
            client,
            healthy: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// A forwarder owns the device subset bound to one cloud broker and the
/// session pair bridging it to the local broker. Lives for the process
/// lifetime; reconnection is the MQTT library's business.
pub struct Forwarder {
    broker_id: String,
    engine: ForwardEngine,
    local: ConnectionEntry,
    cloud: ConnectionEntry,
    cancel: CancellationToken,
}

impl Forwarder {
    /// Build the session pair, spawn the two event tasks and the sweeper.
    pub fn spawn(
        broker_id: String,
        broker: &BrokerDefinition,
        devices: Vec<Device>,
        local_broker_url: &str,
        default_inverse: bool,
        cancel: CancellationToken,
    ) -> HmResult<Arc<Self>> {
        let mut routes = Vec::with_capacity(devices.len());
        for device in devices {
            routes.push(DeviceRoute::new(device, broker, default_inverse)?);
        }

        let instance_tag = random_instance_tag();
        info!(
            broker_id = %broker_id,
            devices = routes.len(),
            instance_tag = %instance_tag,
            "starting forwarder"
        );

        let (local_client, local_events) = mqtt::local_session(local_broker_url)?;
        let (cloud_client, cloud_events) = mqtt::cloud_session(broker)?;

        let forwarder = Arc::new(Self {
            broker_id,
            engine: ForwardEngine::new(instance_tag, routes),
            local: ConnectionEntry::new(local_client),
            cloud: ConnectionEntry::new(cloud_client),
            cancel,
        });

        tokio::spawn(Arc::clone(&forwarder).run_side(Side::Local, local_events));
        tokio::spawn(Arc::clone(&forwarder).run_side(Side::Cloud, cloud_events));
        tokio::spawn(Arc::clone(&forwarder).run_sweeper());

        Ok(forwarder)
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    /// Liveness flag of one session, shared with the health endpoint.
    pub fn healthy_flag(&self, side: Side) -> Arc<AtomicBool> {
        Arc::clone(&self.entry(side).healthy)
    }

    /// Ends both sessions; the event tasks disconnect and exit.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn entry(&self, side: Side) -> &ConnectionEntry {
        match side {
            Side::Local => &self.local,
            Side::Cloud => &self.cloud,
        }
    }

    /// Drive one session's event loop until shutdown. Connection errors
    /// are logged; the library reconnects on the next poll.
    async fn run_side(self: Arc<Self>, side: Side, mut events: EventLoop) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.entry(side).healthy.store(false, Ordering::Release);
                    let _ = self.entry(side).client.disconnect().await;
                    info!(broker_id = %self.broker_id, side = side.as_str(), "session closed");
                    break;
                }
                polled = events.poll() => match polled {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(broker_id = %self.broker_id, side = side.as_str(), "connected");
                        self.entry(side).healthy.store(true, Ordering::Release);
                        self.subscribe_side(side).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(side, &publish).await;
                    }
                    Ok(Event::Incoming(Packet::Disconnect(_))) => {
                        self.entry(side).healthy.store(false, Ordering::Release);
                        warn!(broker_id = %self.broker_id, side = side.as_str(), "server sent disconnect");
                    }
                    Ok(event) => {
                        debug!(broker_id = %self.broker_id, side = side.as_str(), ?event, "mqtt event");
                    }
                    Err(e) => {
                        self.entry(side).healthy.store(false, Ordering::Release);
                        warn!(
                            broker_id = %self.broker_id,
                            side = side.as_str(),
                            error = %e,
                            "session error, awaiting reconnect"
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => {}
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        }
                    }
                }
            }
        }
    }

    /// Issue the side's subscription set. Runs on every ConnAck so a
    /// resumed session ends up with exactly the same one topic per device.
    async fn subscribe_side(&self, side: Side) {
        let entry = self.entry(side);
        for topic in self.engine.subscriptions(side) {
            if let Err(e) = entry.client.subscribe(topic.clone(), QoS::AtMostOnce).await {
                warn!(
                    broker_id = %self.broker_id,
                    side = side.as_str(),
                    topic = %topic,
                    error = %e,
                    "subscribe failed"
                );
            } else {
                debug!(broker_id = %self.broker_id, side = side.as_str(), topic = %topic, "subscribed");
            }
        }
    }

    async fn handle_publish(&self, src: Side, publish: &Publish) {
        let topic = match std::str::from_utf8(&publish.topic) {
            Ok(t) => t,
            Err(_) => {
                warn!(broker_id = %self.broker_id, side = src.as_str(), "non-utf8 topic, dropping");
                return;
            }
        };
        let relay_tag = publish.properties.as_ref().and_then(|p| {
            p.user_properties
                .iter()
                .find(|(k, _)| k == RELAY_PROPERTY)
                .map(|(_, v)| v.as_str())
        });

        let Some(plan) = self.engine.plan(src, topic, &publish.payload, relay_tag) else {
            return;
        };

        let properties = PublishProperties {
            user_properties: vec![(
                RELAY_PROPERTY.to_string(),
                self.engine.instance_tag().to_string(),
            )],
            ..Default::default()
        };

        debug!(
            broker_id = %self.broker_id,
            from = src.as_str(),
            to = plan.target.as_str(),
            topic = %plan.topic,
            "forwarding message"
        );
        if let Err(e) = self
            .entry(plan.target)
            .client
            .publish_with_properties(
                plan.topic.clone(),
                QoS::AtMostOnce,
                false,
                publish.payload.clone(),
                properties,
            )
            .await
        {
            warn!(
                broker_id = %self.broker_id,
                side = plan.target.as_str(),
                topic = %plan.topic,
                error = %e,
                "publish failed"
            );
        }
    }

    async fn run_sweeper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(MAP_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.engine.sweep(),
            }
        }
    }
}

fn random_instance_tag() -> String {
    Uuid::new_v4().simple().to_string()[..RELAY_TAG_LEN].to_string()
}
