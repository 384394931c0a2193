//! The forwarding decision pipeline.
//!
//! Separated from the MQTT sessions so the whole pipeline - loop
//! rejection, device matching, direction policy, correlation window and
//! rate limiter - runs against injected clock instants in tests.

use super::limiter;
use super::topics::{DeviceRoute, Role, Side};
use hm_relay_models::constants::{APP_CORRELATION_WINDOW, RATE_LIMIT_WINDOW};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

/// A publish the engine wants performed on the mirror side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPlan {
    pub target: Side,
    pub topic: String,
}

/// Per-forwarder expiring maps, one mutex for all of them. Critical
/// sections are map lookups and timestamp compares only.
#[derive(Default)]
struct ExpiringMaps {
    /// deviceKey -> last app-originated forward toward the device.
    app_history: HashMap<String, Instant>,
    /// (deviceKey, code) -> last allowed cloud-bound emission.
    rate_limited: HashMap<(String, u32), Instant>,
}

pub struct ForwardEngine {
    instance_tag: String,
    routes: Vec<DeviceRoute>,
    state: Mutex<ExpiringMaps>,
}

impl ForwardEngine {
    pub fn new(instance_tag: String, routes: Vec<DeviceRoute>) -> Self {
        Self {
            instance_tag,
            routes,
            state: Mutex::new(ExpiringMaps::default()),
        }
    }

    /// Random tag attached to every publish of this forwarder.
    pub fn instance_tag(&self) -> &str {
        &self.instance_tag
    }

    pub fn routes(&self) -> &[DeviceRoute] {
        &self.routes
    }

    /// The subscription set for one side: exactly one topic per device.
    pub fn subscriptions(&self, side: Side) -> Vec<String> {
        self.routes
            .iter()
            .map(|r| r.subscription(side).to_string())
            .collect()
    }

    /// Decide what to do with a message received on `src`.
    ///
    /// `relay_tag` is the value of the relay user property when the
    /// incoming publish carried one - any value, own tag included, marks
    /// the message as already bridged.
    pub fn plan(
        &self,
        src: Side,
        topic: &str,
        payload: &[u8],
        relay_tag: Option<&str>,
    ) -> Option<ForwardPlan> {
        self.plan_at(Instant::now(), src, topic, payload, relay_tag)
    }

    fn plan_at(
        &self,
        now: Instant,
        src: Side,
        topic: &str,
        payload: &[u8],
        relay_tag: Option<&str>,
    ) -> Option<ForwardPlan> {
        if let Some(tag) = relay_tag {
            debug!(side = src.as_str(), topic, tag, "dropping already-relayed message");
            return None;
        }

        let Some((route, role)) = self
            .routes
            .iter()
            .find_map(|r| r.match_topic(src, topic).map(|role| (r, role)))
        else {
            debug!(side = src.as_str(), topic, "no configured device matches topic");
            return None;
        };

        // Only the intended direction crosses the bridge: the app role
        // travels toward the device's side and the device role back.
        let allowed = matches!(
            (src, role, route.inverse),
            (Side::Cloud, Role::App, false)
                | (Side::Cloud, Role::Device, true)
                | (Side::Local, Role::Device, false)
                | (Side::Local, Role::App, true)
        );
        if !allowed {
            debug!(
                side = src.as_str(),
                role = role.token(),
                inverse = route.inverse,
                device = %route.key,
                "direction policy rejects message"
            );
            return None;
        }

        let target = src.mirror();
        let mut maps = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match role {
            Role::App => {
                maps.app_history.insert(route.key.clone(), now);
                if target == Side::Cloud {
                    if let Some(code) = limiter::rate_limited_code(payload) {
                        if let Some(last) = maps.rate_limited.get(&(route.key.clone(), code)) {
                            let elapsed = now.duration_since(*last);
                            if elapsed < RATE_LIMIT_WINDOW {
                                let remaining = RATE_LIMIT_WINDOW - elapsed;
                                warn!(
                                    device = %route.key,
                                    code,
                                    remaining_ms = remaining.as_millis() as u64,
                                    "rate limit: suppressing cloud-bound command"
                                );
                                return None;
                            }
                        }
                        maps.rate_limited.insert((route.key.clone(), code), now);
                    }
                }
            }
            Role::Device => {
                // At most one device response per forwarded app command,
                // and only within the correlation window.
                let solicited = maps
                    .app_history
                    .get(&route.key)
                    .map_or(false, |t| now.duration_since(*t) <= APP_CORRELATION_WINDOW);
                if !solicited {
                    debug!(device = %route.key, "dropping unsolicited device message");
                    return None;
                }
                maps.app_history.remove(&route.key);
            }
        }
        drop(maps);

        Some(ForwardPlan {
            target,
            topic: route.topic(target, role),
        })
    }

    /// Drop entries older than twice their window. Lookups already gate by
    /// age; the sweep only bounds memory.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut maps = self.state.lock().unwrap_or_else(|e| e.into_inner());
        maps.app_history
            .retain(|_, t| now.duration_since(*t) <= APP_CORRELATION_WINDOW * 2);
        maps.rate_limited
            .retain(|_, t| now.duration_since(*t) <= RATE_LIMIT_WINDOW * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hm_relay_models::{BrokerDefinition, Device};
    use std::time::Duration;

    const REMOTE_ID: &str = "R123456789012345678901R";
    const CLOUD_APP: &str = "hame_energy/HMA-1/App/R123456789012345678901R/ctrl";
    const LOCAL_APP: &str = "hame_energy/HMA-1/App/aabbccddeeff/ctrl";
    const LOCAL_DEVICE: &str = "hame_energy/HMA-1/device/aabbccddeeff/ctrl";
    const CLOUD_DEVICE: &str = "hame_energy/HMA-1/device/R123456789012345678901R/ctrl";

    fn broker() -> BrokerDefinition {
        BrokerDefinition {
            url: "mqtts://broker.example:8883".to_string(),
            ca: String::new(),
            cert: String::new(),
            key: String::new(),
            client_id_prefix: None,
            topic_prefix: "hame_energy/".to_string(),
            local_topic_prefix: None,
            topic_encryption_key: None,
            min_versions: Default::default(),
            use_remote_topic_id_versions: Default::default(),
        }
    }

    fn device(inverse: bool) -> Device {
        Device {
            device_id: "0123456789012345678901".to_string(),
            mac: "aabbccddeeff".to_string(),
            device_type: "HMA-1".to_string(),
            version: Some(230.0),
            inverse_forwarding: Some(inverse),
            broker_id: "eu".to_string(),
            remote_id: REMOTE_ID.to_string(),
            use_remote_topic_id: false,
            salt: None,
            name: None,
        }
    }

    fn engine(inverse: bool) -> ForwardEngine {
        let route = DeviceRoute::new(device(inverse), &broker(), false).unwrap();
        ForwardEngine::new("a1b2c3d4".to_string(), vec![route])
    }

    #[test]
    fn app_command_crosses_cloud_to_local() {
        let engine = engine(false);
        let plan = engine
            .plan_at(Instant::now(), Side::Cloud, CLOUD_APP, b"cd=01,foo", None)
            .unwrap();
        assert_eq!(plan.target, Side::Local);
        assert_eq!(plan.topic, LOCAL_APP);
    }

    #[test]
    fn correlation_window_admits_one_response() {
        let engine = engine(false);
        let t0 = Instant::now();
        engine
            .plan_at(t0, Side::Cloud, CLOUD_APP, b"cd=01,foo", None)
            .unwrap();

        // The device response within the window mirrors to the cloud.
        let plan = engine
            .plan_at(
                t0 + Duration::from_millis(200),
                Side::Local,
                LOCAL_DEVICE,
                b"cd=02",
                None,
            )
            .unwrap();
        assert_eq!(plan.target, Side::Cloud);
        assert_eq!(plan.topic, CLOUD_DEVICE);

        // A second response finds the history entry cleared.
        assert!(engine
            .plan_at(
                t0 + Duration::from_millis(300),
                Side::Local,
                LOCAL_DEVICE,
                b"cd=02",
                None,
            )
            .is_none());
    }

    #[test]
    fn stale_responses_are_unsolicited() {
        let engine = engine(false);
        let t0 = Instant::now();
        engine
            .plan_at(t0, Side::Cloud, CLOUD_APP, b"cd=01", None)
            .unwrap();
        assert!(engine
            .plan_at(
                t0 + Duration::from_millis(1500),
                Side::Local,
                LOCAL_DEVICE,
                b"cd=02",
                None,
            )
            .is_none());
    }

    #[test]
    fn device_message_without_history_is_dropped() {
        let engine = engine(false);
        assert!(engine
            .plan_at(Instant::now(), Side::Local, LOCAL_DEVICE, b"cd=02", None)
            .is_none());
    }

    #[test]
    fn rate_limiter_gates_cloud_bound_commands() {
        // Inverse direction: app commands enter on the local broker and
        // leave toward the cloud.
        let engine = engine(true);
        let t0 = Instant::now();
        assert!(engine
            .plan_at(t0, Side::Local, LOCAL_APP, b"cd=0001", None)
            .is_some());
        assert!(engine
            .plan_at(
                t0 + Duration::from_secs(1),
                Side::Local,
                LOCAL_APP,
                b"cd=0001",
                None,
            )
            .is_none());
        assert!(engine
            .plan_at(
                t0 + Duration::from_secs(60),
                Side::Local,
                LOCAL_APP,
                b"cd=0001",
                None,
            )
            .is_some());
    }

    #[test]
    fn rate_limiter_is_per_code_and_fails_open() {
        let engine = engine(true);
        let t0 = Instant::now();
        assert!(engine
            .plan_at(t0, Side::Local, LOCAL_APP, b"cd=0001", None)
            .is_some());
        // A different limited code has its own window.
        assert!(engine
            .plan_at(t0 + Duration::from_millis(10), Side::Local, LOCAL_APP, b"cd=13", None)
            .is_some());
        // Unlimited codes and unparseable payloads always pass.
        assert!(engine
            .plan_at(t0 + Duration::from_millis(20), Side::Local, LOCAL_APP, b"cd=2", None)
            .is_some());
        assert!(engine
            .plan_at(
                t0 + Duration::from_millis(30),
                Side::Local,
                LOCAL_APP,
                &[0xff, 0x00],
                None,
            )
            .is_some());
    }

    #[test]
    fn cloud_to_local_app_commands_are_not_rate_limited() {
        let engine = engine(false);
        let t0 = Instant::now();
        assert!(engine
            .plan_at(t0, Side::Cloud, CLOUD_APP, b"cd=0001", None)
            .is_some());
        assert!(engine
            .plan_at(t0 + Duration::from_secs(1), Side::Cloud, CLOUD_APP, b"cd=0001", None)
            .is_some());
    }

    #[test]
    fn relayed_messages_never_bounce() {
        let engine = engine(false);
        assert!(engine
            .plan_at(
                Instant::now(),
                Side::Cloud,
                CLOUD_APP,
                b"cd=01",
                Some("deadbeef"),
            )
            .is_none());
        // Own tag too.
        assert!(engine
            .plan_at(
                Instant::now(),
                Side::Cloud,
                CLOUD_APP,
                b"cd=01",
                Some("a1b2c3d4"),
            )
            .is_none());
    }

    #[test]
    fn direction_policy_drops_wrong_role_per_side() {
        let engine_non_inverse = engine(false);
        // Non-inverse: device role from the cloud and app role from local
        // are both rejected.
        assert!(engine_non_inverse
            .plan_at(Instant::now(), Side::Cloud, CLOUD_DEVICE, b"x", None)
            .is_none());
        assert!(engine_non_inverse
            .plan_at(Instant::now(), Side::Local, LOCAL_APP, b"x", None)
            .is_none());

        let engine_inverse = engine(true);
        // Inverse listens the other way around; note the subscribe roles
        // swap with the direction.
        assert!(engine_inverse
            .plan_at(Instant::now(), Side::Cloud, CLOUD_APP, b"x", None)
            .is_none());
        assert!(engine_inverse
            .plan_at(Instant::now(), Side::Local, LOCAL_DEVICE, b"x", None)
            .is_none());
    }

    #[test]
    fn unknown_topics_are_dropped() {
        let engine = engine(false);
        assert!(engine
            .plan_at(
                Instant::now(),
                Side::Cloud,
                "hame_energy/HMG-50/App/other/ctrl",
                b"x",
                None,
            )
            .is_none());
    }

    #[test]
    fn sweep_expires_old_entries() {
        let engine = engine(true);
        let t0 = Instant::now();
        engine
            .plan_at(t0, Side::Local, LOCAL_APP, b"cd=0001", None)
            .unwrap();
        {
            let maps = engine.state.lock().unwrap();
            assert_eq!(maps.app_history.len(), 1);
            assert_eq!(maps.rate_limited.len(), 1);
        }

        // Before the expiry horizon nothing is removed.
        engine.sweep_at(t0 + Duration::from_secs(1));
        {
            let maps = engine.state.lock().unwrap();
            assert_eq!(maps.app_history.len(), 1);
            assert_eq!(maps.rate_limited.len(), 1);
        }

        // Past 2x the windows both maps drain.
        engine.sweep_at(t0 + Duration::from_secs(3));
        {
            let maps = engine.state.lock().unwrap();
            assert!(maps.app_history.is_empty());
            assert_eq!(maps.rate_limited.len(), 1);
        }
        engine.sweep_at(t0 + Duration::from_secs(240));
        {
            let maps = engine.state.lock().unwrap();
            assert!(maps.rate_limited.is_empty());
        }
    }

    #[test]
    fn one_subscription_per_device_per_side() {
        let engine = engine(false);
        assert_eq!(engine.subscriptions(Side::Local).len(), 1);
        assert_eq!(engine.subscriptions(Side::Cloud).len(), 1);
        assert_eq!(
            engine.subscriptions(Side::Cloud)[0],
            CLOUD_APP
        );
        assert_eq!(
            engine.subscriptions(Side::Local)[0],
            LOCAL_DEVICE
        );
    }
}
