//! Topic structure of the vendor control protocol.
//!
//! Every device owns exactly one topic per side, of the form
//! `<prefix><type>/(device|App)/<identifier>/ctrl`. The `App` and `device`
//! role tokens are complementary: whichever side the app talks on listens
//! for the other role, and inverse forwarding swaps the sides.

use hm_relay_error::{HmError, HmResult};
use hm_relay_models::{BrokerDefinition, Device};
use regex::Regex;

/// Which broker a message was seen on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Local,
    Cloud,
}

impl Side {
    pub fn mirror(self) -> Self {
        match self {
            Side::Local => Side::Cloud,
            Side::Cloud => Side::Local,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Cloud => "cloud",
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Local => 0,
            Side::Cloud => 1,
        }
    }
}

/// Role token inside a topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    App,
    Device,
}

impl Role {
    pub fn token(self) -> &'static str {
        match self {
            Role::App => "App",
            Role::Device => "device",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "App" => Some(Role::App),
            "device" => Some(Role::Device),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct SideRoute {
    prefix: String,
    id: String,
    subscribe: String,
    pattern: Regex,
}

/// Precomputed per-device topic state: one subscription, one match pattern
/// and one identifier per side.
#[derive(Debug)]
pub struct DeviceRoute {
    pub device: Device,
    /// `type:device_id:mac`, the key of the forwarder's expiring maps.
    pub key: String,
    /// Effective direction, device override falling back to the forwarder
    /// default.
    pub inverse: bool,
    sides: [SideRoute; 2],
}

impl DeviceRoute {
    pub fn new(
        device: Device,
        broker: &BrokerDefinition,
        default_inverse: bool,
    ) -> HmResult<Self> {
        let inverse = device.inverse_forwarding.unwrap_or(default_inverse);
        let key = device.key();

        let (local_prefix, local_id) = if device.use_remote_topic_id {
            (broker.topic_prefix.as_str(), device.remote_id.as_str())
        } else {
            (broker.local_prefix(), device.mac.as_str())
        };
        let cloud_listen = if inverse { Role::Device } else { Role::App };
        let local_listen = if inverse { Role::App } else { Role::Device };

        let local = SideRoute::build(local_prefix, &device.device_type, local_id, local_listen)?;
        let cloud = SideRoute::build(
            &broker.topic_prefix,
            &device.device_type,
            &device.remote_id,
            cloud_listen,
        )?;

        Ok(Self {
            device,
            key,
            inverse,
            sides: [local, cloud],
        })
    }

    fn side(&self, side: Side) -> &SideRoute {
        &self.sides[side.index()]
    }

    /// The one topic subscribed on `side` for this device.
    pub fn subscription(&self, side: Side) -> &str {
        &self.side(side).subscribe
    }

    /// Match an incoming topic against this device on `side`. Returns the
    /// role token only when prefix, type and identifier all line up.
    pub fn match_topic(&self, side: Side, topic: &str) -> Option<Role> {
        let s = self.side(side);
        let caps = s.pattern.captures(topic)?;
        if &caps[1] != self.device.device_type || &caps[3] != s.id {
            return None;
        }
        Role::from_token(&caps[2])
    }

    /// Topic for publishing toward `side`, role preserved.
    pub fn topic(&self, side: Side, role: Role) -> String {
        let s = self.side(side);
        format!(
            "{}{}/{}/{}/ctrl",
            s.prefix,
            self.device.device_type,
            role.token(),
            s.id
        )
    }
}

impl SideRoute {
    fn build(prefix: &str, device_type: &str, id: &str, listen: Role) -> HmResult<Self> {
        let pattern = Regex::new(&format!(
            "^{}([^/]+)/(device|App)/(.*)/ctrl$",
            regex::escape(prefix)
        ))
        .map_err(|e| HmError::Msg(format!("topic pattern for prefix '{prefix}': {e}")))?;
        Ok(Self {
            prefix: prefix.to_string(),
            id: id.to_string(),
            subscribe: format!("{prefix}{device_type}/{}/{id}/ctrl", listen.token()),
            pattern,
        })
    }
}
