// Constants shared across the relay crates.

use std::time::Duration;

/// Default configuration file, overridable via `CONFIG_PATH`.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default broker catalog file, overridable via `BROKERS_PATH`.
pub const DEFAULT_BROKERS_FILE: &str = "brokers.json";

/// Cloud-side topic prefix used when the catalog entry does not set one.
pub const DEFAULT_TOPIC_PREFIX: &str = "hame_energy/";

/// Client-id prefix for cloud sessions when the catalog entry does not set one.
pub const DEFAULT_CLOUD_CLIENT_PREFIX: &str = "hm_";

/// Client-id prefix for sessions against the user's local broker.
pub const LOCAL_CLIENT_PREFIX: &str = "config_";

/// User property carried on every forwarded publish; its presence on an
/// incoming publish marks the message as already relayed.
pub const RELAY_PROPERTY: &str = "relayInstanceId";

/// Length of the random relay instance tag.
pub const RELAY_TAG_LEN: usize = 8;

/// How long a device response stays correlated to the app command that
/// solicited it.
pub const APP_CORRELATION_WINDOW: Duration = Duration::from_secs(1);

/// Minimum spacing between two cloud-bound emissions of the same
/// rate-limited command code for one device.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_millis(59_900);

/// Cadence of the expiring-map sweep.
pub const MAP_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// MQTT keepalive for both sessions of a forwarder.
pub const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Bind address of the health endpoint.
pub const HEALTH_BIND: &str = "0.0.0.0:8080";

/// Vendor API base URL.
pub const VENDOR_API_BASE_URL: &str = "https://eu.hamedata.com";

/// The vendor API only answers requests that look like they come from the
/// mobile application.
pub const MOBILE_USER_AGENT: &str = "okhttp/3.12.11";
