use hm_relay_error::HmResult;
use serde::Deserialize;
use serde_aux::prelude::deserialize_option_number_from_string;
use std::fs;
use std::path::Path;
use validator::Validate;

/// User-facing relay configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BridgeConfig {
    /// Local broker URL (`mqtt://` or `mqtts://`, optionally with
    /// `user:pass@` credentials).
    #[validate(length(min = 1))]
    pub broker_url: String,
    /// Vendor account email.
    pub username: Option<String>,
    /// Vendor account password.
    pub password: Option<String>,
    /// Broker id used when no auto-selection rule matches a device.
    pub default_broker_id: Option<String>,
    /// Process-wide direction default for devices without their own flag.
    pub inverse_forwarding: Option<bool>,
    /// Comma-separated device ids forced into inverse forwarding.
    pub inverse_forwarding_device_ids: Option<String>,
    /// Per-device overrides, applied over the API device list.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// One per-device override entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    pub mac: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub version: Option<f64>,
    pub inverse_forwarding: Option<bool>,
    pub broker_id: Option<String>,
    pub remote_id: Option<String>,
    pub use_remote_topic_id: Option<bool>,
}

impl BridgeConfig {
    /// Load and validate the configuration document.
    pub fn load(path: &Path) -> HmResult<Self> {
        let raw = fs::read_to_string(path)?;
        let config: BridgeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the vendor-API (primary) flow is in effect.
    pub fn has_credentials(&self) -> bool {
        matches!((&self.username, &self.password), (Some(u), Some(p)) if !u.is_empty() && !p.is_empty())
    }

    /// Device ids from `inverse_forwarding_device_ids`, trimmed.
    pub fn inverse_device_ids(&self) -> Vec<&str> {
        self.inverse_forwarding_device_ids
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
