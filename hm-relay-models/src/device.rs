use serde::{Deserialize, Serialize};

/// A resolved device, frozen for the process lifetime after bootstrap.
///
/// `remote_id`, `broker_id` and `use_remote_topic_id` are filled in by the
/// identity resolver; everything else comes from the vendor API and the
/// user configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Vendor-side device id (12 or 22-24 characters).
    pub device_id: String,
    /// 12 lowercase hex characters, colons stripped.
    pub mac: String,
    /// `<FAMILY>-<GEN>` type string, e.g. `HMA-1` or `HMG-50`.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Numeric firmware version, when the API reported one.
    pub version: Option<f64>,
    /// Per-device direction override.
    pub inverse_forwarding: Option<bool>,
    /// Cloud broker this device is bound to.
    pub broker_id: String,
    /// Identifier the device is addressed by on the cloud broker.
    pub remote_id: String,
    /// Whether the local broker mirrors the cloud-side prefix and id.
    pub use_remote_topic_id: bool,
    /// Raw salt string from the API; the first comma-separated token is the
    /// derivation material.
    pub salt: Option<String>,
    /// Informational display name.
    pub name: Option<String>,
}

impl Device {
    /// Stable composite key used by the forwarder's expiring maps.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.device_type, self.device_id, self.mac)
    }

    /// Device family, the prefix of `type` before the final `-`.
    pub fn family(&self) -> &str {
        family(&self.device_type)
    }
}

/// Family prefix of a type string (`HMG-50` -> `HMG`, `HME-3-1` -> `HME-3`).
pub fn family(device_type: &str) -> &str {
    match device_type.rsplit_once('-') {
        Some((prefix, _)) => prefix,
        None => device_type,
    }
}

/// Strip colons, lowercase, and require exactly 12 hex characters.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let mac: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if mac.len() == 12 && mac.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(mac)
    } else {
        None
    }
}

/// Trim whitespace and require the vendor id shape (12 or 22-24 chars).
pub fn normalize_device_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.len() == 12 || (22..=24).contains(&id.len()) {
        Some(id.to_string())
    } else {
        None
    }
}

/// First comma-separated token of the API salt, if usable.
pub fn salt_material(salt: Option<&str>) -> Option<String> {
    let token = salt?.split(',').next()?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_strips_generation() {
        assert_eq!(family("HMG-50"), "HMG");
        assert_eq!(family("HMA-1"), "HMA");
        assert_eq!(family("JPLS-8H"), "JPLS");
        assert_eq!(family("HME-3-1"), "HME-3");
        assert_eq!(family("VNSE3"), "VNSE3");
    }

    #[test]
    fn mac_normalization() {
        assert_eq!(
            normalize_mac("AA:BB:CC:DD:EE:FF"),
            Some("aabbccddeeff".to_string())
        );
        assert_eq!(normalize_mac(" aabbccddeeff "), Some("aabbccddeeff".to_string()));
        assert_eq!(normalize_mac("aabbccddee"), None);
        assert_eq!(normalize_mac("aabbccddeegg"), None);
    }

    #[test]
    fn device_id_shapes() {
        assert!(normalize_device_id("123456789012").is_some());
        assert!(normalize_device_id(&"x".repeat(22)).is_some());
        assert!(normalize_device_id(&"x".repeat(24)).is_some());
        assert!(normalize_device_id(&"x".repeat(16)).is_none());
        assert_eq!(
            normalize_device_id("  123456789012  ").as_deref(),
            Some("123456789012")
        );
    }

    #[test]
    fn salt_takes_first_token() {
        assert_eq!(
            salt_material(Some("abc123,unused")).as_deref(),
            Some("abc123")
        );
        assert_eq!(salt_material(Some("abc123")).as_deref(), Some("abc123"));
        assert_eq!(salt_material(Some(",x")), None);
        assert_eq!(salt_material(None), None);
    }

    #[test]
    fn device_key_is_composite() {
        let d = Device {
            device_id: "123456789012".to_string(),
            mac: "aabbccddeeff".to_string(),
            device_type: "HMA-1".to_string(),
            version: Some(230.0),
            inverse_forwarding: None,
            broker_id: "eu".to_string(),
            remote_id: "123456789012".to_string(),
            use_remote_topic_id: false,
            salt: None,
            name: None,
        };
        assert_eq!(d.key(), "HMA-1:123456789012:aabbccddeeff");
    }
}
