//! Device registry: materializes the device set once at startup, resolves
//! identities, and freezes it for the process lifetime.

use crate::api::{ApiDevice, VendorApiClient};
use crate::identity::{self, RemoteIdScheme};
use hm_relay_error::{HmError, HmResult};
use hm_relay_models::broker::BrokerCatalog;
use hm_relay_models::config::{BridgeConfig, DeviceConfig};
use hm_relay_models::device::{normalize_device_id, normalize_mac};
use hm_relay_models::Device;
use std::collections::BTreeMap;
use tracing::{error, info};

/// Validated, immutable set of devices with resolved identifiers.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

/// Pre-validation device data merged from the API and the config overlay.
#[derive(Debug, Default, Clone)]
struct DraftDevice {
    device_id: String,
    mac: String,
    device_type: Option<String>,
    version: Option<f64>,
    inverse_forwarding: Option<bool>,
    broker_id: Option<String>,
    remote_id: Option<String>,
    use_remote_topic_id: Option<bool>,
    salt: Option<String>,
    name: Option<String>,
}

impl DraftDevice {
    fn from_api(d: ApiDevice) -> Self {
        Self {
            device_id: d.devid,
            mac: d.mac,
            device_type: Some(d.device_type),
            version: d.version,
            salt: d.salt,
            name: d.name,
            ..Default::default()
        }
    }

    fn from_config(d: &DeviceConfig) -> Self {
        Self {
            device_id: d.device_id.clone(),
            mac: d.mac.clone().unwrap_or_default(),
            device_type: d.device_type.clone(),
            version: d.version,
            inverse_forwarding: d.inverse_forwarding,
            broker_id: d.broker_id.clone(),
            remote_id: d.remote_id.clone(),
            use_remote_topic_id: d.use_remote_topic_id,
            ..Default::default()
        }
    }

    fn apply_overlay(&mut self, o: &DeviceConfig) {
        if let Some(mac) = &o.mac {
            self.mac = mac.clone();
        }
        if let Some(t) = &o.device_type {
            self.device_type = Some(t.clone());
        }
        if o.version.is_some() {
            self.version = o.version;
        }
        if o.inverse_forwarding.is_some() {
            self.inverse_forwarding = o.inverse_forwarding;
        }
        if o.broker_id.is_some() {
            self.broker_id = o.broker_id.clone();
        }
        if o.remote_id.is_some() {
            self.remote_id = o.remote_id.clone();
        }
        if o.use_remote_topic_id.is_some() {
            self.use_remote_topic_id = o.use_remote_topic_id;
        }
    }
}

impl DeviceRegistry {
    /// Build the registry from the config and, in the primary flow, the
    /// vendor API. Fatal when the API fails with credentials configured, or
    /// when no device survives validation.
    pub async fn bootstrap(config: &BridgeConfig, catalog: &BrokerCatalog) -> HmResult<Self> {
        let drafts = if config.has_credentials() {
            let client = VendorApiClient::new()?;
            let api_devices = client
                .fetch_devices(
                    config.username.as_deref().unwrap_or_default(),
                    config.password.as_deref().unwrap_or_default(),
                )
                .await?;
            info!(count = api_devices.len(), "vendor API reported devices");
            merge(api_devices, &config.devices)
        } else {
            info!("no vendor credentials configured, using static device entries only");
            config.devices.iter().map(DraftDevice::from_config).collect()
        };

        Self::resolve(drafts, config, catalog)
    }

    /// Validate and resolve the drafts; used directly by tests.
    fn resolve(
        drafts: Vec<DraftDevice>,
        config: &BridgeConfig,
        catalog: &BrokerCatalog,
    ) -> HmResult<Self> {
        let inverse_ids = config.inverse_device_ids();
        let mut devices: Vec<Device> = Vec::with_capacity(drafts.len());

        for mut draft in drafts {
            let Some(device_id) = normalize_device_id(&draft.device_id) else {
                error!(device_id = %draft.device_id, "dropping device: invalid device id");
                continue;
            };
            let Some(mac) = normalize_mac(&draft.mac) else {
                error!(device_id = %device_id, mac = %draft.mac, "dropping device: invalid mac");
                continue;
            };
            let Some(device_type) = draft.device_type.take().filter(|t| !t.trim().is_empty())
            else {
                error!(device_id = %device_id, "dropping device: missing type");
                continue;
            };
            if devices.iter().any(|d| d.device_id == device_id) {
                error!(device_id = %device_id, "dropping device: duplicate device id");
                continue;
            }

            let mut inverse = draft.inverse_forwarding;
            if inverse.is_none() && inverse_ids.contains(&device_id.as_str()) {
                inverse = Some(true);
            }

            let Some(broker_id) = identity::select_broker(
                catalog,
                &device_type,
                draft.version,
                draft.broker_id.as_deref(),
                config.default_broker_id.as_deref(),
            ) else {
                error!(device_id = %device_id, device_type = %device_type,
                       "dropping device: no broker rule matches and no default broker");
                continue;
            };
            let Some(broker) = catalog.get(&broker_id) else {
                error!(device_id = %device_id, broker_id = %broker_id,
                       "dropping device: broker not in catalog");
                continue;
            };

            let (remote_id, scheme) = match draft.remote_id.take().filter(|r| !r.is_empty()) {
                Some(explicit) => (explicit, None),
                None => {
                    let (id, scheme) = identity::resolve_remote_id(
                        broker,
                        &device_id,
                        &device_type,
                        &mac,
                        draft.version,
                        draft.salt.as_deref(),
                    );
                    (id, Some(scheme))
                }
            };

            let use_remote_topic_id = draft.use_remote_topic_id.unwrap_or_else(|| {
                identity::mirrors_cloud_topics(broker, &device_type, draft.version)
            });

            info!(
                device_type = %device_type,
                device_id = %mask(&device_id),
                mac = %mask(&mac),
                broker_id = %broker_id,
                scheme = %scheme.map_or("configured", describe_scheme),
                mirrored = use_remote_topic_id,
                "device registered"
            );

            devices.push(Device {
                device_id,
                mac,
                device_type,
                version: draft.version,
                inverse_forwarding: inverse,
                broker_id,
                remote_id,
                use_remote_topic_id,
                salt: draft.salt,
                name: draft.name,
            });
        }

        if devices.is_empty() {
            return Err(HmError::NoDevices);
        }
        info!(count = devices.len(), "device registry frozen");
        Ok(Self { devices })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Devices grouped by their cloud broker, in stable order.
    pub fn by_broker(&self) -> BTreeMap<String, Vec<Device>> {
        let mut groups: BTreeMap<String, Vec<Device>> = BTreeMap::new();
        for device in &self.devices {
            groups
                .entry(device.broker_id.clone())
                .or_default()
                .push(device.clone());
        }
        groups
    }
}

fn describe_scheme(scheme: RemoteIdScheme) -> &'static str {
    match scheme {
        RemoteIdScheme::Salted => "salted",
        RemoteIdScheme::KeyedMac => "keyed-mac",
        RemoteIdScheme::DeviceId => "device-id",
    }
}

/// Show only the tail of an identifier in logs.
fn mask(id: &str) -> String {
    if id.len() <= 4 {
        id.to_string()
    } else {
        format!("…{}", &id[id.len() - 4..])
    }
}

/// API devices form the base; config entries overlay by device id and
/// append when the API does not know them.
fn merge(api_devices: Vec<ApiDevice>, overlays: &[DeviceConfig]) -> Vec<DraftDevice> {
    let mut drafts: Vec<DraftDevice> = api_devices.into_iter().map(DraftDevice::from_api).collect();

    for overlay in overlays {
        let overlay_id = overlay.device_id.trim();
        match drafts
            .iter_mut()
            .find(|d| d.device_id.trim() == overlay_id)
        {
            Some(draft) => draft.apply_overlay(overlay),
            None => drafts.push(DraftDevice::from_config(overlay)),
        }
    }
    drafts
}

#[cfg(test)]
mod tests {
    use super::*;
    use hm_relay_models::BrokerDefinition;
    use std::path::PathBuf;

    fn catalog_with(entries: &[(&str, &[(&str, f64)])]) -> BrokerCatalog {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static SEQ: AtomicUsize = AtomicUsize::new(0);

        let mut doc = serde_json::Map::new();
        for (id, mins) in entries {
            let def = BrokerDefinition {
                url: "mqtts://broker.example:8883".to_string(),
                ca: "ca".to_string(),
                cert: "cert".to_string(),
                key: "key".to_string(),
                client_id_prefix: None,
                topic_prefix: "hame_energy/".to_string(),
                local_topic_prefix: None,
                topic_encryption_key: None,
                min_versions: mins.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                use_remote_topic_id_versions: Default::default(),
            };
            doc.insert(id.to_string(), serde_json::to_value(def).unwrap());
        }
        let path: PathBuf = std::env::temp_dir().join(format!(
            "hm-relay-registry-{}-{}.json",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, serde_json::Value::Object(doc).to_string()).unwrap();
        BrokerCatalog::load(&path).unwrap()
    }

    fn config_json(json: &str) -> BridgeConfig {
        serde_json::from_str(json).unwrap()
    }

    fn draft(id: &str, mac: &str, ty: &str, version: Option<f64>) -> DraftDevice {
        DraftDevice {
            device_id: id.to_string(),
            mac: mac.to_string(),
            device_type: Some(ty.to_string()),
            version,
            ..Default::default()
        }
    }

    #[test]
    fn invalid_devices_are_dropped_not_fatal() {
        let catalog = catalog_with(&[("eu", &[("HMA", 200.0)])]);
        let config = config_json(r#"{"broker_url": "mqtt://h:1883"}"#);
        let drafts = vec![
            draft("123456789012", "AA:BB:CC:DD:EE:FF", "HMA-1", Some(230.0)),
            draft("bad", "aabbccddeeff", "HMA-1", Some(230.0)),
            draft("123456789013", "nothex", "HMA-1", Some(230.0)),
        ];
        let registry = DeviceRegistry::resolve(drafts, &config, &catalog).unwrap();
        assert_eq!(registry.devices().len(), 1);
        assert_eq!(registry.devices()[0].mac, "aabbccddeeff");
        assert_eq!(registry.devices()[0].broker_id, "eu");
    }

    #[test]
    fn zero_survivors_fail_startup() {
        let catalog = catalog_with(&[("eu", &[("HMA", 200.0)])]);
        let config = config_json(r#"{"broker_url": "mqtt://h:1883"}"#);
        let drafts = vec![draft("bad", "alsobad", "HMA-1", None)];
        assert!(matches!(
            DeviceRegistry::resolve(drafts, &config, &catalog),
            Err(HmError::NoDevices)
        ));
    }

    #[test]
    fn no_matching_rule_falls_to_default_broker() {
        let catalog = catalog_with(&[("eu", &[("HMA", 200.0)]), ("cn", &[])]);
        let config = config_json(r#"{"broker_url": "mqtt://h:1883", "default_broker_id": "cn"}"#);
        let drafts = vec![draft("123456789012", "aabbccddeeff", "HMG-50", Some(154.0))];
        let registry = DeviceRegistry::resolve(drafts, &config, &catalog).unwrap();
        assert_eq!(registry.devices()[0].broker_id, "cn");
    }

    #[test]
    fn inverse_list_applies_unless_device_is_explicit() {
        let catalog = catalog_with(&[("eu", &[("HMA", 200.0)])]);
        let config = config_json(
            r#"{"broker_url": "mqtt://h:1883",
                "inverse_forwarding_device_ids": "123456789012,123456789013"}"#,
        );
        let mut explicit = draft("123456789013", "aabbccddee00", "HMA-1", Some(230.0));
        explicit.inverse_forwarding = Some(false);
        let drafts = vec![
            draft("123456789012", "aabbccddeeff", "HMA-1", Some(230.0)),
            explicit,
        ];
        let registry = DeviceRegistry::resolve(drafts, &config, &catalog).unwrap();
        assert_eq!(registry.devices()[0].inverse_forwarding, Some(true));
        assert_eq!(registry.devices()[1].inverse_forwarding, Some(false));
    }

    #[test]
    fn overlay_merges_and_appends() {
        let api = vec![ApiDevice {
            devid: "123456789012".to_string(),
            name: Some("Battery".to_string()),
            mac: "aabbccddeeff".to_string(),
            device_type: "HMA-1".to_string(),
            version: Some(230.0),
            salt: None,
        }];
        let overlays: Vec<DeviceConfig> = serde_json::from_str(
            r#"[
                {"device_id": "123456789012", "inverse_forwarding": true},
                {"device_id": "999999999999", "mac": "001122334455", "type": "HMG-50"}
            ]"#,
        )
        .unwrap();
        let drafts = merge(api, &overlays);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].inverse_forwarding, Some(true));
        assert_eq!(drafts[0].name.as_deref(), Some("Battery"));
        assert_eq!(drafts[1].device_id, "999999999999");
    }

    #[test]
    fn duplicate_device_ids_keep_first() {
        let catalog = catalog_with(&[("eu", &[("HMA", 200.0)])]);
        let config = config_json(r#"{"broker_url": "mqtt://h:1883"}"#);
        let drafts = vec![
            draft("123456789012", "aabbccddeeff", "HMA-1", Some(230.0)),
            draft("123456789012", "aabbccddee11", "HMA-1", Some(230.0)),
        ];
        let registry = DeviceRegistry::resolve(drafts, &config, &catalog).unwrap();
        assert_eq!(registry.devices().len(), 1);
        assert_eq!(registry.devices()[0].mac, "aabbccddeeff");
    }

    #[test]
    fn groups_by_broker() {
        let catalog = catalog_with(&[("eu", &[("HMA", 200.0)]), ("legacy", &[("HMG", 100.0)])]);
        let config = config_json(r#"{"broker_url": "mqtt://h:1883"}"#);
        let drafts = vec![
            draft("123456789012", "aabbccddeeff", "HMA-1", Some(230.0)),
            draft("123456789013", "aabbccddee11", "HMG-50", Some(154.0)),
        ];
        let registry = DeviceRegistry::resolve(drafts, &config, &catalog).unwrap();
        let groups = registry.by_broker();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["eu"].len(), 1);
        assert_eq!(groups["legacy"].len(), 1);
    }
}
