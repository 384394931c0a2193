//! Device identity resolution: which cloud broker a device binds to, which
//! identifier addresses it there, and whether the local broker mirrors the
//! cloud topic form.

pub mod keyed;
pub mod salted;

use hm_relay_models::broker::{BrokerCatalog, BrokerDefinition};
use hm_relay_models::device::{family, salt_material};
use tracing::warn;

/// Whether a device's firmware admits the salted derivation scheme.
///
/// Keyed on the family prefix, with a handful of exact type matches, and a
/// per-family minimum firmware version. Families outside the table never
/// use the salted scheme.
pub fn supports_salted_id(device_type: &str, version: Option<f64>) -> bool {
    let min = match device_type {
        "HME-2" | "HME-4" | "TPM-CN" => Some(122.0),
        "HME-3" | "HME-5" => Some(120.0),
        _ => match family(device_type) {
            "JPLS" | "HMM" | "HMN" => Some(136.0),
            "HMB" | "HMA" | "HMK" | "HMF" => Some(230.0),
            "HMJ" => Some(116.0),
            "HMI" => Some(126.0),
            "HMG" => Some(154.0),
            "VNSE3" => None,
            _ => return false,
        },
    };
    match min {
        None => true,
        Some(m) => version.is_some_and(|v| v >= m),
    }
}

/// Pick the broker id for a device.
///
/// An explicit `broker_id` wins. Otherwise the broker whose
/// `min_versions[family]` is the greatest threshold not exceeding the
/// device version is chosen; equal thresholds resolve to the
/// lexicographically smallest broker id. Devices no rule accepts fall to
/// the configured default.
pub fn select_broker(
    catalog: &BrokerCatalog,
    device_type: &str,
    version: Option<f64>,
    explicit: Option<&str>,
    default_id: Option<&str>,
) -> Option<String> {
    if let Some(id) = explicit {
        return Some(id.to_string());
    }

    if let Some(v) = version {
        let fam = family(device_type);
        let mut best: Option<(f64, &str)> = None;
        for (id, def) in catalog.iter() {
            if let Some(&min) = def.min_versions.get(fam) {
                if min <= v && best.map_or(true, |(threshold, _)| min > threshold) {
                    best = Some((min, id));
                }
            }
        }
        if let Some((_, id)) = best {
            return Some(id.to_string());
        }
    }

    default_id.map(str::to_string)
}

/// How a device's cloud identifier was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteIdScheme {
    Salted,
    KeyedMac,
    DeviceId,
}

/// Compute the identifier a device is addressed by on the cloud broker.
///
/// Priority: salted derivation (salt present and firmware gate passed),
/// then the broker's keyed MAC scheme, then the device id itself. A scheme
/// that produces nothing falls through to the next.
pub fn resolve_remote_id(
    broker: &BrokerDefinition,
    device_id: &str,
    device_type: &str,
    mac: &str,
    version: Option<f64>,
    salt: Option<&str>,
) -> (String, RemoteIdScheme) {
    if let Some(material) = salt_material(salt) {
        if supports_salted_id(device_type, version) {
            let id = salted::derive_salted_id(&material, mac, device_type);
            if !id.is_empty() {
                return (id, RemoteIdScheme::Salted);
            }
        }
    }

    if let Some(key_hex) = broker.topic_encryption_key.as_deref() {
        match keyed::derive_keyed_id(key_hex, mac) {
            Ok(id) => return (id, RemoteIdScheme::KeyedMac),
            Err(e) => {
                warn!(device_id, error = %e, "keyed remote-id derivation failed, using device id");
            }
        }
    }

    (device_id.to_string(), RemoteIdScheme::DeviceId)
}

/// Whether the local broker should also use the cloud-side prefix and id
/// for this device, per the broker's firmware rule.
pub fn mirrors_cloud_topics(
    broker: &BrokerDefinition,
    device_type: &str,
    version: Option<f64>,
) -> bool {
    let Some(v) = version else {
        return false;
    };
    broker
        .use_remote_topic_id_versions
        .get(family(device_type))
        .is_some_and(|versions| versions.contains(&v))
}
