use crate::constants::{DEFAULT_CLOUD_CLIENT_PREFIX, DEFAULT_TOPIC_PREFIX};
use hm_relay_error::{HmError, HmResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// One cloud broker from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerDefinition {
    /// Broker URL, `mqtts://host:port`.
    pub url: String,
    /// CA certificate, PEM.
    pub ca: String,
    /// Client certificate, PEM.
    pub cert: String,
    /// Client private key, PEM.
    pub key: String,
    /// Prefix for generated cloud client ids.
    pub client_id_prefix: Option<String>,
    /// Cloud-side topic prefix, must end with `/`.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Local-side topic prefix when devices do not mirror the cloud form.
    pub local_topic_prefix: Option<String>,
    /// Hex AES-128 key for the MAC-based remote-id scheme.
    pub topic_encryption_key: Option<String>,
    /// Family -> minimum firmware version for auto-selecting this broker.
    #[serde(default)]
    pub min_versions: BTreeMap<String, f64>,
    /// Family -> firmware versions whose devices mirror the cloud topic
    /// form on the local broker.
    #[serde(default)]
    pub use_remote_topic_id_versions: BTreeMap<String, Vec<f64>>,
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

impl BrokerDefinition {
    /// Effective client-id prefix for cloud sessions.
    pub fn client_prefix(&self) -> &str {
        self.client_id_prefix
            .as_deref()
            .unwrap_or(DEFAULT_CLOUD_CLIENT_PREFIX)
    }

    /// Effective local-side prefix for non-mirroring devices.
    pub fn local_prefix(&self) -> &str {
        self.local_topic_prefix
            .as_deref()
            .unwrap_or(&self.topic_prefix)
    }
}

/// The broker catalog, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct BrokerCatalog {
    brokers: BTreeMap<String, Arc<BrokerDefinition>>,
}

impl BrokerCatalog {
    /// Load the catalog from a JSON document keyed by broker id.
    ///
    /// String fields beginning with `@` are indirect file loads: the rest of
    /// the value is a path relative to the catalog file, and the file's
    /// contents replace the field. Certificates and keys use this.
    pub fn load(path: &Path) -> HmResult<Self> {
        let raw = fs::read_to_string(path)?;
        let mut doc: Value = serde_json::from_str(&raw)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let entries = doc.as_object_mut().ok_or_else(|| {
            HmError::Config(format!("{}: catalog root must be an object", path.display()))
        })?;
        for (broker_id, entry) in entries.iter_mut() {
            let Some(fields) = entry.as_object_mut() else {
                return Err(HmError::Config(format!(
                    "catalog entry '{broker_id}' must be an object"
                )));
            };
            for (field, value) in fields.iter_mut() {
                let reference = value
                    .as_str()
                    .and_then(|s| s.strip_prefix('@'))
                    .map(str::to_string);
                if let Some(reference) = reference {
                    let indirect = fs::read_to_string(base.join(&reference)).map_err(|e| {
                        HmError::Config(format!(
                            "catalog entry '{broker_id}', field '{field}': cannot load '{reference}': {e}"
                        ))
                    })?;
                    *value = Value::String(indirect);
                }
            }
        }

        let brokers: BTreeMap<String, BrokerDefinition> = serde_json::from_value(doc)?;
        for (id, def) in &brokers {
            if !def.topic_prefix.ends_with('/') {
                return Err(HmError::Config(format!(
                    "catalog entry '{id}': topic_prefix must end with '/'"
                )));
            }
            if let Some(local) = &def.local_topic_prefix {
                if !local.ends_with('/') {
                    return Err(HmError::Config(format!(
                        "catalog entry '{id}': local_topic_prefix must end with '/'"
                    )));
                }
            }
        }
        Ok(Self {
            brokers: brokers.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<BrokerDefinition>> {
        self.brokers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.brokers.contains_key(id)
    }

    /// Brokers in stable (lexicographic) order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<BrokerDefinition>)> {
        self.brokers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }
}
