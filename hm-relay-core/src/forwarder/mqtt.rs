//! MQTT session construction for both sides of a forwarder.

use hm_relay_error::{HmError, HmResult};
use hm_relay_models::constants::{LOCAL_CLIENT_PREFIX, MQTT_KEEP_ALIVE};
use hm_relay_models::BrokerDefinition;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use rumqttc::{TlsConfiguration, Transport};
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Session against the user's broker: TCP or TLS per the URL scheme,
/// credentials from the URL userinfo, client id `config_` + 24 hex.
pub(super) fn local_session(broker_url: &str) -> HmResult<(AsyncClient, EventLoop)> {
    let url = Url::parse(broker_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| HmError::Config(format!("broker_url '{broker_url}' has no host")))?;
    let (tls, default_port) = match url.scheme() {
        "mqtt" | "tcp" => (false, 1883),
        "mqtts" | "ssl" | "tls" => (true, 8883),
        other => {
            return Err(HmError::Config(format!(
                "unsupported broker_url scheme '{other}'"
            )))
        }
    };

    let mut options = MqttOptions::new(
        random_client_id(LOCAL_CLIENT_PREFIX),
        host,
        url.port().unwrap_or(default_port),
    );
    options.set_keep_alive(MQTT_KEEP_ALIVE);
    if !url.username().is_empty() {
        options.set_credentials(url.username(), url.password().unwrap_or_default());
    }
    if tls {
        // The user supplies no certificate for this connection; trust the
        // platform roots.
        options.set_transport(Transport::Tls(native_roots_tls()?));
    }

    Ok(AsyncClient::new(options, EVENT_CHANNEL_CAPACITY))
}

/// Session against a cloud broker: always TLS with the catalog's embedded
/// ca/cert/key, client id `<prefix>` + 24 hex.
pub(super) fn cloud_session(broker: &BrokerDefinition) -> HmResult<(AsyncClient, EventLoop)> {
    let url = Url::parse(&broker.url)?;
    let host = url
        .host_str()
        .ok_or_else(|| HmError::Config(format!("broker url '{}' has no host", broker.url)))?;

    let mut options = MqttOptions::new(
        random_client_id(broker.client_prefix()),
        host,
        url.port().unwrap_or(8883),
    );
    options.set_keep_alive(MQTT_KEEP_ALIVE);
    options.set_transport(Transport::Tls(TlsConfiguration::Simple {
        ca: broker.ca.as_bytes().to_vec(),
        alpn: None,
        client_auth: Some((broker.cert.as_bytes().to_vec(), broker.key.as_bytes().to_vec())),
    }));

    Ok(AsyncClient::new(options, EVENT_CHANNEL_CAPACITY))
}

fn random_client_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &hex[..24])
}

fn native_roots_tls() -> HmResult<TlsConfiguration> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in
        rustls_native_certs::load_native_certs().map_err(|e| HmError::Tls(e.to_string()))?
    {
        roots.add(cert).map_err(|e| HmError::Tls(e.to_string()))?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConfiguration::Rustls(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_have_prefix_and_24_hex() {
        let id = random_client_id("config_");
        assert!(id.starts_with("config_"));
        assert_eq!(id.len(), "config_".len() + 24);
        assert!(id["config_".len()..].bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(random_client_id("hm_"), random_client_id("hm_"));
    }

    #[tokio::test]
    async fn local_session_rejects_unknown_schemes() {
        assert!(local_session("http://host:1883").is_err());
        assert!(local_session("mqtt://host:1883").is_ok());
        assert!(local_session("tcp://host").is_ok());
    }
}
