//! Vendor API client.
//!
//! Two sequential calls: a credential login that yields a session token,
//! then the device list. Both mimic the mobile application's requests; the
//! API rejects unknown user agents.

use backoff::backoff::Backoff;
use hm_relay_error::api::ApiError;
use hm_relay_error::HmResult;
use hm_relay_models::constants::{MOBILE_USER_AGENT, VENDOR_API_BASE_URL};
use hm_relay_models::{build_exponential_backoff, RetryPolicy};
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_aux::prelude::{
    deserialize_number_from_string, deserialize_option_number_from_string,
    deserialize_string_from_number,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// One device as reported by the vendor device list.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiDevice {
    pub devid: String,
    #[serde(default)]
    pub name: Option<String>,
    pub mac: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub version: Option<f64>,
    #[serde(default)]
    pub salt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(deserialize_with = "deserialize_string_from_number")]
    code: String,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceListResponse {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Vec<ApiDevice>,
}

pub struct VendorApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl VendorApiClient {
    pub fn new() -> HmResult<Self> {
        Self::with_base_url(VENDOR_API_BASE_URL)
    }

    pub fn with_base_url(base: impl Into<String>) -> HmResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(MOBILE_USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(ApiError::Transport)?;
        Ok(Self {
            http,
            base_url: base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Login and fetch the account's device list.
    ///
    /// The composite gets 2 attempts; each individual call gets 3. Only
    /// transient failures (HTTP 5xx, timeouts, connection resets) are
    /// retried - credential errors surface immediately.
    pub async fn fetch_devices(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Vec<ApiDevice>, ApiError> {
        with_retry(&RetryPolicy::vendor_api_fetch(), "fetch_devices", || async move {
            let token = self.login(email, password).await?;
            self.device_list(email, &token).await
        })
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<String, ApiError> {
        with_retry(&RetryPolicy::vendor_api_call(), "login", || {
            self.login_once(email, password)
        })
        .await
    }

    async fn device_list(&self, email: &str, token: &str) -> Result<Vec<ApiDevice>, ApiError> {
        with_retry(&RetryPolicy::vendor_api_call(), "device_list", || {
            self.device_list_once(email, token)
        })
        .await
    }

    async fn login_once(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let url = format!("{}/app/Solar/v2_get_device.php", self.base_url);
        let pwd = md5_hex(password);
        let response = self
            .http
            .get(&url)
            .query(&[("mailbox", email), ("pwd", pwd.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
            });
        }
        let body: LoginResponse = response.json().await?;
        debug!(code = %body.code, "vendor login response");
        classify_login(body)
    }

    async fn device_list_once(&self, email: &str, token: &str) -> Result<Vec<ApiDevice>, ApiError> {
        let url = format!("{}/ems/api/v1/getDeviceList", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("mailbox", email), ("token", token)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
            });
        }
        let body: DeviceListResponse = response.json().await?;
        if body.code == 1 {
            debug!(devices = body.data.len(), "vendor device list fetched");
            Ok(body.data)
        } else {
            Err(ApiError::UnexpectedCode {
                code: body.code.to_string(),
                msg: body.msg.unwrap_or_default(),
            })
        }
    }
}

fn classify_login(body: LoginResponse) -> Result<String, ApiError> {
    match body.code.as_str() {
        "2" => body
            .token
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::MissingToken),
        "3" => Err(ApiError::EmailNotRegistered),
        "4" => Err(ApiError::WrongPassword),
        other => Err(ApiError::UnexpectedCode {
            code: other.to_string(),
            msg: body.msg.unwrap_or_default(),
        }),
    }
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Run `op` under the policy's attempt budget, sleeping along the backoff
/// curve between transient failures.
async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut bo = build_exponential_backoff(policy);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && policy.should_retry(attempts) => {
                let delay = bo
                    .next_backoff()
                    .unwrap_or(Duration::from_millis(policy.max_interval_ms));
                warn!(
                    call = label,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "vendor API call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
