pub mod broker;
pub mod config;
pub mod constants;
pub mod device;
pub mod retry;

pub use broker::{BrokerCatalog, BrokerDefinition};
pub use config::{BridgeConfig, DeviceConfig};
pub use device::Device;
pub use retry::{build_exponential_backoff, RetryPolicy};
