use hm_relay_error::{HmError, HmResult};
use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Initialize the process-wide tracing subscriber.
///
/// The filter comes from `LOG_LEVEL` (plain level or a full tracing
/// directive). Output goes to stdout only; the container runtime owns log
/// collection.
pub fn init(level: &str) -> HmResult<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| HmError::Config(format!("invalid LOG_LEVEL '{level}': {e}")))?;

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(false));

    set_global_default(subscriber).map_err(|_| HmError::from("failed to set logger"))
}
