use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{CoreError, CoreResult};
use crate::tracing::config::InstrumentationConfig;
use crate::tracing::log_sink::LogSink;

/// Install the global subscriber, writing every event into `sink`
///
/// Filtering comes from `RUST_LOG` when it parses, else `config.log_level`,
/// else `info`. Fails if a global subscriber is already set.
pub fn init_tracing(config: &InstrumentationConfig, sink: LogSink) -> CoreResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Plain text: the sink feeds a file and the log route
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(sink);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| CoreError::Subscriber(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "tracing initialized"
    );

    Ok(())
}
