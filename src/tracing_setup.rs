use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with efficient async logging setup
/// Returns a WorkerGuard that must be kept alive for the duration of the program
pub fn init_tracing(log_level: tracing::Level) -> Result<WorkerGuard> {
    // Create a non-blocking appender for stdout with async performance
    let (non_blocking_stdout, guard) = tracing_appender::non_blocking(std::io::stdout());

    // Create the filter string for controlling log levels per crate
    let filter_string = format!(
        "mqtt_broker_core={},\
         tokio=warn",
        log_level.as_str().to_lowercase()
    );

    // Build the env filter
    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::WARN.into())
        .parse_lossy(&filter_string);

    // Create a formatting layer with the non-blocking writer
    let formatting_layer = fmt::layer()
        .with_writer(non_blocking_stdout)
        .with_ansi(true)
        .with_level(true)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact();

    // Initialize the global subscriber with the layers
    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing: {e}"))?;

    Ok(guard)
}
