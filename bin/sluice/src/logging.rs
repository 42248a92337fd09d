use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer as _};

use sluice_aggregate::GenericError;

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// The `SLUICE_LOG_LEVEL` environment variable holds the filtering directives, falling back to `INFO`. When
/// `SLUICE_LOG_FORMAT_JSON` is set to `true` or `1`, logs are emitted as JSON; otherwise, a human-readable format is
/// used.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(default_level: Option<LevelFilter>) -> Result<(), GenericError> {
    let is_json = std::env::var("SLUICE_LOG_FORMAT_JSON")
        .map(|s| is_truthy(&s))
        .unwrap_or(false);

    let level_filter = EnvFilter::builder()
        .with_default_directive(default_level.unwrap_or(LevelFilter::INFO).into())
        .with_env_var("SLUICE_LOG_LEVEL")
        .from_env_lossy();

    if is_json {
        let json_layer = tracing_subscriber::fmt::Layer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(json_layer.with_filter(level_filter))
            .try_init()?;
    } else {
        let pretty_layer = tracing_subscriber::fmt::Layer::new().with_target(true);
        tracing_subscriber::registry()
            .with(pretty_layer.with_filter(level_filter))
            .try_init()?;
    }

    Ok(())
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value == "true" || value == "1"
}

#[cfg(test)]
mod tests {
    use super::is_truthy;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("true"));
        assert!(is_truthy(" TRUE "));
        assert!(is_truthy("1"));
        assert!(!is_truthy("json"));
        assert!(!is_truthy(""));
    }
}
