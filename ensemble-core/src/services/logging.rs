//! Logging service

use crate::models::LogLevel;
use uuid::Uuid;

/// Initialize logging with the specified level
pub fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match level {
        LogLevel::Error => "ensemble=error,ensemble_core=error",
        LogLevel::Warn => "ensemble=warn,ensemble_core=warn",
        LogLevel::Info => "ensemble=info,ensemble_core=info",
        LogLevel::Debug => "ensemble=debug,ensemble_core=debug",
        LogLevel::Trace => "ensemble=trace,ensemble_core=trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| e as Box<dyn std::error::Error>)?;

    Ok(())
}

/// Log the outcome of one trigger evaluation
pub fn log_trigger_evaluation(instance_id: Uuid, trigger: &str, trigger_type: &str, changed: bool) {
    tracing::info!(
        instance_id = %instance_id,
        trigger = trigger,
        trigger_type = trigger_type,
        changed = changed,
        "Trigger checked"
    );
}

/// Log an instance lifecycle transition
pub fn log_lifecycle(instance_id: Uuid, from: &str, to: &str) {
    tracing::info!(
        instance_id = %instance_id,
        from = from,
        to = to,
        "Instance status changed"
    );
}

/// Log a system error
pub fn log_error(error: &str, context: Option<&str>) {
    tracing::error!(
        error = error,
        context = context.unwrap_or(""),
        "System error occurred"
    );
}
