//! Config and watch command handlers

use crate::cli::context::AppContext;
use anyhow::{Context, Result};
use ensemble_core::models::{Configuration, LogLevel, KNOWN_NETWORKS};
use ensemble_core::workflow::{TriggerFired, TriggerPoller};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Read one line from stdin
fn read_user_input_sync() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_line(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

fn prompt(question: &str, current: &str) -> Result<Option<String>> {
    print!("{} [{}]: ", question, current);
    io::stdout().flush()?;
    let input = read_user_input_sync()?;
    let input = input.trim();
    Ok(if input.is_empty() {
        None
    } else {
        Some(input.to_string())
    })
}

fn parse_log_level(input: &str) -> Option<LogLevel> {
    match input.to_lowercase().as_str() {
        "error" => Some(LogLevel::Error),
        "warn" => Some(LogLevel::Warn),
        "info" => Some(LogLevel::Info),
        "debug" => Some(LogLevel::Debug),
        "trace" => Some(LogLevel::Trace),
        _ => None,
    }
}

fn log_level_name(level: &LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Handle the 'config init' command
pub async fn handle_config_init(config_path: PathBuf) -> Result<()> {
    println!("⚙️  Initializing ensemble configuration");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📄 Config file: {}", config_path.display());

    let mut config = if config_path.exists() {
        println!("⚠️  Configuration file already exists. Loading existing values...");
        Configuration::load_from_file(&config_path)
            .map_err(|e| anyhow::anyhow!("Failed to load existing config: {}", e))?
    } else {
        println!("✨ Creating new configuration with defaults...");
        Configuration::default()
    };

    println!("\n📝 Please answer the following questions (press Enter to use default):\n");

    if let Some(input) = prompt(
        "Log level (error/warn/info/debug/trace)",
        log_level_name(&config.log_level),
    )? {
        match parse_log_level(&input) {
            Some(level) => config.log_level = level,
            None => println!("⚠️  Invalid log level, using default"),
        }
    }

    let store_default = config.resolved_store_path();
    if let Some(input) = prompt("Store file", &store_default.display().to_string())? {
        config.store_path = Some(PathBuf::from(input));
    }

    let abi_default = config.resolved_abi_dir();
    if let Some(input) = prompt("ABI directory", &abi_default.display().to_string())? {
        config.abi_dir = Some(PathBuf::from(input));
    }

    if let Some(input) = prompt(
        "RPC timeout in seconds",
        &config.rpc_timeout_seconds.to_string(),
    )? {
        match input.parse::<u64>() {
            Ok(timeout) => config.rpc_timeout_seconds = timeout,
            Err(_) => println!("⚠️  Invalid timeout value, using default"),
        }
    }

    if let Some(input) = prompt(
        "Reference timezone offset in minutes from UTC",
        &config.timezone_offset_minutes.to_string(),
    )? {
        match input.parse::<i32>() {
            Ok(offset) => config.timezone_offset_minutes = offset,
            Err(_) => println!("⚠️  Invalid offset, using default"),
        }
    }

    if let Some(input) = prompt(
        "Poll interval in seconds",
        &config.poll_interval_seconds.to_string(),
    )? {
        match input.parse::<u64>() {
            Ok(interval) => config.poll_interval_seconds = interval,
            Err(_) => println!("⚠️  Invalid interval, using default"),
        }
    }

    for network in KNOWN_NETWORKS {
        let current = config.networks.get(*network).cloned().unwrap_or_default();
        if let Some(input) = prompt(&format!("RPC URL for {}", network), &current)? {
            config.networks.insert(network.to_string(), input);
        }
    }

    println!("\n🔍 Validating configuration...");
    match config.validate() {
        Ok(()) => {
            println!("✅ Configuration is valid");
        }
        Err(errors) => {
            println!("❌ Configuration validation failed:");
            for error in &errors {
                println!("   - {}", error);
            }
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("\n💾 Saving configuration to {}...", config_path.display());
    config
        .save_to_file(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to save configuration: {}", e))?;

    println!("✅ Configuration saved successfully!");
    println!("\n📋 Configuration summary:");
    println!("   Log level: {}", log_level_name(&config.log_level));
    println!("   Store: {}", config.resolved_store_path().display());
    println!("   RPC timeout: {} seconds", config.rpc_timeout_seconds);
    println!("   Timezone offset: {} minutes", config.timezone_offset_minutes);
    println!("   Poll interval: {} seconds", config.poll_interval_seconds);
    if config.networks.is_empty() {
        println!("   Networks: none (set PROVIDER_URL_<NETWORK> to add one)");
    } else {
        for (network, url) in &config.networks {
            println!("   Network {}: {}", network, url);
        }
    }

    Ok(())
}

fn print_event(event: &TriggerFired, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!(
            "🔔 [{}] instance {} trigger '{}' fired",
            event.fired_at.format("%Y-%m-%d %H:%M:%S"),
            event.instance_id,
            event.trigger_name
        );
    }
    Ok(())
}

/// Handle the 'watch' command: poll running instances until Ctrl-C
pub async fn handle_watch(ctx: AppContext, json: bool) -> Result<()> {
    let period = ctx.config.poll_interval();
    let poller = Arc::new(TriggerPoller::new(
        ctx.orchestrator.clone(),
        ctx.clock.clone(),
        period,
    ));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poll_task = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move { poller.run(events_tx, shutdown_rx).await })
    };

    if !json {
        println!(
            "👀 Watching running instances every {} seconds (Ctrl-C to stop)",
            period.as_secs()
        );
    }

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => print_event(&event, json)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if !json {
                    println!("\n🛑 Stopping watcher...");
                }
                break;
            }
        }
    }

    // The poller may already be gone if it stopped on its own
    let _ = shutdown_tx.send(true);
    poll_task.await.context("Poller task panicked")??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert!(matches!(parse_log_level("DEBUG"), Some(LogLevel::Debug)));
        assert!(matches!(parse_log_level("warn"), Some(LogLevel::Warn)));
        assert!(parse_log_level("verbose").is_none());
        assert_eq!(log_level_name(&LogLevel::Trace), "trace");
    }

    #[test]
    fn test_event_json_shape() {
        let event = TriggerFired {
            instance_id: uuid::Uuid::nil(),
            trigger_name: "tick".to_string(),
            fired_at: chrono::Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["trigger_name"], "tick");
        assert_eq!(value["instance_id"], uuid::Uuid::nil().to_string());
        assert!(print_event(&event, true).is_ok());
    }
}
