mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::context::{load_configuration, resolve_config_path, AppContext};
use cli::workflow::{InstanceCommands, TriggerCommands, WorkflowCommands};
use cli::{handlers, workflow_handlers};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ensemble")]
#[command(version = "0.1.0")]
#[command(about = "Trigger engine for on-chain workflow automation")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    /// Path to configuration file (default: ~/.config/ensemble/config.toml)
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Workflow template commands
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Workflow instance commands
    ///
    /// Examples:
    ///   ensemble instance create <workflow-id> --param recipient=0xabc
    ///   ensemble instance list --status running
    ///   ensemble instance materialize <instance-id> --json
    Instance {
        #[command(subcommand)]
        command: InstanceCommands,
    },

    /// Trigger evaluation commands
    Trigger {
        #[command(subcommand)]
        command: TriggerCommands,
    },

    /// Poll the triggers of running instances until Ctrl-C
    Watch {
        /// Print fired triggers as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Configure ensemble settings interactively
    Config {
        /// Start interactive configuration setup
        #[arg(long)]
        init: bool,
    },
}

/// Load configuration, start logging and wire the core services
fn app_context(config_path: &PathBuf) -> Result<AppContext> {
    let config = load_configuration(config_path)?;
    ensemble_core::services::init_logging(config.log_level.clone())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    AppContext::from_configuration(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config_file)?;

    match cli.command {
        Commands::Config { init } => {
            if init {
                handlers::handle_config_init(config_path).await?;
            } else {
                println!("Config command requires --init flag");
                println!("Usage: ensemble config --init [--config-file PATH]");
            }
        }
        Commands::Workflow { command } => {
            let ctx = app_context(&config_path)?;
            match command {
                WorkflowCommands::Register {
                    workflow_file,
                    json,
                } => {
                    workflow_handlers::handle_workflow_register(&ctx, &workflow_file, json)
                        .await?;
                }
                WorkflowCommands::List { json } => {
                    workflow_handlers::handle_workflow_list(&ctx, json).await?;
                }
            }
        }
        Commands::Instance { command } => {
            let ctx = app_context(&config_path)?;
            match command {
                InstanceCommands::Create {
                    workflow_id,
                    params,
                    json,
                } => {
                    workflow_handlers::handle_instance_create(&ctx, &workflow_id, params, json)
                        .await?;
                }
                InstanceCommands::List { status, json } => {
                    workflow_handlers::handle_instance_list(&ctx, status, json).await?;
                }
                InstanceCommands::Show { instance_id, json } => {
                    workflow_handlers::handle_instance_show(&ctx, &instance_id, json).await?;
                }
                InstanceCommands::Start { instance_id, json } => {
                    workflow_handlers::handle_instance_start(&ctx, &instance_id, json).await?;
                }
                InstanceCommands::Stop { instance_id, json } => {
                    workflow_handlers::handle_instance_stop(&ctx, &instance_id, json).await?;
                }
                InstanceCommands::Materialize { instance_id, json } => {
                    workflow_handlers::handle_instance_materialize(&ctx, &instance_id, json)
                        .await?;
                }
            }
        }
        Commands::Trigger { command } => {
            let ctx = app_context(&config_path)?;
            match command {
                TriggerCommands::Check {
                    instance_id,
                    trigger,
                    json,
                } => {
                    workflow_handlers::handle_trigger_check(&ctx, &instance_id, trigger, json)
                        .await?;
                }
            }
        }
        Commands::Watch { json } => {
            handlers::handle_watch(app_context(&config_path)?, json).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use ensemble_core::models::InstanceStatus;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_instance_create_params() {
        let cli = Cli::try_parse_from([
            "ensemble",
            "instance",
            "create",
            "0b9b6a4e-6a59-4f43-a4a4-9c1ef2a0b6f1",
            "--param",
            "recipient=0xabc",
            "-p",
            "amount=10",
        ])
        .unwrap();

        match cli.command {
            Commands::Instance {
                command: InstanceCommands::Create { params, json, .. },
            } => {
                assert!(!json);
                assert_eq!(
                    params,
                    vec![
                        ("recipient".to_string(), "0xabc".to_string()),
                        ("amount".to_string(), "10".to_string()),
                    ]
                );
            }
            _ => panic!("expected instance create"),
        }
    }

    #[test]
    fn test_parse_status_filter_and_global_config() {
        let cli = Cli::try_parse_from([
            "ensemble",
            "instance",
            "list",
            "--status",
            "running",
            "--config-file",
            "/tmp/ensemble.toml",
        ])
        .unwrap();

        assert_eq!(cli.config_file, Some(PathBuf::from("/tmp/ensemble.toml")));
        assert!(matches!(
            cli.command,
            Commands::Instance {
                command: InstanceCommands::List {
                    status: Some(InstanceStatus::Running),
                    ..
                }
            }
        ));

        assert!(Cli::try_parse_from(["ensemble", "instance", "list", "--status", "paused"]).is_err());
        assert!(Cli::try_parse_from(["ensemble", "instance", "create", "id", "--param", "novalue"]).is_err());
    }
}
