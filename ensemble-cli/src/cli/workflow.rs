//! Workflow, instance and trigger CLI commands

use clap::Subcommand;
use ensemble_core::models::InstanceStatus;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// Register a workflow template from a YAML or JSON file
    Register {
        /// Path to the workflow file
        workflow_file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List registered workflow templates
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum InstanceCommands {
    /// Create a pending instance of a workflow
    Create {
        /// Workflow ID (UUID)
        workflow_id: String,

        /// Template parameter, repeatable
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List workflow instances
    List {
        /// Only show instances with this status (pending, running, stopped)
        #[arg(short, long)]
        status: Option<InstanceStatus>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show one instance including its trigger snapshots
    Show {
        /// Instance ID (UUID)
        instance_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Start a pending or stopped instance
    Start {
        /// Instance ID (UUID)
        instance_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Stop a running instance
    Stop {
        /// Instance ID (UUID)
        instance_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the workflow with the instance parameters substituted
    Materialize {
        /// Instance ID (UUID)
        instance_id: String,

        /// Output in JSON format instead of YAML
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum TriggerCommands {
    /// Evaluate the triggers of an instance once
    Check {
        /// Instance ID (UUID)
        instance_id: String,

        /// Only evaluate this trigger
        #[arg(short, long)]
        trigger: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Parse a `key=value` template parameter
pub fn parse_param(input: &str) -> Result<(String, String), String> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", input))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", input));
    }
    Ok((key.to_string(), value.to_string()))
}
