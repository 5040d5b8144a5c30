//! Workflow, instance and trigger command handlers

use crate::cli::context::AppContext;
use anyhow::{Context, Result};
use ensemble_core::models::{InstanceStatus, Workflow, WorkflowInstance};
use ensemble_core::workflow::TriggerCheck;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Parse a workflow document, assigning a fresh `_id` when the file has none
pub fn load_workflow_file(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file {}", path.display()))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let mut document: serde_json::Value = if is_json {
        serde_json::from_str(&content).context("Failed to parse workflow JSON")?
    } else {
        serde_yaml::from_str(&content).context("Failed to parse workflow YAML")?
    };

    let object = document
        .as_object_mut()
        .context("Workflow file must contain a mapping at the top level")?;
    if !object.contains_key("_id") {
        object.insert(
            "_id".to_string(),
            serde_json::Value::String(Uuid::new_v4().to_string()),
        );
    }

    serde_json::from_value(document).context("Invalid workflow definition")
}

fn parse_id(id: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid {} ID format (expected UUID)", what))
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Handle workflow register command
pub async fn handle_workflow_register(ctx: &AppContext, path: &Path, json: bool) -> Result<()> {
    let workflow = load_workflow_file(path)?;
    ctx.orchestrator
        .register_workflow(&workflow)
        .await
        .context("Failed to register workflow")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        println!("✅ Registered workflow '{}'", workflow.name);
        println!("   Workflow ID: {}", workflow.id);
        println!("   Contracts:   {}", workflow.contracts.len());
        println!("   Triggers:    {}", workflow.triggers.len());
        println!();
        println!(
            "Use 'ensemble instance create {} --param key=value' to create an instance",
            workflow.id
        );
    }

    Ok(())
}

/// Handle workflow list command
pub async fn handle_workflow_list(ctx: &AppContext, json: bool) -> Result<()> {
    let workflows = ctx.orchestrator.list_workflows().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!("No workflows registered.");
        println!("Use 'ensemble workflow register <file>' to add one.");
        return Ok(());
    }

    println!("Registered Workflows");
    println!("====================");
    for workflow in workflows {
        println!("  {}  {}", workflow.id, workflow.name);
        if let Some(description) = &workflow.description {
            println!("      {}", description);
        }
        let triggers: Vec<String> = workflow
            .triggers
            .iter()
            .map(|t| format!("{} ({})", t.name, t.type_name()))
            .collect();
        if !triggers.is_empty() {
            println!("      triggers: {}", triggers.join(", "));
        }
    }

    Ok(())
}

fn print_instance(instance: &WorkflowInstance) {
    println!("Workflow Instance");
    println!("=================");
    println!("Instance ID:    {}", instance.id);
    println!("Workflow ID:    {}", instance.workflow_id);
    println!("Status:         {}", instance.status);
    println!("Current Step:   {}", instance.current_step_index);
    println!("Created At:     {}", format_time(Some(instance.created_at)));
    println!("Started At:     {}", format_time(instance.started_at));
    println!("Completed At:   {}", format_time(instance.completed_at));

    if !instance.params.is_empty() {
        println!();
        println!("Parameters:");
        let mut params: Vec<_> = instance.params.iter().collect();
        params.sort();
        for (key, value) in params {
            println!("  {} = {}", key, value);
        }
    }

    if !instance.trigger_snapshots.is_empty() {
        println!();
        println!("Trigger Snapshots:");
        let mut snapshots: Vec<_> = instance.trigger_snapshots.values().collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        for snapshot in snapshots {
            let data = snapshot
                .data
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} at {}: {}",
                snapshot.name,
                snapshot.last_execution.format("%Y-%m-%d %H:%M:%S"),
                data
            );
        }
    }
}

/// Handle instance create command
pub async fn handle_instance_create(
    ctx: &AppContext,
    workflow_id: &str,
    params: Vec<(String, String)>,
    json: bool,
) -> Result<()> {
    let workflow_id = parse_id(workflow_id, "workflow")?;
    let params: HashMap<String, String> = params.into_iter().collect();

    let instance = ctx
        .orchestrator
        .create(workflow_id, params)
        .await
        .context("Failed to create instance")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instance)?);
    } else {
        println!("✅ Created instance {}", instance.id);
        println!("   Status: {}", instance.status);
        println!();
        println!("Use 'ensemble instance start {}' to start it", instance.id);
    }

    Ok(())
}

/// Handle instance list command
pub async fn handle_instance_list(
    ctx: &AppContext,
    status: Option<InstanceStatus>,
    json: bool,
) -> Result<()> {
    let instances = match status {
        Some(status) => ctx.orchestrator.find_by_status(status).await?,
        None => ctx.orchestrator.find_all().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!("No instances found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<36}  {:<8}  {}",
        "INSTANCE", "WORKFLOW", "STATUS", "CREATED"
    );
    for instance in instances {
        println!(
            "{:<36}  {:<36}  {:<8}  {}",
            instance.id,
            instance.workflow_id,
            instance.status.as_str(),
            format_time(Some(instance.created_at))
        );
    }

    Ok(())
}

/// Handle instance show command
pub async fn handle_instance_show(ctx: &AppContext, instance_id: &str, json: bool) -> Result<()> {
    let instance = ctx
        .orchestrator
        .find_one(parse_id(instance_id, "instance")?)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instance)?);
    } else {
        print_instance(&instance);
    }

    Ok(())
}

/// Handle instance start command
pub async fn handle_instance_start(ctx: &AppContext, instance_id: &str, json: bool) -> Result<()> {
    let instance = ctx
        .orchestrator
        .start(parse_id(instance_id, "instance")?)
        .await
        .context("Failed to start instance")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instance)?);
    } else {
        println!("▶️  Started instance {}", instance.id);
        println!("   Started At: {}", format_time(instance.started_at));
    }

    Ok(())
}

/// Handle instance stop command
pub async fn handle_instance_stop(ctx: &AppContext, instance_id: &str, json: bool) -> Result<()> {
    let instance = ctx
        .orchestrator
        .stop(parse_id(instance_id, "instance")?)
        .await
        .context("Failed to stop instance")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instance)?);
    } else {
        println!("⏹️  Stopped instance {}", instance.id);
        println!("   Completed At: {}", format_time(instance.completed_at));
    }

    Ok(())
}

/// Handle instance materialize command
pub async fn handle_instance_materialize(
    ctx: &AppContext,
    instance_id: &str,
    json: bool,
) -> Result<()> {
    let workflow = ctx
        .orchestrator
        .materialize(parse_id(instance_id, "instance")?)
        .await
        .context("Failed to materialize workflow")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        print!("{}", serde_yaml::to_string(&workflow)?);
    }

    Ok(())
}

fn check_to_json(check: &TriggerCheck) -> serde_json::Value {
    match &check.outcome {
        Ok(changed) => serde_json::json!({ "trigger": check.trigger, "changed": changed }),
        Err(e) => serde_json::json!({
            "trigger": check.trigger,
            "changed": false,
            "error": e.to_string()
        }),
    }
}

fn print_check(check: &TriggerCheck) {
    match &check.outcome {
        Ok(true) => println!("🔔 {}: changed", check.trigger),
        Ok(false) => println!("   {}: unchanged", check.trigger),
        Err(e) => println!("❌ {}: {}", check.trigger, e),
    }
}

/// Handle trigger check command
pub async fn handle_trigger_check(
    ctx: &AppContext,
    instance_id: &str,
    trigger: Option<String>,
    json: bool,
) -> Result<()> {
    let instance_id = parse_id(instance_id, "instance")?;

    let checks = match trigger {
        Some(name) => {
            let outcome = ctx.orchestrator.check_trigger(instance_id, &name).await;
            vec![TriggerCheck {
                trigger: name,
                outcome,
            }]
        }
        None => ctx.orchestrator.check_triggers(instance_id).await?,
    };

    if json {
        let output: Vec<serde_json::Value> = checks.iter().map(check_to_json).collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if checks.is_empty() {
        println!("Workflow has no triggers.");
    } else {
        for check in &checks {
            print_check(check);
        }
    }

    Ok(())
}
