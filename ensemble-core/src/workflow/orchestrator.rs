//! Workflow instance orchestration and lifecycle management

use crate::error::{EnsembleError, Result};
use crate::models::document::Document;
use crate::models::workflow::{InstanceStatus, Workflow, WorkflowInstance};
use crate::services::logging;
use crate::workflow::clock::Clock;
use crate::workflow::evaluator::TriggerEvaluator;
use crate::workflow::interpolation::interpolate;
use crate::workflow::persistence::{update_instance, InstanceStore};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Result of one trigger in an instance sweep
#[derive(Debug)]
pub struct TriggerCheck {
    pub trigger: String,
    pub outcome: Result<bool>,
}

/// Instance orchestrator exposing lifecycle and trigger dispatch
pub struct InstanceOrchestrator {
    /// Persistence layer
    store: Arc<dyn InstanceStore>,
    /// Trigger evaluator
    evaluator: Arc<TriggerEvaluator>,
    clock: Arc<dyn Clock>,
}

impl InstanceOrchestrator {
    /// Create new instance orchestrator
    pub fn new(
        store: Arc<dyn InstanceStore>,
        evaluator: Arc<TriggerEvaluator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            evaluator,
            clock,
        }
    }

    /// Register a workflow template
    pub async fn register_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.store.save_workflow(workflow).await?;
        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, "Registered workflow");
        Ok(())
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let mut workflows = self.store.list_workflows().await?;
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }

    pub async fn find_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        self.store
            .find_workflow(workflow_id)
            .await?
            .ok_or_else(|| EnsembleError::NotFound(format!("workflow {}", workflow_id)))
    }

    /// Create a pending instance of `workflow_id`
    pub async fn create(
        &self,
        workflow_id: Uuid,
        params: HashMap<String, String>,
    ) -> Result<WorkflowInstance> {
        let workflow = self.find_workflow(workflow_id).await?;
        let mut instance = WorkflowInstance::new(workflow.id, params);
        instance.created_at = self.clock.now();

        let saved = self.store.save_instance(&instance).await?;
        tracing::info!(
            instance_id = %saved.id,
            workflow = %workflow.name,
            "Created workflow instance"
        );
        Ok(saved)
    }

    pub async fn find_one(&self, instance_id: Uuid) -> Result<WorkflowInstance> {
        self.store
            .find_instance(instance_id)
            .await?
            .ok_or_else(|| EnsembleError::NotFound(format!("workflow instance {}", instance_id)))
    }

    /// All instances, oldest first
    pub async fn find_all(&self) -> Result<Vec<WorkflowInstance>> {
        let mut instances = self.store.list_instances().await?;
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    pub async fn find_by_status(&self, status: InstanceStatus) -> Result<Vec<WorkflowInstance>> {
        let mut instances = self.store.find_by_status(status).await?;
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    /// Move an instance to `running`
    pub async fn start(&self, instance_id: Uuid) -> Result<WorkflowInstance> {
        let now = self.clock.now();
        let (instance, previous) = update_instance(self.store.as_ref(), instance_id, |instance| {
            if instance.status == InstanceStatus::Running {
                return Err(EnsembleError::AlreadyRunning(instance.id));
            }
            let previous = instance.status;
            instance.status = InstanceStatus::Running;
            instance.started_at = Some(now);
            Ok(previous)
        })
        .await?;

        logging::log_lifecycle(instance.id, previous.as_str(), instance.status.as_str());
        Ok(instance)
    }

    /// Move a running instance to `stopped`
    pub async fn stop(&self, instance_id: Uuid) -> Result<WorkflowInstance> {
        let now = self.clock.now();
        let (instance, previous) = update_instance(self.store.as_ref(), instance_id, |instance| {
            if instance.status != InstanceStatus::Running {
                return Err(EnsembleError::NotRunning(instance.id));
            }
            let previous = instance.status;
            instance.status = InstanceStatus::Stopped;
            instance.completed_at = Some(now);
            Ok(previous)
        })
        .await?;

        logging::log_lifecycle(instance.id, previous.as_str(), instance.status.as_str());
        Ok(instance)
    }

    /// Template of `instance_id` with its parameters substituted
    pub async fn materialize(&self, instance_id: Uuid) -> Result<Workflow> {
        let instance = self.find_one(instance_id).await?;
        let workflow = self.find_workflow(instance.workflow_id).await?;

        let template = Document::from_serializable(&workflow)?;
        interpolate(&template, &instance.params)?.into_typed()
    }

    /// Evaluate one named trigger of an instance
    pub async fn check_trigger(&self, instance_id: Uuid, trigger_name: &str) -> Result<bool> {
        let instance = self.find_one(instance_id).await?;
        let workflow = self.find_workflow(instance.workflow_id).await?;
        let trigger = workflow.trigger(trigger_name).ok_or_else(|| {
            EnsembleError::NotFound(format!(
                "trigger '{}' in workflow '{}'",
                trigger_name, workflow.name
            ))
        })?;

        self.evaluator.evaluate(trigger, &instance, &workflow).await
    }

    /// Evaluate every trigger of an instance concurrently
    pub async fn check_triggers(&self, instance_id: Uuid) -> Result<Vec<TriggerCheck>> {
        let instance = self.find_one(instance_id).await?;
        let workflow = self.find_workflow(instance.workflow_id).await?;

        let checks = workflow.triggers.iter().map(|trigger| {
            let evaluator = &self.evaluator;
            let instance = &instance;
            let workflow = &workflow;
            async move {
                TriggerCheck {
                    trigger: trigger.name.clone(),
                    outcome: evaluator.evaluate(trigger, instance, workflow).await,
                }
            }
        });

        Ok(join_all(checks).await)
    }
}
