//! Workflow template and instance data models

use crate::models::document::Document;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a workflow instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Created but never started
    #[default]
    Pending,
    /// Triggers are being evaluated
    Running,
    /// Stopped by an operator
    Stopped,
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "running" => Ok(InstanceStatus::Running),
            "stopped" => Ok(InstanceStatus::Stopped),
            other => Err(format!("unknown instance status '{}'", other)),
        }
    }
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployed contract a workflow talks to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractReference {
    /// Name triggers and steps refer to
    pub name: String,
    /// Deployed address (0x-prefixed)
    pub address: String,
    /// Network the contract lives on
    pub network: String,
    /// Identifier of the ABI document in the ABI registry
    pub abi: String,
    #[serde(flatten)]
    pub extra: IndexMap<String, Document>,
}

/// How often a periodic trigger fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicInterval {
    Always,
    Daily,
    Hourly,
    Minute,
}

impl FromStr for PeriodicInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(PeriodicInterval::Always),
            "daily" => Ok(PeriodicInterval::Daily),
            "hourly" => Ok(PeriodicInterval::Hourly),
            "minute" => Ok(PeriodicInterval::Minute),
            other => Err(format!("unknown periodic interval '{}'", other)),
        }
    }
}

impl fmt::Display for PeriodicInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeriodicInterval::Always => "always",
            PeriodicInterval::Daily => "daily",
            PeriodicInterval::Hourly => "hourly",
            PeriodicInterval::Minute => "minute",
        };
        f.write_str(s)
    }
}

/// Type-specific part of a trigger definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerKind {
    /// Fires when a zero-argument view method returns a different value
    Contract { contract: String, method: String },
    /// Fires on calendar boundaries
    Periodic { interval: PeriodicInterval },
    /// Trigger type this engine does not know how to evaluate
    Unsupported { type_name: String },
}

/// Named trigger attached to a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTrigger", into = "RawTrigger")]
pub struct Trigger {
    /// Unique within a workflow; snapshots are keyed by it
    pub name: String,
    pub kind: TriggerKind,
    /// Fields the engine does not interpret, kept as written
    pub extra: IndexMap<String, Document>,
}

impl Trigger {
    pub fn contract(name: &str, contract: &str, method: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TriggerKind::Contract {
                contract: contract.to_string(),
                method: method.to_string(),
            },
            extra: IndexMap::new(),
        }
    }

    pub fn periodic(name: &str, interval: PeriodicInterval) -> Self {
        Self {
            name: name.to_string(),
            kind: TriggerKind::Periodic { interval },
            extra: IndexMap::new(),
        }
    }

    /// The `type` tag as it appears in workflow documents
    pub fn type_name(&self) -> &str {
        match &self.kind {
            TriggerKind::Contract { .. } => "contract",
            TriggerKind::Periodic { .. } => "periodic",
            TriggerKind::Unsupported { type_name } => type_name,
        }
    }
}

/// Wire shape of a trigger: a flat record tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTrigger {
    name: String,
    #[serde(rename = "type")]
    trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interval: Option<String>,
    #[serde(flatten)]
    extra: IndexMap<String, Document>,
}

impl TryFrom<RawTrigger> for Trigger {
    type Error = String;

    fn try_from(raw: RawTrigger) -> Result<Self, Self::Error> {
        let kind = match raw.trigger_type.as_str() {
            "contract" => {
                let contract = raw
                    .contract
                    .ok_or_else(|| format!("contract trigger '{}' has no contract", raw.name))?;
                let method = raw
                    .method
                    .ok_or_else(|| format!("contract trigger '{}' has no method", raw.name))?;
                TriggerKind::Contract { contract, method }
            }
            "periodic" => {
                let interval = raw
                    .interval
                    .ok_or_else(|| format!("periodic trigger '{}' has no interval", raw.name))?
                    .parse()?;
                TriggerKind::Periodic { interval }
            }
            other => TriggerKind::Unsupported {
                type_name: other.to_string(),
            },
        };

        Ok(Trigger {
            name: raw.name,
            kind,
            extra: raw.extra,
        })
    }
}

impl From<Trigger> for RawTrigger {
    fn from(trigger: Trigger) -> Self {
        let mut raw = RawTrigger {
            trigger_type: trigger.type_name().to_string(),
            name: trigger.name,
            contract: None,
            method: None,
            interval: None,
            extra: trigger.extra,
        };
        match trigger.kind {
            TriggerKind::Contract { contract, method } => {
                raw.contract = Some(contract);
                raw.method = Some(method);
            }
            TriggerKind::Periodic { interval } => raw.interval = Some(interval.to_string()),
            TriggerKind::Unsupported { .. } => {}
        }
        raw
    }
}

/// Immutable workflow template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    /// Identity field; never interpolated
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub contracts: Vec<ContractReference>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Step documents, opaque to the trigger engine
    #[serde(default)]
    pub steps: Vec<Document>,
    /// Other top-level template keys, kept as written
    #[serde(flatten)]
    pub extra: IndexMap<String, Document>,
}

impl Workflow {
    pub fn contract(&self, name: &str) -> Option<&ContractReference> {
        self.contracts.iter().find(|c| c.name == name)
    }

    pub fn trigger(&self, name: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.name == name)
    }
}

/// Last observed result of a trigger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerSnapshot {
    /// Matches `Trigger::name`
    pub name: String,
    /// Raw call result; contract triggers only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub last_execution: DateTime<Utc>,
}

/// Stateful execution of a workflow template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    /// Template this instance runs
    pub workflow_id: Uuid,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub current_step_index: u32,
    /// Trigger name to last snapshot
    #[serde(default)]
    pub trigger_snapshots: HashMap<String, TriggerSnapshot>,
    /// Values substituted for `$name` placeholders
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Bumped by the store on every successful save
    #[serde(default)]
    pub version: u64,
}

impl WorkflowInstance {
    /// Fresh pending instance of `workflow_id`
    pub fn new(workflow_id: Uuid, params: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: InstanceStatus::Pending,
            current_step_index: 0,
            trigger_snapshots: HashMap::new(),
            params,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
            version: 0,
        }
    }
}
