//! Background sweep over running instances

use crate::error::Result;
use crate::models::workflow::InstanceStatus;
use crate::services::logging;
use crate::workflow::clock::Clock;
use crate::workflow::orchestrator::InstanceOrchestrator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use uuid::Uuid;

/// A trigger transitioned on a running instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerFired {
    pub instance_id: Uuid,
    pub trigger_name: String,
    pub fired_at: DateTime<Utc>,
}

pub struct TriggerPoller {
    orchestrator: Arc<InstanceOrchestrator>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl TriggerPoller {
    pub fn new(
        orchestrator: Arc<InstanceOrchestrator>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        Self {
            orchestrator,
            clock,
            period,
        }
    }

    /// Sweep every `period` until `shutdown` flips to true or its sender is dropped
    pub async fn run(
        &self,
        events: mpsc::UnboundedSender<TriggerFired>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_ms = self.period.as_millis() as u64, "Trigger poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep(&events).await {
                        Ok(fired) => tracing::debug!(fired, "Sweep finished"),
                        Err(e) => logging::log_error(&e.to_string(), Some("trigger sweep")),
                    }
                    if events.is_closed() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Trigger poller stopped");
        Ok(())
    }

    /// Evaluate the triggers of all running instances once, returning how many fired
    pub async fn sweep(&self, events: &mpsc::UnboundedSender<TriggerFired>) -> Result<usize> {
        let running = self
            .orchestrator
            .find_by_status(InstanceStatus::Running)
            .await?;
        let mut fired = 0;

        for instance in running {
            let checks = match self.orchestrator.check_triggers(instance.id).await {
                Ok(checks) => checks,
                Err(e) => {
                    logging::log_error(&e.to_string(), Some(&instance.id.to_string()));
                    continue;
                }
            };

            for check in checks {
                match check.outcome {
                    Ok(true) => {
                        fired += 1;
                        let event = TriggerFired {
                            instance_id: instance.id,
                            trigger_name: check.trigger,
                            fired_at: self.clock.now(),
                        };
                        if events.send(event).is_err() {
                            tracing::debug!("Event receiver dropped");
                        }
                    }
                    Ok(false) => {}
                    Err(e) => logging::log_error(&e.to_string(), Some(&check.trigger)),
                }
            }
        }

        Ok(fired)
    }
}
