//! Trigger evaluation and snapshot diffing

use crate::blockchain::abi::AbiRegistry;
use crate::blockchain::provider::BlockchainProvider;
use crate::error::{EnsembleError, Result};
use crate::models::workflow::{
    PeriodicInterval, Trigger, TriggerKind, TriggerSnapshot, Workflow, WorkflowInstance,
};
use crate::services::logging;
use crate::workflow::clock::Clock;
use crate::workflow::periodic::periodic_due;
use crate::workflow::snapshots::SnapshotStore;
use chrono::{FixedOffset, Offset, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Canonical string form used to compare trigger results.
///
/// Quantities arrive from the decoder as decimal strings, so the same value
/// compares equal at any integer width. Strings, including hex byte strings,
/// compare exactly. Sequences render as a JSON array of their members'
/// canonical forms so nesting stays unambiguous.
pub fn canonical_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let members: Vec<Value> = items
                .iter()
                .map(|item| Value::String(canonical_string(item)))
                .collect();
            Value::Array(members).to_string()
        }
        Value::Object(_) => value.to_string(),
    }
}

/// Decides whether a trigger transitioned since its last evaluation
pub struct TriggerEvaluator {
    providers: Arc<dyn BlockchainProvider>,
    abis: Arc<AbiRegistry>,
    snapshots: Arc<SnapshotStore>,
    clock: Arc<dyn Clock>,
    /// Zone whose calendar fields periodic triggers compare
    timezone: FixedOffset,
}

impl TriggerEvaluator {
    pub fn new(
        providers: Arc<dyn BlockchainProvider>,
        abis: Arc<AbiRegistry>,
        snapshots: Arc<SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            providers,
            abis,
            snapshots,
            clock,
            timezone: Utc.fix(),
        }
    }

    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }

    /// Evaluate `trigger` for `instance`, replacing its stored snapshot.
    ///
    /// Unsupported trigger types are logged and reported as unchanged. Other
    /// failures propagate; a failed remote read leaves the snapshot untouched.
    pub async fn evaluate(
        &self,
        trigger: &Trigger,
        instance: &WorkflowInstance,
        workflow: &Workflow,
    ) -> Result<bool> {
        tracing::debug!(trigger = %trigger.name, instance_id = %instance.id, "Validating trigger");

        let changed = match &trigger.kind {
            TriggerKind::Contract { contract, method } => {
                self.check_contract_trigger(trigger, contract, method, instance, workflow)
                    .await?
            }
            TriggerKind::Periodic { interval } => {
                self.check_periodic_trigger(trigger, *interval, instance)
                    .await?
            }
            TriggerKind::Unsupported { type_name } => {
                let error = EnsembleError::UnsupportedTriggerType(type_name.clone());
                logging::log_error(&error.to_string(), Some(&trigger.name));
                return Ok(false);
            }
        };

        logging::log_trigger_evaluation(instance.id, &trigger.name, trigger.type_name(), changed);
        Ok(changed)
    }

    async fn check_contract_trigger(
        &self,
        trigger: &Trigger,
        contract: &str,
        method: &str,
        instance: &WorkflowInstance,
        workflow: &Workflow,
    ) -> Result<bool> {
        let reference = workflow.contract(contract).ok_or_else(|| {
            EnsembleError::NotFound(format!(
                "contract '{}' in workflow '{}'",
                contract, workflow.name
            ))
        })?;

        let abi = self
            .abis
            .get(&reference.abi)
            .ok_or_else(|| EnsembleError::NotFound(format!("ABI '{}'", reference.abi)))?;

        let function = abi
            .function(method)
            .ok_or_else(|| EnsembleError::InvalidTrigger {
                trigger: trigger.name.clone(),
                reason: format!("ABI '{}' has no function '{}'", reference.abi, method),
            })?;
        if !function.inputs.is_empty() {
            return Err(EnsembleError::InvalidTrigger {
                trigger: trigger.name.clone(),
                reason: format!("method '{}' takes arguments", method),
            });
        }

        let caller = self.providers.get_provider(&reference.network)?;
        tracing::debug!(
            contract = %reference.name,
            address = %reference.address,
            network = %reference.network,
            "Contract loaded"
        );

        // Remote read completes before anything is written
        let value = caller.call(&reference.address, &function).await?;

        let snapshot = TriggerSnapshot {
            name: trigger.name.clone(),
            data: Some(value),
            last_execution: self.clock.now(),
        };
        let current = snapshot.data.as_ref().map(canonical_string);
        let previous = self.snapshots.replace(instance.id, snapshot).await?;

        Ok(match previous {
            None => true,
            Some(previous) => previous.data.as_ref().map(canonical_string) != current,
        })
    }

    async fn check_periodic_trigger(
        &self,
        trigger: &Trigger,
        interval: PeriodicInterval,
        instance: &WorkflowInstance,
    ) -> Result<bool> {
        let now = self.clock.now();
        let snapshot = TriggerSnapshot {
            name: trigger.name.clone(),
            data: None,
            last_execution: now,
        };
        let previous = self.snapshots.replace(instance.id, snapshot).await?;

        let local_now = now.with_timezone(&self.timezone);
        let local_previous = previous.map(|p| p.last_execution.with_timezone(&self.timezone));
        Ok(periodic_due(interval, &local_now, local_previous.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::abi::{Abi, AbiFunction};
    use crate::blockchain::provider::{ContractCaller, ProviderRegistry};
    use crate::error::RpcError;
    use crate::models::workflow::ContractReference;
    use crate::workflow::clock::ManualClock;
    use crate::workflow::persistence::{InMemoryInstanceStore, InstanceStore};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone};
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use uuid::Uuid;

    const TOKEN_ABI: &str = r#"[
        {"type": "function", "name": "totalSupply", "inputs": [],
         "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"},
        {"type": "function", "name": "decimals", "inputs": [],
         "outputs": [{"name": "", "type": "uint8"}], "stateMutability": "view"},
        {"type": "function", "name": "holders", "inputs": [],
         "outputs": [{"name": "", "type": "uint256[]"}], "stateMutability": "view"},
        {"type": "function", "name": "reserves", "inputs": [],
         "outputs": [{"name": "", "type": "tuple", "components": [
             {"name": "base", "type": "uint256"}, {"name": "quote", "type": "uint256"}]}],
         "stateMutability": "view"},
        {"type": "function", "name": "balanceOf",
         "inputs": [{"name": "owner", "type": "address"}],
         "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"}
    ]"#;

    /// Returns queued values in order, repeating the last one
    struct ScriptedCaller {
        values: Mutex<VecDeque<Value>>,
    }

    impl ScriptedCaller {
        fn new(values: Vec<Value>) -> Self {
            Self {
                values: Mutex::new(values.into()),
            }
        }
    }

    #[async_trait]
    impl ContractCaller for ScriptedCaller {
        async fn call(
            &self,
            _address: &str,
            _function: &AbiFunction,
        ) -> std::result::Result<Value, RpcError> {
            let mut values = self.values.lock().unwrap();
            if values.len() > 1 {
                Ok(values.pop_front().unwrap())
            } else {
                values
                    .front()
                    .cloned()
                    .ok_or_else(|| RpcError::Transport("no scripted value".to_string()))
            }
        }
    }

    /// Decodes queued raw return data with the called function's ABI
    struct DecodingCaller {
        payloads: Mutex<VecDeque<Vec<u8>>>,
    }

    impl DecodingCaller {
        fn new(payloads: Vec<Vec<u8>>) -> Self {
            Self {
                payloads: Mutex::new(payloads.into()),
            }
        }
    }

    #[async_trait]
    impl ContractCaller for DecodingCaller {
        async fn call(
            &self,
            _address: &str,
            function: &AbiFunction,
        ) -> std::result::Result<Value, RpcError> {
            let payload = self
                .payloads
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| RpcError::Transport("no payload queued".to_string()))?;
            function.decode_output(&payload)
        }
    }

    fn words(values: &[u64]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| {
                let mut w = vec![0u8; 32];
                w[24..].copy_from_slice(&v.to_be_bytes());
                w
            })
            .collect()
    }

    struct Harness {
        evaluator: TriggerEvaluator,
        clock: Arc<ManualClock>,
        workflow: Workflow,
        instance: WorkflowInstance,
        store: Arc<InMemoryInstanceStore>,
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn harness(values: Vec<Value>, network: &str) -> Harness {
        harness_with(Arc::new(ScriptedCaller::new(values)), network).await
    }

    async fn harness_with(caller: Arc<dyn ContractCaller>, network: &str) -> Harness {
        let store = Arc::new(InMemoryInstanceStore::new());
        let workflow = Workflow {
            id: Uuid::new_v4(),
            name: "supply-watch".to_string(),
            description: None,
            contracts: vec![ContractReference {
                name: "token".to_string(),
                address: "0x00000000000000000000000000000000000000aa".to_string(),
                network: "sepolia".to_string(),
                abi: "erc20".to_string(),
                extra: Default::default(),
            }],
            triggers: vec![
                Trigger::contract("supply", "token", "totalSupply"),
                Trigger::periodic("tick", PeriodicInterval::Minute),
            ],
            steps: vec![],
            extra: Default::default(),
        };
        let instance = WorkflowInstance::new(workflow.id, HashMap::new());
        let instance = store.save_instance(&instance).await.unwrap();

        let providers = ProviderRegistry::new();
        providers.register(network, caller);
        let abis = AbiRegistry::new();
        abis.register("erc20", Abi::from_json(TOKEN_ABI).unwrap());

        let clock = Arc::new(ManualClock::new(at("2024-05-01T12:00:30Z")));
        let evaluator = TriggerEvaluator::new(
            Arc::new(providers),
            Arc::new(abis),
            Arc::new(SnapshotStore::new(store.clone())),
            clock.clone(),
        );

        Harness {
            evaluator,
            clock,
            workflow,
            instance,
            store,
        }
    }

    #[tokio::test]
    async fn test_contract_trigger_detects_changes() {
        let h = harness(vec![json!("100"), json!("100"), json!("150")], "sepolia").await;
        let trigger = h.workflow.trigger("supply").unwrap().clone();

        // No prior snapshot counts as a change
        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
        assert!(!h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());

        let stored = h.store.find_instance(h.instance.id).await.unwrap().unwrap();
        assert_eq!(stored.trigger_snapshots["supply"].data, Some(json!("150")));
    }

    #[tokio::test]
    async fn test_byte_strings_compare_exactly() {
        let h = harness(vec![json!("0x0001"), json!("0x01"), json!("0x01")], "sepolia").await;
        let trigger = h.workflow.trigger("supply").unwrap().clone();

        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
        assert!(!h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
    }

    #[tokio::test]
    async fn test_array_and_tuple_results_detect_member_changes() {
        let holders = DecodingCaller::new(vec![
            words(&[32, 1, 5]),
            words(&[32, 2, 7, 9]),
            words(&[32, 2, 7, 9]),
        ]);
        let h = harness_with(Arc::new(holders), "sepolia").await;
        let trigger = Trigger::contract("holders", "token", "holders");

        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
        assert!(!h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());

        let reserves = DecodingCaller::new(vec![words(&[1, 5]), words(&[1, 6])]);
        let h = harness_with(Arc::new(reserves), "sepolia").await;
        let trigger = Trigger::contract("reserves", "token", "reserves");

        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());

        let stored = h.store.find_instance(h.instance.id).await.unwrap().unwrap();
        assert_eq!(stored.trigger_snapshots["reserves"].data, Some(json!(["1", "6"])));
    }

    #[tokio::test]
    async fn test_integer_width_does_not_change_the_value() {
        // Same quantity read through a narrow and a wide return type
        let caller = DecodingCaller::new(vec![words(&[5]), words(&[5])]);
        let h = harness_with(Arc::new(caller), "sepolia").await;
        let narrow = Trigger::contract("supply", "token", "decimals");
        let wide = Trigger::contract("supply", "token", "totalSupply");

        assert!(h.evaluator.evaluate(&narrow, &h.instance, &h.workflow).await.unwrap());
        assert!(!h.evaluator.evaluate(&wide, &h.instance, &h.workflow).await.unwrap());
    }

    #[tokio::test]
    async fn test_provider_not_configured() {
        let h = harness(vec![json!("1")], "fuse").await;
        let trigger = h.workflow.trigger("supply").unwrap().clone();

        let result = h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await;
        assert!(matches!(result, Err(EnsembleError::ProviderNotConfigured(n)) if n == "sepolia"));

        let stored = h.store.find_instance(h.instance.id).await.unwrap().unwrap();
        assert!(stored.trigger_snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_rpc_failure_leaves_snapshot_untouched() {
        let h = harness(vec![], "sepolia").await;
        let trigger = h.workflow.trigger("supply").unwrap().clone();

        let result = h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await;
        assert!(matches!(result, Err(EnsembleError::Rpc(RpcError::Transport(_)))));

        let stored = h.store.find_instance(h.instance.id).await.unwrap().unwrap();
        assert!(stored.trigger_snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_method_with_arguments_is_invalid() {
        let h = harness(vec![json!("1")], "sepolia").await;
        let balance = Trigger::contract("balance", "token", "balanceOf");
        let missing = Trigger::contract("burn", "token", "burnRate");

        assert!(matches!(
            h.evaluator.evaluate(&balance, &h.instance, &h.workflow).await,
            Err(EnsembleError::InvalidTrigger { .. })
        ));
        assert!(matches!(
            h.evaluator.evaluate(&missing, &h.instance, &h.workflow).await,
            Err(EnsembleError::InvalidTrigger { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_contract_is_not_found() {
        let h = harness(vec![json!("1")], "sepolia").await;
        let trigger = Trigger::contract("other", "vault", "totalSupply");

        assert!(matches!(
            h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await,
            Err(EnsembleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_periodic_minute_boundary() {
        let h = harness(vec![], "sepolia").await;
        let trigger = h.workflow.trigger("tick").unwrap().clone();

        // 12:00:30, first evaluation
        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());

        // 12:00:50, same minute
        h.clock.advance(Duration::seconds(20));
        assert!(!h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());

        // 12:01:05
        h.clock.advance(Duration::seconds(15));
        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());

        let stored = h.store.find_instance(h.instance.id).await.unwrap().unwrap();
        let snapshot = &stored.trigger_snapshots["tick"];
        assert_eq!(snapshot.last_execution, at("2024-05-01T12:01:05Z"));
        assert!(snapshot.data.is_none());
    }

    #[tokio::test]
    async fn test_periodic_always() {
        let h = harness(vec![], "sepolia").await;
        let trigger = Trigger::periodic("every", PeriodicInterval::Always);

        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
        assert!(h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
    }

    #[tokio::test]
    async fn test_daily_uses_reference_timezone() {
        let h = harness(vec![], "sepolia").await;
        // UTC+3: 22:30 UTC on May 1 is already May 2 locally
        let evaluator = h
            .evaluator
            .with_timezone(FixedOffset::east_opt(3 * 3600).unwrap());
        let trigger = Trigger::periodic("daily", PeriodicInterval::Daily);

        h.clock.set(Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap());
        assert!(evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());

        h.clock.set(Utc.with_ymd_and_hms(2024, 5, 1, 22, 30, 0).unwrap());
        assert!(evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());

        h.clock.set(Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap());
        assert!(!evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
    }

    #[tokio::test]
    async fn test_unsupported_trigger_is_unchanged() {
        let h = harness(vec![], "sepolia").await;
        let trigger = Trigger {
            name: "webhook".to_string(),
            kind: TriggerKind::Unsupported {
                type_name: "webhook".to_string(),
            },
            extra: Default::default(),
        };

        assert!(!h.evaluator.evaluate(&trigger, &h.instance, &h.workflow).await.unwrap());
        let stored = h.store.find_instance(h.instance.id).await.unwrap().unwrap();
        assert!(stored.trigger_snapshots.is_empty());
    }

    #[test]
    fn test_canonical_string_forms() {
        assert_eq!(canonical_string(&json!(5)), canonical_string(&json!("5")));
        assert_eq!(canonical_string(&json!(true)), "true");
        assert_eq!(canonical_string(&json!("hello")), "hello");
        assert_eq!(canonical_string(&Value::Null), "");
        assert_eq!(canonical_string(&json!(["1", 2, "0x01"])), r#"["1","2","0x01"]"#);
        assert_ne!(canonical_string(&json!("0x0001")), canonical_string(&json!("0x01")));
    }

    #[test]
    fn test_canonical_string_keeps_nesting() {
        assert_ne!(
            canonical_string(&json!([["1", "2"], ["3"]])),
            canonical_string(&json!([["1"], ["2", "3"]]))
        );
        assert_ne!(
            canonical_string(&json!(["a,b"])),
            canonical_string(&json!(["a", "b"]))
        );
    }
}
