//! JSON-RPC provider against a mock node served by warp

use ensemble_core::blockchain::{
    Abi, AbiFunction, AbiRegistry, ContractCaller, JsonRpcProvider, ProviderRegistry, RetryPolicy,
    RetryingCaller,
};
use ensemble_core::models::workflow::{ContractReference, Trigger, Workflow, WorkflowInstance};
use ensemble_core::workflow::{
    InMemoryInstanceStore, InstanceStore, SnapshotStore, SystemClock, TriggerEvaluator,
};
use ensemble_core::RpcError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::Filter;

const TOKEN: &str = "0x00000000000000000000000000000000000000aa";

struct MockNode {
    url: String,
    hits: Arc<AtomicUsize>,
}

/// Serve `handler(request_number, body)` on an ephemeral port
fn spawn_node<F>(handler: F) -> MockNode
where
    F: Fn(usize, Value) -> (StatusCode, Value) + Clone + Send + Sync + 'static,
{
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let route = warp::post()
        .and(warp::body::json())
        .map(move |body: Value| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let (status, reply) = handler(n, body);
            warp::reply::with_status(warp::reply::json(&reply), status)
        });

    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    MockNode {
        url: format!("http://{}", addr),
        hits,
    }
}

fn uint_word(value: u64) -> String {
    format!("0x{:064x}", value)
}

fn result(body: &Value, payload: String) -> Value {
    json!({ "jsonrpc": "2.0", "id": body["id"], "result": payload })
}

fn total_supply() -> AbiFunction {
    AbiFunction::view("totalSupply", &["uint256"])
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_eth_call_decodes_uint() {
    let node = spawn_node(|_, body| {
        assert_eq!(body["method"], "eth_call");
        assert_eq!(body["params"][0]["to"], TOKEN);
        assert_eq!(body["params"][0]["data"], "0x18160ddd");
        assert_eq!(body["params"][1], "latest");
        (StatusCode::OK, result(&body, uint_word(1000)))
    });

    let provider = JsonRpcProvider::new(&node.url, Duration::from_secs(5)).unwrap();
    let value = provider.call(TOKEN, &total_supply()).await.unwrap();

    assert_eq!(value, json!("1000"));
    assert_eq!(node.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_node_error_is_not_retried() {
    let node = spawn_node(|_, body| {
        (
            StatusCode::OK,
            json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "error": { "code": 3, "message": "execution reverted" }
            }),
        )
    });

    let provider = JsonRpcProvider::new(&node.url, Duration::from_secs(5)).unwrap();
    let caller = RetryingCaller::new(Arc::new(provider), fast_policy());
    let error = caller.call(TOKEN, &total_supply()).await.unwrap_err();

    assert!(matches!(error, RpcError::Node { code: 3, .. }));
    assert_eq!(node.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_failures_recover() {
    let node = spawn_node(|n, body| {
        if n < 2 {
            (StatusCode::SERVICE_UNAVAILABLE, json!({ "message": "busy" }))
        } else {
            (StatusCode::OK, result(&body, uint_word(7)))
        }
    });

    let provider = JsonRpcProvider::new(&node.url, Duration::from_secs(5)).unwrap();
    let caller = RetryingCaller::new(Arc::new(provider), fast_policy());
    let value = caller.call(TOKEN, &total_supply()).await.unwrap();

    assert_eq!(value, json!("7"));
    assert_eq!(node.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let node = spawn_node(|_, _| (StatusCode::TOO_MANY_REQUESTS, json!({})));

    let provider = JsonRpcProvider::new(&node.url, Duration::from_secs(5)).unwrap();
    let caller = RetryingCaller::new(Arc::new(provider), fast_policy());
    let error = caller.call(TOKEN, &total_supply()).await.unwrap_err();

    assert!(matches!(error, RpcError::Exhausted { attempts: 3, .. }));
    assert_eq!(node.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_contract_trigger_over_rpc() {
    // Supply stays at 100 for two reads, then grows
    let node = spawn_node(|n, body| {
        let supply = if n < 2 { 100 } else { 250 };
        (StatusCode::OK, result(&body, uint_word(supply)))
    });

    let providers = ProviderRegistry::new();
    providers.register(
        "sepolia",
        Arc::new(JsonRpcProvider::new(&node.url, Duration::from_secs(5)).unwrap()),
    );
    let abis = AbiRegistry::new();
    abis.register(
        "erc20",
        Abi::from_json(
            r#"[{"type":"function","name":"totalSupply","inputs":[],
                 "outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}]"#,
        )
        .unwrap(),
    );

    let store = Arc::new(InMemoryInstanceStore::new());
    let workflow = Workflow {
        id: Uuid::new_v4(),
        name: "supply".to_string(),
        description: None,
        contracts: vec![ContractReference {
            name: "token".to_string(),
            address: TOKEN.to_string(),
            network: "sepolia".to_string(),
            abi: "erc20".to_string(),
            extra: Default::default(),
        }],
        triggers: vec![Trigger::contract("supply-changed", "token", "totalSupply")],
        steps: vec![],
        extra: Default::default(),
    };
    let instance = store
        .save_instance(&WorkflowInstance::new(workflow.id, HashMap::new()))
        .await
        .unwrap();

    let evaluator = TriggerEvaluator::new(
        Arc::new(providers),
        Arc::new(abis),
        Arc::new(SnapshotStore::new(store.clone())),
        Arc::new(SystemClock),
    );
    let trigger = &workflow.triggers[0];

    assert!(evaluator.evaluate(trigger, &instance, &workflow).await.unwrap());
    assert!(!evaluator.evaluate(trigger, &instance, &workflow).await.unwrap());
    assert!(evaluator.evaluate(trigger, &instance, &workflow).await.unwrap());

    let stored = store.find_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(
        stored.trigger_snapshots["supply-changed"].data,
        Some(json!("250"))
    );
}
