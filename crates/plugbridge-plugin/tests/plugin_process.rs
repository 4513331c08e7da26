//! End-to-end tests against the real plugin binary.
//!
//! Each test launches `plugbridge-plugin`, reads its handshake line and
//! drives the backend through a dispensed proxy, so every call crosses a
//! process boundary.

use plugbridge_core::{
    Backend, BackendConfig, BridgeError, Context, ErrorKind, InmemStorage, LogLevel,
    LifecycleState, Logger, Namespace, Operation, PluginBackend, PluginClient, Request,
    StaticSystemView,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

fn plugin_command(extra: &[&str]) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_plugbridge-plugin"));
    command.args(extra);
    command
}

fn test_config(storage: Arc<InmemStorage>) -> BackendConfig {
    BackendConfig {
        logger: Logger::new("plugin-test", LogLevel::Debug),
        system: Arc::new(StaticSystemView::new(
            Duration::from_secs(300),
            Duration::from_secs(1800),
        )),
        storage,
        config: BTreeMap::new(),
    }
}

fn test_context() -> Context {
    Context::background().with_namespace(Namespace::new("testid", "testpath"))
}

#[tokio::test]
async fn test_launched_plugin_serves_backend() {
    let client = PluginClient::launch(plugin_command(&[])).await.unwrap();
    let backend = PluginBackend::remote(&client).unwrap();
    let ctx = test_context();
    let storage = Arc::new(InmemStorage::new());

    backend.setup(&ctx, test_config(storage.clone())).await.unwrap();
    assert_eq!(backend.state().await, LifecycleState::Configured);

    let resp = backend
        .handle_request(
            &ctx,
            Request::new(Operation::Create, "kv/foo").with_field("value", "bar"),
        )
        .await
        .unwrap();
    assert_eq!(resp.get_str("value"), Some("bar"));

    // The write went through the host's storage over the reverse channel.
    assert_eq!(storage.len().await, 1);

    let check = backend
        .handle_existence_check(&ctx, Request::new(Operation::Create, "kv/foo"))
        .await
        .unwrap();
    assert_eq!(check.exists(), Some(true));

    let paths = backend.special_paths().await.unwrap();
    assert_eq!(paths.unauthenticated, vec!["special".to_string()]);

    let PluginBackend::Remote(proxy) = &backend else {
        panic!("Expected a remote backend");
    };
    let system = proxy.remote_system().await.unwrap();
    assert_eq!(system.default_lease_ttl, Duration::from_secs(300));

    client.shutdown(&ctx).await;
    assert_eq!(backend.state().await, LifecycleState::Terminated);
}

#[tokio::test]
async fn test_launched_plugin_invalidates_key() {
    let client = PluginClient::launch(plugin_command(&[])).await.unwrap();
    let backend = PluginBackend::remote(&client).unwrap();
    let ctx = test_context();
    backend
        .setup(&ctx, test_config(Arc::new(InmemStorage::new())))
        .await
        .unwrap();

    let read = || Request::new(Operation::Read, "internal");
    let resp = backend.handle_request(&ctx, read()).await.unwrap();
    assert_eq!(resp.get_str("value"), Some("bar"));

    backend.invalidate_key(&ctx, "internal").await;
    let resp = backend.handle_request(&ctx, read()).await.unwrap();
    assert_eq!(resp.get_str("value"), Some(""));

    client.shutdown(&ctx).await;
}

#[tokio::test]
async fn test_strict_plugin_rejects_requests_before_initialize() {
    let client = PluginClient::launch(plugin_command(&["--strict"]))
        .await
        .unwrap();
    let backend = PluginBackend::remote(&client).unwrap();
    let ctx = test_context();
    backend
        .setup(&ctx, test_config(Arc::new(InmemStorage::new())))
        .await
        .unwrap();

    // The host proxy is lenient, so the rejection comes from the plugin.
    let err = backend
        .handle_request(&ctx, Request::new(Operation::Read, "internal"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lifecycle);

    backend
        .initialize(&ctx, Default::default())
        .await
        .unwrap();
    let resp = backend
        .handle_request(&ctx, Request::new(Operation::Read, "initialized"))
        .await
        .unwrap();
    assert_eq!(resp.get("initialized").and_then(|v| v.as_bool()), Some(true));

    client.shutdown(&ctx).await;
}

#[tokio::test]
async fn test_application_errors_cross_the_process_boundary() {
    let client = PluginClient::launch(plugin_command(&[])).await.unwrap();
    let backend = PluginBackend::remote(&client).unwrap();
    let ctx = test_context();
    backend
        .setup(&ctx, test_config(Arc::new(InmemStorage::new())))
        .await
        .unwrap();

    let err = backend
        .handle_request(&ctx, Request::new(Operation::Read, "errors/application"))
        .await
        .unwrap_err();
    match err {
        BridgeError::Application { message } => assert_eq!(message, "mock application error"),
        other => panic!("Expected Application, got: {:?}", other),
    }

    let err = backend
        .handle_request(&ctx, Request::new(Operation::Read, "errors/panic"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Panicked { .. }));

    // The plugin survives a panicking handler.
    let resp = backend
        .handle_request(&ctx, Request::new(Operation::Read, "internal"))
        .await
        .unwrap();
    assert_eq!(resp.get_str("value"), Some("bar"));

    client.shutdown(&ctx).await;
}
