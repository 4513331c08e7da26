//! Host-side TCP connector.
//!
//! Opens a TCP connection to a plugin listener and wraps it in an
//! [`IpcConnection`]. The plugin calls back over the same connection (for
//! storage), so the host passes the dispatcher that answers those calls.

use super::connection::{IpcConnection, IpcDispatch};
use crate::config::IpcConfig;
use crate::error::{BridgeError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::debug;

pub struct IpcClient;

impl IpcClient {
    /// Connect within `IpcConfig::CONNECT_TIMEOUT`. A refused or timed-out
    /// connect is `ConnectionLost`.
    pub async fn connect(addr: SocketAddr, dispatch: Arc<dyn IpcDispatch>) -> Result<IpcConnection> {
        let lost = || BridgeError::ConnectionLost {
            peer: addr.to_string(),
        };
        let stream = tokio::time::timeout(IpcConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| lost())?
            .map_err(|e| {
                debug!("IPC connect to {} failed: {}", addr, e);
                lost()
            })?;
        stream.set_nodelay(true)?;

        debug!("IPC client connected to {}", addr);
        Ok(IpcConnection::spawn(stream, addr.to_string(), dispatch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::connection::{InboundCall, NoDispatch};
    use crate::ipc::server::{IpcServer, IpcServerHandle};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Plugin side: answers `ping`, and `relay` by calling the host back.
    struct PluginSide;

    #[async_trait]
    impl IpcDispatch for PluginSide {
        async fn dispatch(&self, method: &str, params: Value, call: InboundCall) -> Result<Value> {
            match method {
                "ping" => Ok(json!("pong")),
                "relay" => call.peer().call("host.lookup", params).await,
                _ => Err(BridgeError::MethodNotFound {
                    method: method.to_string(),
                }),
            }
        }
    }

    /// Host side: serves `host.lookup`.
    struct HostSide;

    #[async_trait]
    impl IpcDispatch for HostSide {
        async fn dispatch(&self, method: &str, params: Value, _call: InboundCall) -> Result<Value> {
            match method {
                "host.lookup" => Ok(json!({"found": params["key"]})),
                _ => Err(BridgeError::MethodNotFound {
                    method: method.to_string(),
                }),
            }
        }
    }

    async fn start_plugin() -> IpcServerHandle {
        IpcServer::start("127.0.0.1:0".parse().unwrap(), |_: SocketAddr| {
            Arc::new(PluginSide) as Arc<dyn IpcDispatch>
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_and_call() {
        let handle = start_plugin().await;
        let conn = IpcClient::connect(handle.addr(), Arc::new(NoDispatch)).await.unwrap();

        let reply = conn.peer().call("ping", json!({})).await.unwrap();
        assert_eq!(reply, json!("pong"));
    }

    #[tokio::test]
    async fn test_plugin_calls_back_into_host() {
        let handle = start_plugin().await;
        let conn = IpcClient::connect(handle.addr(), Arc::new(HostSide)).await.unwrap();

        let reply = conn.peer().call("relay", json!({"key": "kv/foo"})).await.unwrap();
        assert_eq!(reply, json!({"found": "kv/foo"}));
    }

    #[tokio::test]
    async fn test_callback_without_host_dispatch_fails() {
        let handle = start_plugin().await;
        let conn = IpcClient::connect(handle.addr(), Arc::new(NoDispatch)).await.unwrap();

        let err = conn.peer().call("relay", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::MethodNotFound { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_lost() {
        // Nothing listens on port 1
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        match IpcClient::connect(addr, Arc::new(NoDispatch)).await.unwrap_err() {
            BridgeError::ConnectionLost { peer } => assert_eq!(peer, "127.0.0.1:1"),
            other => panic!("Expected ConnectionLost, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_shutdown_is_noticed() {
        let handle = start_plugin().await;
        let conn = IpcClient::connect(handle.addr(), Arc::new(NoDispatch)).await.unwrap();
        conn.peer().call("ping", json!({})).await.unwrap();

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(2), conn.closed())
            .await
            .expect("client should see the hangup");

        let err = conn.peer().call("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionLost { .. }));
        assert!(err.is_retryable());
    }
}
