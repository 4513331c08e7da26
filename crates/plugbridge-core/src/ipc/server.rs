//! Plugin-side TCP listener.
//!
//! Binds the given address (port 0 lets the OS pick), accepts host
//! connections up to `IpcConfig::MAX_CONNECTIONS`, and serves each one with
//! its own dispatcher from a [`DispatchFactory`], so no backend state is
//! shared between hosts. Connection tasks are described on [`IpcConnection`].

use super::connection::{IpcConnection, IpcDispatch};
use crate::cancel::CancellationToken;
use crate::config::IpcConfig;
use crate::error::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// A running listener. Dropping it stops the listener and closes every
/// connection it accepted.
#[derive(Debug)]
pub struct IpcServerHandle {
    addr: SocketAddr,
    stop: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl IpcServerHandle {
    /// The bound address, with the real port when 0 was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting and close all open connections, which runs each
    /// dispatcher's close hook in the background.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    /// Like [`shutdown`](Self::shutdown), but returns only once every
    /// connection has closed and its close hook has returned.
    pub async fn shutdown_and_wait(mut self) {
        self.shutdown();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!("Plugin listener task failed: {}", e);
            }
        }
    }
}

impl Drop for IpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builds the dispatcher for one accepted connection.
pub trait DispatchFactory: Send + Sync + 'static {
    fn create(&self, peer_addr: SocketAddr) -> Arc<dyn IpcDispatch>;
}

impl<F> DispatchFactory for F
where
    F: Fn(SocketAddr) -> Arc<dyn IpcDispatch> + Send + Sync + 'static,
{
    fn create(&self, peer_addr: SocketAddr) -> Arc<dyn IpcDispatch> {
        self(peer_addr)
    }
}

pub struct IpcServer;

impl IpcServer {
    /// Bind `bind` and serve in background tasks until the handle is shut
    /// down or dropped.
    pub async fn start<F: DispatchFactory>(bind: SocketAddr, factory: F) -> Result<IpcServerHandle> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        info!("Plugin listener bound to {}", addr);

        let stop = CancellationToken::new();
        let accept_task = tokio::spawn(Self::accept_loop(listener, Arc::new(factory), stop.clone()));

        Ok(IpcServerHandle {
            addr,
            stop,
            accept_task: Some(accept_task),
        })
    }

    async fn accept_loop<F: DispatchFactory>(
        listener: TcpListener,
        factory: Arc<F>,
        stop: CancellationToken,
    ) {
        let slots = Arc::new(Semaphore::new(IpcConfig::MAX_CONNECTIONS));
        let mut connections = JoinSet::new();
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = stop.cancelled() => break,
                Some(done) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = done {
                        warn!("Connection task failed: {}", e);
                    }
                    continue;
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        continue;
                    }
                },
            };

            let Ok(slot) = slots.clone().try_acquire_owned() else {
                warn!(
                    "Refusing host {}: {} connections already open",
                    peer_addr,
                    IpcConfig::MAX_CONNECTIONS
                );
                continue;
            };
            let dispatch = factory.create(peer_addr);
            let stop = stop.clone();
            connections.spawn(async move {
                Self::serve_connection(stream, peer_addr, dispatch, stop).await;
                drop(slot);
            });
        }

        drop(listener);
        info!(
            "Plugin listener stopped, closing {} connections",
            connections.len()
        );
        while let Some(done) = connections.join_next().await {
            if let Err(e) = done {
                warn!("Connection task failed: {}", e);
            }
        }
    }

    async fn serve_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        dispatch: Arc<dyn IpcDispatch>,
        stop: CancellationToken,
    ) {
        debug!("Host connected from {}", peer_addr);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not set for {}: {}", peer_addr, e);
        }
        let conn = IpcConnection::spawn(stream, peer_addr.to_string(), dispatch);

        tokio::select! {
            _ = conn.closed() => debug!("Host {} disconnected", peer_addr),
            _ = stop.cancelled() => {
                debug!("Dropping host {} on shutdown", peer_addr);
                conn.close();
            }
        }
        conn.finished().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::ipc::connection::InboundCall;
    use crate::ipc::protocol::{read_frame, write_frame, IpcRequest, IpcResponse};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Echoes `echo`, fails `fail`, records when its connection closes.
    struct Recorder {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl IpcDispatch for Recorder {
        async fn dispatch(&self, method: &str, params: Value, _call: InboundCall) -> Result<Value> {
            match method {
                "echo" => Ok(params),
                "fail" => Err(BridgeError::application("recorder refused")),
                other => Err(BridgeError::MethodNotFound {
                    method: other.to_string(),
                }),
            }
        }

        async fn closed(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    async fn listen(closed: Arc<AtomicBool>) -> IpcServerHandle {
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        IpcServer::start(bind, move |_: SocketAddr| {
            Arc::new(Recorder {
                closed: closed.clone(),
            }) as Arc<dyn IpcDispatch>
        })
        .await
        .unwrap()
    }

    /// Send one raw frame and read the reply frame.
    async fn exchange(handle: &IpcServerHandle, frame: &[u8]) -> IpcResponse {
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();
        write_frame(&mut writer, frame).await.unwrap();
        let reply = read_frame(&mut reader).await.unwrap().unwrap();
        serde_json::from_slice(&reply).unwrap()
    }

    fn request(method: &str, params: Value, id: u64) -> Vec<u8> {
        serde_json::to_vec(&IpcRequest::new(method, params, id)).unwrap()
    }

    #[tokio::test]
    async fn test_binds_ephemeral_port() {
        let handle = listen(Arc::default()).await;
        assert_ne!(handle.port(), 0);
        assert!(handle.addr().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_echo_over_tcp() {
        let handle = listen(Arc::default()).await;
        let reply = exchange(&handle, &request("echo", json!({"path": "kv/foo"}), 1)).await;
        assert!(reply.error.is_none());
        assert_eq!(reply.result, Some(json!({"path": "kv/foo"})));
    }

    #[tokio::test]
    async fn test_application_error_carries_code_and_kind() {
        let handle = listen(Arc::default()).await;
        let reply = exchange(&handle, &request("fail", json!({}), 2)).await;

        let err = reply.error.unwrap();
        assert_eq!(err.code, -32010);
        assert_eq!(err.message, "recorder refused");
        assert_eq!(err.data.unwrap()["kind"], json!("application"));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_parse_error() {
        let handle = listen(Arc::default()).await;
        let reply = exchange(&handle, b"{not json").await;
        assert_eq!(reply.error.unwrap().code, -32700);
    }

    #[tokio::test]
    async fn test_wrong_version_is_invalid_request() {
        let handle = listen(Arc::default()).await;
        let frame = br#"{"jsonrpc":"1.0","method":"echo","params":{},"id":9}"#;
        let reply = exchange(&handle, frame).await;
        assert_eq!(reply.error.unwrap().code, -32600);
        assert_eq!(reply.id, Some(json!(9)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let closed = Arc::new(AtomicBool::new(false));
        let handle = listen(closed.clone()).await;

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();
        write_frame(&mut writer, &request("echo", json!(1), 1))
            .await
            .unwrap();
        read_frame(&mut reader).await.unwrap().unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown_and_wait())
            .await
            .expect("shutdown should finish");
        assert!(closed.load(Ordering::SeqCst), "close hook should have run");

        // The server side hung up.
        let after = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut reader))
            .await
            .expect("server should hang up");
        assert!(!matches!(after, Ok(Some(_))));
    }
}
