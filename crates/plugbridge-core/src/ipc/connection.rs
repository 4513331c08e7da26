//! Multiplexed JSON-RPC connection.
//!
//! An [`IpcConnection`] owns one byte stream and runs two tasks over it: a
//! writer draining an outbound queue and a reader routing every inbound frame.
//! Either end may issue calls at any time; responses are matched to their
//! callers by id, so many calls share the stream concurrently.
//!
//! Each inbound request runs in its own task with its own
//! [`CancellationToken`]. A caller that gives up on a call sends a
//! `$/cancel {"id": n}` notification, which fires that token on the far side.
//! Closing the connection fails every pending call with `ConnectionLost` and
//! cancels every in-flight inbound call.

use super::protocol::{check_frame_size, read_frame, write_frame, IpcMessage, IpcRequest, IpcResponse};
use crate::cancel::CancellationToken;
use crate::config::IpcConfig;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Per-call options for an outbound call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Fires to abandon the call; the peer is asked to cancel it too.
    pub cancel: Option<CancellationToken>,
    /// Point after which the call fails with `DeadlineExceeded`.
    pub deadline: Option<Instant>,
}

/// An inbound request as seen by a dispatcher.
#[derive(Debug)]
pub struct InboundCall {
    peer: IpcPeer,
    cancel: CancellationToken,
    frame_len: usize,
}

impl InboundCall {
    /// The connection the request arrived on, for calls back to the caller.
    pub fn peer(&self) -> &IpcPeer {
        &self.peer
    }

    /// Fired when the caller cancels the call or the connection closes.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Size of the request frame payload in bytes.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

/// Handles the requests one side of a connection serves.
#[async_trait]
pub trait IpcDispatch: Send + Sync + 'static {
    /// Dispatch a JSON-RPC method call and return the result.
    async fn dispatch(&self, method: &str, params: Value, call: InboundCall) -> Result<Value>;

    /// Called once after the connection has closed.
    async fn closed(&self) {}
}

/// Dispatcher for a side that serves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDispatch;

#[async_trait]
impl IpcDispatch for NoDispatch {
    async fn dispatch(&self, method: &str, _params: Value, _call: InboundCall) -> Result<Value> {
        Err(BridgeError::MethodNotFound {
            method: method.to_string(),
        })
    }
}

type Reply = oneshot::Sender<Result<Value>>;

struct Shared {
    label: String,
    outbound: mpsc::Sender<Vec<u8>>,
    /// Outbound calls waiting for a response, by id.
    pending: Mutex<HashMap<u64, Reply>>,
    /// Inbound calls being served, by the JSON text of their id.
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    /// Fired once the dispatcher's close hook has returned.
    finished: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn lost(&self) -> BridgeError {
        BridgeError::ConnectionLost {
            peer: self.label.clone(),
        }
    }

    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        check_frame_size(payload.len())?;
        if self.shutdown.is_cancelled() {
            return Err(self.lost());
        }
        self.outbound.send(payload).await.map_err(|_| self.lost())
    }

    fn teardown(&self) {
        self.shutdown.cancel();
        // Dropping the reply senders wakes every waiter with ConnectionLost.
        let abandoned: Vec<_> = lock(&self.pending).drain().collect();
        if !abandoned.is_empty() {
            debug!(
                "IPC connection {} closed with {} pending calls",
                self.label,
                abandoned.len()
            );
        }
        drop(abandoned);
        for (_, token) in lock(&self.in_flight).drain() {
            token.cancel();
        }
    }
}

/// Cloneable handle for issuing calls over a connection.
#[derive(Clone)]
pub struct IpcPeer {
    shared: Arc<Shared>,
}

impl fmt::Debug for IpcPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcPeer")
            .field("label", &self.shared.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl IpcPeer {
    /// Description of the remote end, used in errors and logs.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Wait until the connection has closed.
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await
    }

    /// Call a method on the peer and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with(method, params, &CallOptions::default()).await
    }

    /// Call a method with cancellation and a deadline.
    ///
    /// A call abandoned for any reason, including the returned future being
    /// dropped, sends a best-effort `$/cancel` to the peer.
    pub async fn call_with(&self, method: &str, params: Value, options: &CallOptions) -> Result<Value> {
        if let Some(cancel) = &options.cancel {
            cancel.check()?;
        }
        if options.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(BridgeError::DeadlineExceeded);
        }
        if self.is_closed() {
            return Err(self.shared.lost());
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_vec(&IpcRequest::new(method, params, id)).map_err(|e| {
            BridgeError::Encode {
                message: format!("Failed to encode {} request: {}", method, e),
            }
        })?;

        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, tx);
        let mut guard = PendingGuard {
            peer: self,
            id,
            sent: false,
            armed: true,
        };

        debug!("IPC call {} -> {} (id {})", method, self.shared.label, id);
        self.shared.send(payload).await?;
        guard.sent = true;

        let cancelled = async {
            match &options.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let deadline = async {
            match options.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            reply = rx => {
                guard.armed = false;
                reply.unwrap_or_else(|_| Err(self.shared.lost()))
            }
            _ = cancelled => Err(BridgeError::Cancelled),
            _ = deadline => Err(BridgeError::DeadlineExceeded),
            _ = self.shared.shutdown.cancelled() => Err(self.shared.lost()),
        }
    }

    fn complete(&self, response: IpcResponse) {
        let Some(id) = response.id.as_ref().and_then(Value::as_u64) else {
            warn!(
                "IPC connection {} reported an error for an unidentified frame: {}",
                self.shared.label,
                response
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("no error object")
            );
            return;
        };
        let waiter = lock(&self.shared.pending).remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response.into_result());
            }
            None => debug!("Dropping response for abandoned call {}", id),
        }
    }

    fn accept(&self, request: IpcRequest, frame_len: usize, dispatch: &Arc<dyn IpcDispatch>) {
        let IpcRequest {
            jsonrpc,
            method,
            params,
            id,
        } = request;

        if jsonrpc != IpcConfig::JSONRPC_VERSION {
            if let Some(id) = id {
                let peer = self.clone();
                tokio::spawn(async move {
                    let response = IpcResponse::error(
                        Some(id),
                        -32600,
                        "Invalid Request: expected jsonrpc 2.0".to_string(),
                    );
                    peer.respond(response).await;
                });
            }
            return;
        }

        let params = params.unwrap_or_else(|| json!({}));
        let Some(id) = id else {
            if method == IpcConfig::CANCEL_METHOD {
                self.cancel_inbound(&params);
            } else {
                self.spawn_notification(method, params, frame_len, dispatch);
            }
            return;
        };

        let key = id.to_string();
        let cancel = CancellationToken::new();
        lock(&self.shared.in_flight).insert(key.clone(), cancel.clone());

        let peer = self.clone();
        let dispatch = dispatch.clone();
        tokio::spawn(async move {
            let call = InboundCall {
                peer: peer.clone(),
                cancel,
                frame_len,
            };
            let result = guarded_dispatch(dispatch.as_ref(), &method, params, call).await;
            lock(&peer.shared.in_flight).remove(&key);

            let response = match result {
                Ok(value) => IpcResponse::success(Some(id), value),
                Err(e) => {
                    debug!("IPC call {} failed: {}", method, e);
                    IpcResponse::failure(Some(id), e.to_ipc_error())
                }
            };
            peer.respond(response).await;
        });
    }

    fn spawn_notification(
        &self,
        method: String,
        params: Value,
        frame_len: usize,
        dispatch: &Arc<dyn IpcDispatch>,
    ) {
        let call = InboundCall {
            peer: self.clone(),
            cancel: CancellationToken::new(),
            frame_len,
        };
        let dispatch = dispatch.clone();
        tokio::spawn(async move {
            if let Err(e) = guarded_dispatch(dispatch.as_ref(), &method, params, call).await {
                debug!("IPC notification {} failed: {}", method, e);
            }
        });
    }

    fn cancel_inbound(&self, params: &Value) {
        let Some(id) = params.get("id") else {
            debug!("Ignoring {} without an id", IpcConfig::CANCEL_METHOD);
            return;
        };
        let token = lock(&self.shared.in_flight).get(&id.to_string()).cloned();
        match token {
            Some(token) => {
                debug!("Peer cancelled call {}", id);
                token.cancel();
            }
            None => debug!("Cancel for call {} arrived after it finished", id),
        }
    }

    async fn respond(&self, response: IpcResponse) {
        let id = response.id.clone();
        match self.send_response(&response).await {
            Ok(()) => {}
            Err(e @ BridgeError::Encode { .. }) => {
                warn!("IPC response for {:?} not sent: {}", id, e);
                let fallback = IpcResponse::failure(id, e.to_ipc_error());
                if let Err(e) = self.send_response(&fallback).await {
                    debug!("IPC error response not sent: {}", e);
                }
            }
            Err(e) => debug!("IPC response for {:?} not sent: {}", id, e),
        }
    }

    async fn send_response(&self, response: &IpcResponse) -> Result<()> {
        let payload = serde_json::to_vec(response).map_err(|e| BridgeError::Encode {
            message: e.to_string(),
        })?;
        self.shared.send(payload).await
    }
}

/// Removes an abandoned call from the pending table and tells the peer.
struct PendingGuard<'a> {
    peer: &'a IpcPeer,
    id: u64,
    sent: bool,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let shared = &self.peer.shared;
        let waiting = lock(&shared.pending).remove(&self.id).is_some();
        if !waiting || !self.sent || shared.shutdown.is_cancelled() {
            return;
        }
        let note = IpcRequest::notification(IpcConfig::CANCEL_METHOD, json!({ "id": self.id }));
        match serde_json::to_vec(&note) {
            Ok(payload) => {
                if shared.outbound.try_send(payload).is_err() {
                    debug!("Could not send cancel for call {}", self.id);
                }
            }
            Err(e) => debug!("Could not encode cancel for call {}: {}", self.id, e),
        }
    }
}

/// A live connection. Dropping it closes the connection.
pub struct IpcConnection {
    peer: IpcPeer,
}

impl fmt::Debug for IpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcConnection")
            .field("peer", &self.peer)
            .finish()
    }
}

impl IpcConnection {
    /// Start serving `stream`, answering inbound requests with `dispatch`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(stream: S, label: impl Into<String>, dispatch: Arc<dyn IpcDispatch>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let label = label.into();
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::channel(IpcConfig::OUTBOUND_QUEUE_DEPTH);

        let peer = IpcPeer {
            shared: Arc::new(Shared {
                label: label.clone(),
                outbound,
                pending: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                finished: CancellationToken::new(),
            }),
        };

        tokio::spawn(write_loop(
            writer,
            outbound_rx,
            peer.shared.shutdown.clone(),
            label.clone(),
        ));
        tokio::spawn(read_loop(reader, peer.clone(), dispatch));

        debug!("IPC connection {} established", label);
        Self { peer }
    }

    pub fn peer(&self) -> IpcPeer {
        self.peer.clone()
    }

    pub fn label(&self) -> &str {
        self.peer.label()
    }

    pub fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }

    /// Close the connection. Pending calls fail with `ConnectionLost`.
    pub fn close(&self) {
        if !self.peer.is_closed() {
            debug!("Closing IPC connection {}", self.peer.label());
            self.peer.shared.shutdown.cancel();
        }
    }

    /// Wait until the connection has closed.
    pub async fn closed(&self) {
        self.peer.closed().await
    }

    /// Wait until the connection has closed and the dispatcher's close hook
    /// has run.
    pub async fn finished(&self) {
        self.peer.shared.finished.cancelled().await
    }
}

impl Drop for IpcConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run a dispatcher, turning a panic into `Panicked` so the caller still
/// gets a reply.
async fn guarded_dispatch(
    dispatch: &dyn IpcDispatch,
    method: &str,
    params: Value,
    call: InboundCall,
) -> Result<Value> {
    match AssertUnwindSafe(dispatch.dispatch(method, params, call))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let err = BridgeError::panicked(method, payload.as_ref());
            error!("Dispatcher panicked: {}", err);
            Err(err)
        }
    }
}

async fn write_loop<S: AsyncWrite>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    shutdown: CancellationToken,
    label: String,
) {
    loop {
        // Queued frames go out before a shutdown is honored.
        let payload = tokio::select! {
            biased;
            payload = outbound.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };
        if let Err(e) = write_frame(&mut writer, &payload).await {
            debug!("IPC connection {} write failed: {}", label, e);
            break;
        }
    }
    shutdown.cancel();
    let _ = writer.shutdown().await;
}

async fn read_loop<S: AsyncRead>(
    mut reader: ReadHalf<S>,
    peer: IpcPeer,
    dispatch: Arc<dyn IpcDispatch>,
) {
    let shared = peer.shared.clone();
    loop {
        let frame = tokio::select! {
            result = read_frame(&mut reader) => match result {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("IPC connection {} closed by peer", shared.label);
                    break;
                }
                Err(e) => {
                    warn!("IPC connection {} read failed: {}", shared.label, e);
                    break;
                }
            },
            _ = shared.shutdown.cancelled() => break,
        };

        let frame_len = frame.len();
        match IpcMessage::parse(&frame) {
            Ok(IpcMessage::Response(response)) => peer.complete(response),
            Ok(IpcMessage::Request(request)) => peer.accept(request, frame_len, &dispatch),
            Err(e) => {
                warn!("IPC connection {} sent a bad frame: {}", shared.label, e);
                let peer = peer.clone();
                tokio::spawn(async move {
                    peer.respond(IpcResponse::failure(None, e.to_ipc_error())).await;
                });
            }
        }
    }

    shared.teardown();
    dispatch.closed().await;
    shared.finished.cancel();
}
