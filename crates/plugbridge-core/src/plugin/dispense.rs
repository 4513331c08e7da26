//! Plugin launch, connection and dispense.
//!
//! The plugin side wraps a backend factory in a [`BackendPlugin`] and serves
//! it over TCP, announcing its address with a handshake line on stdout. The
//! host side opens a [`PluginClient`] by launching that process, by
//! connecting to a known address, or in-process over a duplex pipe, and then
//! dispenses the backend proxy by name.

use super::client::BackendProxy;
use super::local::LocalBackend;
use super::server::BackendServer;
use super::storage::HostServices;
use crate::config::{IpcConfig, PluginConfig};
use crate::context::Context;
use crate::error::{BridgeError, Result};
use crate::ipc::{IpcClient, IpcConnection, IpcDispatch, IpcPeer, IpcServer, IpcServerHandle};
use crate::lifecycle::LifecyclePolicy;
use crate::logical::{Backend, Factory};
use std::io::Write;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// A backend factory packaged to be served as a plugin.
#[derive(Clone)]
pub struct BackendPlugin {
    factory: Factory,
    policy: LifecyclePolicy,
}

impl std::fmt::Debug for BackendPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPlugin")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl BackendPlugin {
    pub fn new(factory: Factory) -> Self {
        Self {
            factory,
            policy: LifecyclePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    /// An in-process instance of the backend, with the same lifecycle rules
    /// as a served one.
    pub fn local(&self) -> LocalBackend {
        LocalBackend::new(self.factory.clone(), self.policy)
    }

    /// A dispatcher serving one connection.
    pub fn server(&self) -> BackendServer {
        BackendServer::new(self.factory.clone(), self.policy)
    }

    /// Start serving on `bind`, one fresh backend per host connection.
    pub async fn listen(&self, bind: SocketAddr) -> Result<IpcServerHandle> {
        let plugin = self.clone();
        IpcServer::start(bind, move |peer_addr: SocketAddr| {
            debug!("Serving backend to {}", peer_addr);
            Arc::new(plugin.server()) as Arc<dyn IpcDispatch>
        })
        .await
    }

    /// Start serving on `bind` and print the handshake line on stdout.
    pub async fn serve(&self, bind: SocketAddr) -> Result<IpcServerHandle> {
        let handle = self.listen(bind).await?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", PluginConfig::handshake_line(handle.addr()))?;
        stdout.flush()?;
        info!("Plugin serving on {}", handle.addr());
        Ok(handle)
    }
}

/// Host-side handle on one plugin connection.
///
/// Dropping the client closes the connection and kills a launched process.
pub struct PluginClient {
    connection: IpcConnection,
    host: Arc<HostServices>,
    policy: LifecyclePolicy,
    backend: Mutex<Option<Arc<BackendProxy>>>,
    child: Option<Child>,
    // Plugin side of an in-process pair.
    local_server: Option<IpcConnection>,
}

impl std::fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginClient")
            .field("connection", &self.connection)
            .field("policy", &self.policy)
            .field("launched", &self.child.is_some())
            .field("in_process", &self.local_server.is_some())
            .finish_non_exhaustive()
    }
}

impl PluginClient {
    fn from_connection(connection: IpcConnection, host: Arc<HostServices>) -> Self {
        Self {
            connection,
            host,
            policy: LifecyclePolicy::default(),
            backend: Mutex::new(None),
            child: None,
            local_server: None,
        }
    }

    /// Connect to a plugin already serving at `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let host = Arc::new(HostServices::new());
        let connection = IpcClient::connect(addr, host.clone()).await?;
        Ok(Self::from_connection(connection, host))
    }

    /// Spawn a plugin process and connect to the address it announces.
    ///
    /// The process must print `PLUGIN_ADDR=<addr>` on stdout within
    /// `PluginConfig::HANDSHAKE_TIMEOUT`. It is killed if the handshake
    /// fails or when the client is dropped.
    pub async fn launch(mut command: Command) -> Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|e| BridgeError::Handshake {
            message: format!("failed to spawn plugin: {}", e),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| BridgeError::Handshake {
            message: "plugin stdout not captured".to_string(),
        })?;

        let mut lines = BufReader::new(stdout).lines();
        let addr = tokio::time::timeout(PluginConfig::HANDSHAKE_TIMEOUT, read_handshake(&mut lines))
            .await
            .map_err(|_| BridgeError::Handshake {
                message: format!(
                    "no handshake within {}s",
                    PluginConfig::HANDSHAKE_TIMEOUT.as_secs()
                ),
            })??;

        // Keep draining stdout so the plugin never blocks on a full pipe.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("plugin: {}", line);
            }
        });

        info!("Plugin process announced {}", addr);
        let mut client = Self::connect(addr).await?;
        client.child = Some(child);
        Ok(client)
    }

    /// Serve `plugin` inside this process over an in-memory pipe.
    ///
    /// Same protocol and the same code paths as a launched plugin, without
    /// the process. Must be called from within a tokio runtime.
    pub fn in_process(plugin: &BackendPlugin) -> Self {
        let (host_io, plugin_io) = tokio::io::duplex(IpcConfig::DUPLEX_BUFFER_SIZE);
        let local_server =
            IpcConnection::spawn(plugin_io, "in-process host", Arc::new(plugin.server()));
        let host = Arc::new(HostServices::new());
        let connection = IpcConnection::spawn(host_io, "in-process plugin", host.clone());
        let mut client = Self::from_connection(connection, host);
        client.policy = plugin.policy();
        client.local_server = Some(local_server);
        client
    }

    /// Lifecycle policy for the dispensed proxy.
    pub fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Dispense the backend by name. The same proxy is returned every time.
    pub fn dispense(&self, name: &str) -> Result<Arc<BackendProxy>> {
        if name != PluginConfig::BACKEND_PLUGIN_NAME {
            return Err(BridgeError::UnknownPlugin {
                name: name.to_string(),
            });
        }
        let mut slot = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        let proxy = slot.get_or_insert_with(|| {
            Arc::new(BackendProxy::new(
                self.connection.peer(),
                self.host.clone(),
                self.policy,
            ))
        });
        Ok(proxy.clone())
    }

    pub fn peer(&self) -> IpcPeer {
        self.connection.peer()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Clean up the dispensed backend and release everything.
    ///
    /// The connection is closed and a launched process is killed even when
    /// the remote cleanup fails.
    pub async fn shutdown(mut self, ctx: &Context) {
        let backend = self
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(backend) = backend {
            backend.cleanup(ctx).await;
        }
        self.close();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill plugin process: {}", e);
            }
        }
    }

    /// Close the connection. Pending and future calls fail with
    /// `ConnectionLost`.
    pub fn close(&self) {
        self.connection.close();
    }
}

async fn read_handshake(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<SocketAddr> {
    while let Some(line) = lines.next_line().await? {
        match PluginConfig::parse_handshake(&line) {
            Some(Ok(addr)) => return Ok(addr),
            Some(Err(message)) => return Err(BridgeError::Handshake { message }),
            None => debug!("plugin: {}", line),
        }
    }
    Err(BridgeError::Handshake {
        message: "plugin exited before announcing its address".to_string(),
    })
}
