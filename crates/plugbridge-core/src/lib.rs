//! Plugbridge Core - run a logical backend out of process.
//!
//! A host talks to a [`Backend`] through one trait whether the backend lives
//! in the same process or in a separate plugin process. For the remote case
//! the host holds a [`BackendProxy`] that forwards every call over a single
//! JSON-RPC connection; the plugin runs a [`BackendServer`] that replays the
//! calls against the real backend. Errors come back as the same variant the
//! backend raised, and the backend's storage calls travel the other way over
//! the same connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use plugbridge_core::{mock, Backend, BackendPlugin, Context, Namespace, PluginBackend, PluginClient};
//!
//! #[tokio::main]
//! async fn main() -> plugbridge_core::Result<()> {
//!     let plugin = BackendPlugin::new(mock::factory());
//!     let client = PluginClient::in_process(&plugin);
//!     let backend = PluginBackend::remote(&client)?;
//!
//!     let ctx = Context::background().with_namespace(Namespace::new("ns1", "team/"));
//!     backend.setup(&ctx, config).await?;
//!     let paths = backend.special_paths().await?;
//!     println!("unauthenticated: {:?}", paths.unauthenticated);
//!
//!     client.shutdown(&ctx).await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod logical;
pub mod mock;
pub mod plugin;

pub use cancel::{CancellationToken, CancelledError};
pub use config::{IpcConfig, PluginConfig};
pub use context::{Context, ContextEnvelope, Namespace};
pub use error::{BridgeError, ErrorKind, Result};
pub use lifecycle::{Lifecycle, LifecyclePolicy, LifecycleState};
pub use logical::{
    Backend, BackendConfig, ExistenceCheck, Factory, InitializationRequest, InmemStorage,
    LogLevel, Logger, Operation, PathSpec, Request, Response, StaticSystemView, Storage,
    StorageEntry, SystemView,
};
pub use plugin::{
    BackendPlugin, BackendProxy, BackendServer, HostServices, LocalBackend, PluginBackend,
    PluginClient, RemoteStorage,
};
