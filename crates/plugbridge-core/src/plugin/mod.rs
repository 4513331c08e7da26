//! The backend plugin bridge.
//!
//! A host can run a backend in two ways:
//!
//! - **Local**: the backend lives in the host process, wrapped in a
//!   [`LocalBackend`] for lifecycle enforcement.
//! - **Remote**: the backend lives in a plugin process and the host holds a
//!   [`BackendProxy`] that forwards every call over one IPC connection.
//!
//! [`PluginBackend`] holds either and implements [`Backend`], so code built
//! against it runs unchanged in both modes.

mod client;
mod dispense;
mod local;
mod server;
mod storage;
pub mod wire;

pub use client::BackendProxy;
pub use dispense::{BackendPlugin, PluginClient};
pub use local::LocalBackend;
pub use server::BackendServer;
pub use storage::{HostServices, RemoteStorage};

use crate::context::Context;
use crate::error::Result;
use crate::lifecycle::LifecycleState;
use crate::logical::{
    Backend, BackendConfig, ExistenceCheck, InitializationRequest, Logger, PathSpec, Request,
    Response, SystemView,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A backend that is either in-process or behind a plugin connection.
#[derive(Debug)]
pub enum PluginBackend {
    Local(LocalBackend),
    Remote(Arc<BackendProxy>),
}

impl PluginBackend {
    /// Dispense the remote backend from an open plugin client.
    pub fn remote(client: &PluginClient) -> Result<Self> {
        let proxy = client.dispense(crate::config::PluginConfig::BACKEND_PLUGIN_NAME)?;
        Ok(PluginBackend::Remote(proxy))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, PluginBackend::Remote(_))
    }

    pub async fn state(&self) -> LifecycleState {
        match self {
            PluginBackend::Local(backend) => backend.state().await,
            PluginBackend::Remote(proxy) => proxy.state().await,
        }
    }

    /// Invalidate `key`, reporting failures instead of logging them.
    pub async fn try_invalidate_key(&self, ctx: &Context, key: &str) -> Result<()> {
        match self {
            PluginBackend::Local(backend) => backend.try_invalidate_key(ctx, key).await,
            PluginBackend::Remote(proxy) => proxy.try_invalidate_key(ctx, key).await,
        }
    }

    fn inner(&self) -> &dyn Backend {
        match self {
            PluginBackend::Local(backend) => backend,
            PluginBackend::Remote(proxy) => proxy.as_ref(),
        }
    }
}

impl From<LocalBackend> for PluginBackend {
    fn from(backend: LocalBackend) -> Self {
        PluginBackend::Local(backend)
    }
}

impl From<Arc<BackendProxy>> for PluginBackend {
    fn from(proxy: Arc<BackendProxy>) -> Self {
        PluginBackend::Remote(proxy)
    }
}

#[async_trait]
impl Backend for PluginBackend {
    async fn setup(&self, ctx: &Context, config: BackendConfig) -> Result<()> {
        self.inner().setup(ctx, config).await
    }

    async fn initialize(&self, ctx: &Context, req: InitializationRequest) -> Result<()> {
        self.inner().initialize(ctx, req).await
    }

    async fn handle_request(&self, ctx: &Context, req: Request) -> Result<Response> {
        self.inner().handle_request(ctx, req).await
    }

    async fn handle_existence_check(&self, ctx: &Context, req: Request) -> Result<ExistenceCheck> {
        self.inner().handle_existence_check(ctx, req).await
    }

    async fn special_paths(&self) -> Result<PathSpec> {
        self.inner().special_paths().await
    }

    fn system(&self) -> Option<Arc<dyn SystemView>> {
        self.inner().system()
    }

    fn logger(&self) -> Option<Logger> {
        self.inner().logger()
    }

    async fn cleanup(&self, ctx: &Context) {
        self.inner().cleanup(ctx).await
    }

    async fn invalidate_key(&self, ctx: &Context, key: &str) {
        self.inner().invalidate_key(ctx, key).await
    }
}
