//! Host-side proxy for a backend living in a plugin process.
//!
//! [`BackendProxy`] implements [`Backend`], so a host holding an
//! `Arc<dyn Backend>` cannot tell it from a local backend. Each call runs the
//! same lifecycle check the plugin side does, encodes the context next to the
//! arguments, and rebuilds any error into the variant the plugin raised. The
//! proxy never retries.

use super::storage::HostServices;
use super::wire::{
    self, method, BackendConfigWire, CleanupArgs, InitializeArgs, InvalidateKeyArgs,
    RequestArgs, SetupArgs,
};
use crate::context::{Context, ContextEnvelope};
use crate::error::Result;
use crate::ipc::IpcPeer;
use crate::lifecycle::{Lifecycle, LifecyclePolicy, LifecycleState};
use crate::logical::{
    Backend, BackendConfig, ExistenceCheck, InitializationRequest, Logger, PathSpec, Request,
    Response, StaticSystemView, SystemView,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Handles configured at setup, kept on the host side.
#[derive(Debug, Default)]
struct Configured {
    system: Option<Arc<dyn SystemView>>,
    logger: Option<Logger>,
}

/// A backend reached over a plugin connection.
#[derive(Debug)]
pub struct BackendProxy {
    peer: IpcPeer,
    host: Arc<HostServices>,
    lifecycle: Lifecycle,
    configured: RwLock<Configured>,
}

impl BackendProxy {
    pub(crate) fn new(peer: IpcPeer, host: Arc<HostServices>, policy: LifecyclePolicy) -> Self {
        Self {
            peer,
            host,
            lifecycle: Lifecycle::new(policy),
            configured: RwLock::new(Configured::default()),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.state().await
    }

    pub fn peer(&self) -> &IpcPeer {
        &self.peer
    }

    /// Ask the plugin for the system view its backend was configured with.
    pub async fn remote_system(&self) -> Result<StaticSystemView> {
        self.call(method::SYSTEM, &json!({}), &Context::background())
            .await
    }

    /// Ask the plugin for the logger its backend was configured with.
    pub async fn remote_logger(&self) -> Result<Logger> {
        self.call(method::LOGGER, &json!({}), &Context::background())
            .await
    }

    /// Invalidate `key`, reporting failures instead of logging them.
    pub async fn try_invalidate_key(&self, ctx: &Context, key: &str) -> Result<()> {
        let _serving = self.lifecycle.serving("invalidate_key").await?;
        let args = InvalidateKeyArgs {
            context: ContextEnvelope::encode(ctx)?,
            key: key.to_string(),
        };
        self.call::<_, serde_json::Value>(method::INVALIDATE_KEY, &args, ctx)
            .await?;
        Ok(())
    }

    async fn call<A: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        args: &A,
        ctx: &Context,
    ) -> Result<R> {
        let params = wire::encode(args)?;
        let reply = self
            .peer
            .call_with(method, params, &ctx.call_options())
            .await?;
        wire::decode_reply(method, reply)
    }

    fn configured(&self) -> std::sync::RwLockReadGuard<'_, Configured> {
        self.configured.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_configured(&self, configured: Configured) {
        *self.configured.write().unwrap_or_else(PoisonError::into_inner) = configured;
    }
}

#[async_trait]
impl Backend for BackendProxy {
    async fn setup(&self, ctx: &Context, config: BackendConfig) -> Result<()> {
        self.lifecycle
            .setup(|| async {
                let args = SetupArgs {
                    context: ContextEnvelope::encode(ctx)?,
                    config: BackendConfigWire {
                        logger: config.logger.clone(),
                        system: StaticSystemView::capture(config.system.as_ref()),
                        config: config.config.clone(),
                    },
                };
                // Storage must answer while the plugin is still setting up.
                self.host.install(config.storage.clone());
                let outcome = self
                    .call::<_, serde_json::Value>(method::SETUP, &args, ctx)
                    .await;
                if let Err(e) = outcome {
                    self.host.clear();
                    return Err(e);
                }
                self.set_configured(Configured {
                    system: Some(config.system),
                    logger: Some(config.logger),
                });
                Ok(())
            })
            .await?;
        debug!("Remote backend at {} configured", self.peer.label());
        Ok(())
    }

    async fn initialize(&self, ctx: &Context, req: InitializationRequest) -> Result<()> {
        self.lifecycle
            .initialize(|| async {
                let args = InitializeArgs {
                    context: ContextEnvelope::encode(ctx)?,
                    request: req,
                };
                self.call::<_, serde_json::Value>(method::INITIALIZE, &args, ctx)
                    .await?;
                Ok(())
            })
            .await
    }

    async fn handle_request(&self, ctx: &Context, req: Request) -> Result<Response> {
        let _serving = self.lifecycle.serving("handle_request").await?;
        let args = RequestArgs {
            context: ContextEnvelope::encode(ctx)?,
            request: req,
        };
        self.call(method::HANDLE_REQUEST, &args, ctx).await
    }

    async fn handle_existence_check(&self, ctx: &Context, req: Request) -> Result<ExistenceCheck> {
        let _serving = self.lifecycle.serving("handle_existence_check").await?;
        let args = RequestArgs {
            context: ContextEnvelope::encode(ctx)?,
            request: req,
        };
        let check: ExistenceCheck = self
            .call(method::HANDLE_EXISTENCE_CHECK, &args, ctx)
            .await?;
        let (check_found, exists) = check.into_parts();
        Ok(ExistenceCheck::from_parts(check_found, exists))
    }

    async fn special_paths(&self) -> Result<PathSpec> {
        self.call(method::SPECIAL_PATHS, &json!({}), &Context::background())
            .await
    }

    fn system(&self) -> Option<Arc<dyn SystemView>> {
        self.configured().system.clone()
    }

    fn logger(&self) -> Option<Logger> {
        self.configured().logger.clone()
    }

    async fn cleanup(&self, ctx: &Context) {
        let released = self
            .lifecycle
            .cleanup(|previous| async move {
                let args = CleanupArgs {
                    context: ContextEnvelope {
                        namespace: ctx.namespace().cloned(),
                        timeout_ms: ctx.remaining().map(|d| d.as_millis() as u64),
                    },
                };
                let outcome = self
                    .call::<_, serde_json::Value>(method::CLEANUP, &args, ctx)
                    .await;
                if let Err(e) = outcome {
                    warn!(
                        "Remote cleanup from {} at {} failed: {}",
                        previous,
                        self.peer.label(),
                        e
                    );
                }
                self.set_configured(Configured::default());
                self.host.clear();
            })
            .await;
        if !released {
            debug!("Cleanup on a terminated proxy ignored");
        }
    }

    async fn invalidate_key(&self, ctx: &Context, key: &str) {
        if let Err(e) = self.try_invalidate_key(ctx, key).await {
            warn!("Invalidating '{}' at {} failed: {}", key, self.peer.label(), e);
        }
    }
}
