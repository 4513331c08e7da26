//! In-process backend adapter.
//!
//! [`LocalBackend`] wraps a backend [`Factory`] with the lifecycle rules every
//! backend is held to: one setup, requests only once configured (or ready,
//! under the strict policy), idempotent cleanup, and panics turned into
//! errors. The plugin server replays wire calls against one of these, and a
//! host that wants the backend in its own process uses it directly, so both
//! paths behave the same.

use crate::context::Context;
use crate::error::{BridgeError, Result};
use crate::lifecycle::{Lifecycle, LifecyclePolicy, LifecycleState};
use crate::logical::{
    Backend, BackendConfig, ExistenceCheck, Factory, InitializationRequest, Logger, PathSpec,
    Request, Response, SystemView,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

/// A backend built from a factory and guarded by a [`Lifecycle`].
pub struct LocalBackend {
    factory: Factory,
    lifecycle: Lifecycle,
    instance: RwLock<Option<Arc<dyn Backend>>>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("lifecycle", &self.lifecycle)
            .field("configured", &self.instance().is_some())
            .finish()
    }
}

impl LocalBackend {
    pub fn new(factory: Factory, policy: LifecyclePolicy) -> Self {
        Self {
            factory,
            lifecycle: Lifecycle::new(policy),
            instance: RwLock::new(None),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.state().await
    }

    fn instance(&self) -> Option<Arc<dyn Backend>> {
        self.instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_instance(&self, backend: Option<Arc<dyn Backend>>) -> Option<Arc<dyn Backend>> {
        let mut slot = self.instance.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, backend)
    }

    /// The configured instance; `state` names the lifecycle state to report
    /// when there is none.
    fn instance_in(&self, operation: &str, state: LifecycleState) -> Result<Arc<dyn Backend>> {
        self.instance()
            .ok_or_else(|| BridgeError::lifecycle(operation, state))
    }

    async fn require_instance(&self, operation: &str) -> Result<Arc<dyn Backend>> {
        match self.instance() {
            Some(backend) => Ok(backend),
            None => Err(BridgeError::lifecycle(operation, self.state().await)),
        }
    }

    /// The system view the backend was configured with.
    pub async fn system_view(&self) -> Result<Arc<dyn SystemView>> {
        let backend = self.require_instance("system").await?;
        catch_sync_panics("system", || backend.system())?
            .ok_or_else(|| BridgeError::application("backend exposes no system view"))
    }

    /// The logger the backend was configured with.
    pub async fn logger_handle(&self) -> Result<Logger> {
        let backend = self.require_instance("logger").await?;
        catch_sync_panics("logger", || backend.logger())?
            .ok_or_else(|| BridgeError::application("backend exposes no logger"))
    }

    /// Invalidate `key`, reporting lifecycle and backend failures.
    ///
    /// Returns only after the backend has dropped the key, so a request
    /// issued afterwards observes the invalidation.
    pub async fn try_invalidate_key(&self, ctx: &Context, key: &str) -> Result<()> {
        let serving = self.lifecycle.serving("invalidate_key").await?;
        ctx.require_namespace()?;
        let backend = self.instance_in("invalidate_key", serving.state())?;
        invoke(ctx, "invalidate_key", async {
            backend.invalidate_key(ctx, key).await;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn setup(&self, ctx: &Context, config: BackendConfig) -> Result<()> {
        ctx.require_namespace()?;
        self.lifecycle
            .setup(|| async {
                let backend = invoke(ctx, "setup", (self.factory)(ctx.clone(), config)).await?;
                self.replace_instance(Some(backend));
                Ok(())
            })
            .await?;
        debug!("Backend configured");
        Ok(())
    }

    async fn initialize(&self, ctx: &Context, req: InitializationRequest) -> Result<()> {
        ctx.require_namespace()?;
        self.lifecycle
            .initialize(|| async {
                let backend = self.instance_in("initialize", LifecycleState::Configured)?;
                invoke(ctx, "initialize", backend.initialize(ctx, req)).await
            })
            .await
    }

    async fn handle_request(&self, ctx: &Context, req: Request) -> Result<Response> {
        let serving = self.lifecycle.serving("handle_request").await?;
        ctx.require_namespace()?;
        let backend = self.instance_in("handle_request", serving.state())?;
        invoke(ctx, "handle_request", backend.handle_request(ctx, req)).await
    }

    async fn handle_existence_check(&self, ctx: &Context, req: Request) -> Result<ExistenceCheck> {
        let serving = self.lifecycle.serving("handle_existence_check").await?;
        ctx.require_namespace()?;
        let backend = self.instance_in("handle_existence_check", serving.state())?;
        let check = invoke(
            ctx,
            "handle_existence_check",
            backend.handle_existence_check(ctx, req),
        )
        .await?;
        let (check_found, exists) = check.into_parts();
        Ok(ExistenceCheck::from_parts(check_found, exists))
    }

    async fn special_paths(&self) -> Result<PathSpec> {
        match self.instance() {
            Some(backend) => catch_panics("special_paths", backend.special_paths()).await,
            None => Ok(PathSpec::default()),
        }
    }

    fn system(&self) -> Option<Arc<dyn SystemView>> {
        let backend = self.instance()?;
        catch_sync_panics("system", || backend.system()).ok().flatten()
    }

    fn logger(&self) -> Option<Logger> {
        let backend = self.instance()?;
        catch_sync_panics("logger", || backend.logger()).ok().flatten()
    }

    async fn cleanup(&self, ctx: &Context) {
        let released = self
            .lifecycle
            .cleanup(|previous| async move {
                let Some(backend) = self.replace_instance(None) else {
                    debug!("Cleanup from {} released nothing", previous);
                    return;
                };
                let outcome = catch_panics("cleanup", async {
                    backend.cleanup(ctx).await;
                    Ok(())
                })
                .await;
                if let Err(e) = outcome {
                    error!("Backend cleanup failed: {}", e);
                }
            })
            .await;
        if !released {
            debug!("Cleanup on a terminated backend ignored");
        }
    }

    async fn invalidate_key(&self, ctx: &Context, key: &str) {
        if let Err(e) = self.try_invalidate_key(ctx, key).await {
            warn!("Invalidating '{}' failed: {}", key, e);
        }
    }
}

/// Run a backend call under the context's cancellation and deadline.
pub(crate) async fn invoke<T>(
    ctx: &Context,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    ctx.bounded(catch_panics(operation, fut)).await?
}

/// Turn a panic inside `fut` into `BridgeError::Panicked`.
pub(crate) async fn catch_panics<T>(
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panicked(operation, payload.as_ref())),
    }
}

/// `catch_panics` for the backend's synchronous accessors.
fn catch_sync_panics<T>(operation: &str, f: impl FnOnce() -> T) -> Result<T> {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| panicked(operation, payload.as_ref()))
}

fn panicked(operation: &str, payload: &(dyn Any + Send)) -> BridgeError {
    let err = BridgeError::panicked(operation, payload);
    error!("{}", err);
    err
}
