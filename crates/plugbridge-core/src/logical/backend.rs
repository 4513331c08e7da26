//! The backend contract shared by local backends and remote proxies.

use super::logger::Logger;
use super::paths::PathSpec;
use super::request::{InitializationRequest, Request};
use super::response::Response;
use super::storage::Storage;
use super::system::SystemView;
use crate::context::Context;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a backend receives once, at setup.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub logger: Logger,
    pub system: Arc<dyn SystemView>,
    pub storage: Arc<dyn Storage>,
    /// Flat mount configuration.
    pub config: BTreeMap<String, String>,
}

/// Outcome of an existence check.
///
/// `exists` only means something when `check_found` is true; the accessor
/// returns `None` otherwise so callers cannot read it by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistenceCheck {
    check_found: bool,
    exists: bool,
}

impl ExistenceCheck {
    /// The path does not implement existence checks.
    pub fn unsupported() -> Self {
        Self {
            check_found: false,
            exists: false,
        }
    }

    /// The path implements existence checks and the resource does or does
    /// not exist.
    pub fn found(exists: bool) -> Self {
        Self {
            check_found: true,
            exists,
        }
    }

    /// Build from raw parts, clearing `exists` when the check was not found.
    pub fn from_parts(check_found: bool, exists: bool) -> Self {
        if check_found {
            Self::found(exists)
        } else {
            Self::unsupported()
        }
    }

    pub fn check_found(&self) -> bool {
        self.check_found
    }

    pub fn exists(&self) -> Option<bool> {
        self.check_found.then_some(self.exists)
    }

    /// Flatten to the `(check_found, exists)` pair, `exists` already cleared
    /// for unsupported paths.
    pub fn into_parts(self) -> (bool, bool) {
        let normalized = Self::from_parts(self.check_found, self.exists);
        (normalized.check_found, normalized.exists)
    }
}

/// A logical backend.
///
/// Implemented by concrete backends and by the remote proxy alike, so a host
/// holding an `Arc<dyn Backend>` cannot tell which one it has.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Configure the backend. Must happen before any request handling.
    async fn setup(&self, ctx: &Context, config: BackendConfig) -> Result<()>;

    /// Leave the configured phase; may prime derived state.
    async fn initialize(&self, _ctx: &Context, _req: InitializationRequest) -> Result<()> {
        Ok(())
    }

    async fn handle_request(&self, ctx: &Context, req: Request) -> Result<Response>;

    async fn handle_existence_check(&self, _ctx: &Context, _req: Request) -> Result<ExistenceCheck> {
        Ok(ExistenceCheck::unsupported())
    }

    /// Routing metadata. An empty spec means no special paths.
    async fn special_paths(&self) -> Result<PathSpec> {
        Ok(PathSpec::default())
    }

    /// System view configured at setup, `None` before.
    fn system(&self) -> Option<Arc<dyn SystemView>>;

    /// Logger configured at setup, `None` before.
    fn logger(&self) -> Option<Logger>;

    /// Release resources. Never fails; calling it again is a no-op.
    async fn cleanup(&self, _ctx: &Context) {}

    /// Drop any cached state under `key`.
    async fn invalidate_key(&self, _ctx: &Context, _key: &str) {}
}

/// Builds and configures a backend instance.
///
/// The returned backend has already been set up with the given config.
pub type Factory =
    Arc<dyn Fn(Context, BackendConfig) -> BoxFuture<'static, Result<Arc<dyn Backend>>> + Send + Sync>;
