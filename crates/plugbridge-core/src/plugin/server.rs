//! Plugin-side adapter: serves `Backend.*` calls from a host.
//!
//! One `BackendServer` serves one connection. It decodes each call, replays
//! it against a [`LocalBackend`] and encodes the outcome. When the connection
//! goes away the backend is cleaned up, so a host that vanishes without
//! calling `Cleanup` still releases its backend.

use super::local::LocalBackend;
use super::storage::RemoteStorage;
use super::wire::{
    self, method, CleanupArgs, InitializeArgs, InvalidateKeyArgs, RequestArgs, SetupArgs,
};
use crate::context::Context;
use crate::error::{BridgeError, Result};
use crate::ipc::{InboundCall, IpcDispatch};
use crate::lifecycle::LifecyclePolicy;
use crate::logical::{Backend, BackendConfig, Factory, StaticSystemView};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Serves one backend over one connection.
#[derive(Debug)]
pub struct BackendServer {
    backend: LocalBackend,
}

impl BackendServer {
    pub fn new(factory: Factory, policy: LifecyclePolicy) -> Self {
        Self {
            backend: LocalBackend::new(factory, policy),
        }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &LocalBackend {
        &self.backend
    }

    async fn setup(&self, args: SetupArgs, call: &InboundCall) -> Result<Value> {
        let ctx = args.context.decode(call.cancellation().clone())?;
        let config = BackendConfig {
            logger: args.config.logger,
            system: Arc::new(args.config.system),
            storage: Arc::new(RemoteStorage::new(call.peer().clone())),
            config: args.config.config,
        };
        self.backend.setup(&ctx, config).await?;
        info!("Backend set up for {}", call.peer().label());
        Ok(Value::Null)
    }

    async fn handle_request(&self, args: RequestArgs, call: &InboundCall) -> Result<Value> {
        let ctx = args.context.decode(call.cancellation().clone())?;
        let mut request = args.request;
        request.wire_size = Some(call.frame_len() as u64);
        let response = self.backend.handle_request(&ctx, request).await?;
        wire::encode(&response)
    }

    async fn handle_existence_check(&self, args: RequestArgs, call: &InboundCall) -> Result<Value> {
        let ctx = args.context.decode(call.cancellation().clone())?;
        let mut request = args.request;
        request.wire_size = Some(call.frame_len() as u64);
        let check = self.backend.handle_existence_check(&ctx, request).await?;
        wire::encode(&check)
    }

    async fn initialize(&self, args: InitializeArgs, call: &InboundCall) -> Result<Value> {
        let ctx = args.context.decode(call.cancellation().clone())?;
        self.backend.initialize(&ctx, args.request).await?;
        Ok(Value::Null)
    }

    async fn invalidate_key(&self, args: InvalidateKeyArgs, call: &InboundCall) -> Result<Value> {
        let ctx = args.context.decode(call.cancellation().clone())?;
        self.backend.try_invalidate_key(&ctx, &args.key).await?;
        Ok(Value::Null)
    }

    async fn cleanup(&self, args: CleanupArgs, call: &InboundCall) -> Result<Value> {
        let ctx = args.context.decode_unscoped(call.cancellation().clone());
        self.backend.cleanup(&ctx).await;
        Ok(Value::Null)
    }
}

#[async_trait]
impl IpcDispatch for BackendServer {
    async fn dispatch(&self, method: &str, params: Value, call: InboundCall) -> Result<Value> {
        match method {
            method::SETUP => self.setup(wire::decode_params(method, params)?, &call).await,
            method::HANDLE_REQUEST => {
                self.handle_request(wire::decode_params(method, params)?, &call)
                    .await
            }
            method::HANDLE_EXISTENCE_CHECK => {
                self.handle_existence_check(wire::decode_params(method, params)?, &call)
                    .await
            }
            method::SPECIAL_PATHS => wire::encode(&self.backend.special_paths().await?),
            method::SYSTEM => {
                let view = self.backend.system_view().await?;
                wire::encode(&StaticSystemView::capture(view.as_ref()))
            }
            method::LOGGER => wire::encode(&self.backend.logger_handle().await?),
            method::CLEANUP => self.cleanup(wire::decode_params(method, params)?, &call).await,
            method::INVALIDATE_KEY => {
                self.invalidate_key(wire::decode_params(method, params)?, &call)
                    .await
            }
            method::INITIALIZE => {
                self.initialize(wire::decode_params(method, params)?, &call)
                    .await
            }
            _ => Err(BridgeError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }

    async fn closed(&self) {
        debug!("Host connection closed, releasing backend");
        self.backend.cleanup(&Context::background()).await;
    }
}
