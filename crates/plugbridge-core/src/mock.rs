//! A small backend for tests and the example plugin binary.
//!
//! Paths:
//!
//! | path                 | operations                      |
//! |----------------------|---------------------------------|
//! | `kv/<key>`           | create, update, read, delete    |
//! | `kv/`                | list                            |
//! | `internal`           | read, update                    |
//! | `namespace`          | read                            |
//! | `system`             | read                            |
//! | `initialized`        | read                            |
//! | `special`            | read (unauthenticated)          |
//! | `slow`               | read, sleeps `ms` (default 10s) |
//! | `errors/application` | any, fails                      |
//! | `errors/unsupported` | any, unsupported                |
//! | `errors/panic`       | any, panics                     |
//!
//! `kv/<key>` is backed by the setup storage and supports existence checks.
//! `internal` holds an in-memory value set to `bar` at setup and cleared by
//! invalidating the key `internal`.

use crate::context::Context;
use crate::error::{BridgeError, Result};
use crate::logical::{
    Backend, BackendConfig, ExistenceCheck, Factory, InitializationRequest, Logger, Operation,
    PathSpec, Request, Response, Storage, StorageEntry, SystemView, Value,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

const KV_PREFIX: &str = "kv/";
const INTERNAL_KEY: &str = "internal";
const INTERNAL_DEFAULT: &str = "bar";
const SLOW_DEFAULT_MS: i64 = 10_000;

/// Factory for [`MockBackend`], setting it up before returning it.
pub fn factory() -> Factory {
    Arc::new(
        |ctx: Context, config: BackendConfig| -> BoxFuture<'static, Result<Arc<dyn Backend>>> {
            Box::pin(async move {
                let backend = Arc::new(MockBackend::new());
                backend.setup(&ctx, config).await?;
                Ok(backend as Arc<dyn Backend>)
            })
        },
    )
}

#[derive(Debug, Default)]
pub struct MockBackend {
    config: RwLock<Option<BackendConfig>>,
    internal: RwLock<String>,
    initialized: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn config(&self) -> Result<BackendConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BridgeError::application("mock backend is not configured"))
    }

    fn storage(&self) -> Result<Arc<dyn Storage>> {
        Ok(self.config()?.storage)
    }

    fn internal(&self) -> String {
        self.internal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_internal(&self, value: impl Into<String>) {
        *self.internal.write().unwrap_or_else(PoisonError::into_inner) = value.into();
    }

    async fn handle_kv(&self, req: &Request, key: &str) -> Result<Response> {
        let storage = self.storage()?;
        let storage_key = format!("{KV_PREFIX}{key}");
        match req.operation {
            Operation::Create | Operation::Update => {
                let value = req
                    .get_str("value")
                    .ok_or_else(|| BridgeError::application("missing 'value' field"))?;
                storage
                    .put(StorageEntry::new(storage_key, value.as_bytes()))
                    .await?;
                Ok(Response::with_field("value", value))
            }
            Operation::Read => {
                let Some(entry) = storage.get(&storage_key).await? else {
                    return Ok(Response::default());
                };
                let value = String::from_utf8(entry.value)
                    .map_err(|_| BridgeError::application("stored value is not UTF-8"))?;
                Ok(Response::with_field("value", value))
            }
            Operation::Delete => {
                storage.delete(&storage_key).await?;
                Ok(Response::default())
            }
            _ => Err(unsupported(req)),
        }
    }

    async fn handle_list(&self, req: &Request) -> Result<Response> {
        if req.operation != Operation::List {
            return Err(unsupported(req));
        }
        let keys = self.storage()?.list(KV_PREFIX).await?;
        Ok(Response::with_field(
            "keys",
            keys.into_iter().collect::<Value>(),
        ))
    }

    fn handle_internal(&self, req: &Request) -> Result<Response> {
        match req.operation {
            Operation::Read => Ok(Response::with_field("value", self.internal())),
            Operation::Update => {
                let value = req
                    .get_str("value")
                    .ok_or_else(|| BridgeError::application("missing 'value' field"))?;
                self.set_internal(value);
                Ok(Response::with_field("value", value))
            }
            _ => Err(unsupported(req)),
        }
    }

    fn handle_namespace(&self, ctx: &Context, req: &Request) -> Result<Response> {
        if req.operation != Operation::Read {
            return Err(unsupported(req));
        }
        let namespace = ctx.require_namespace()?;
        let mut resp = Response::with_field("id", namespace.id.as_str());
        if let Some(data) = resp.data.as_mut() {
            data.insert("path".to_string(), Value::from(namespace.path.as_str()));
        }
        Ok(resp)
    }

    fn handle_system(&self, req: &Request) -> Result<Response> {
        if req.operation != Operation::Read {
            return Err(unsupported(req));
        }
        let system = self.config()?.system;
        let secs = |d: Duration| i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
        let mut resp = Response::with_field("default_lease_ttl", secs(system.default_lease_ttl()));
        if let Some(data) = resp.data.as_mut() {
            data.insert(
                "max_lease_ttl".to_string(),
                Value::from(secs(system.max_lease_ttl())),
            );
        }
        Ok(resp)
    }

    async fn handle_slow(&self, req: &Request) -> Result<Response> {
        let ms = req
            .get("ms")
            .and_then(Value::as_i64)
            .unwrap_or(SLOW_DEFAULT_MS)
            .max(0);
        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        Ok(Response::with_field("slept_ms", ms))
    }

    fn mock_logger(&self) -> Option<Logger> {
        self.config().ok().map(|config| config.logger.named("mock"))
    }
}

fn unsupported(req: &Request) -> BridgeError {
    BridgeError::UnsupportedOperation {
        operation: req.operation.to_string(),
        path: req.path.clone(),
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn setup(&self, _ctx: &Context, config: BackendConfig) -> Result<()> {
        config.logger.named("mock").debug("mock backend set up");
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
        self.set_internal(INTERNAL_DEFAULT);
        Ok(())
    }

    async fn initialize(&self, _ctx: &Context, req: InitializationRequest) -> Result<()> {
        if let Some(value) = req
            .params
            .as_ref()
            .and_then(|params| params.get(INTERNAL_KEY))
            .and_then(Value::as_str)
        {
            self.set_internal(value);
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_request(&self, ctx: &Context, req: Request) -> Result<Response> {
        if let Some(logger) = self.mock_logger() {
            logger.trace(format!("{} {}", req.operation, req.path));
        }
        let path = req.path.as_str();
        if let Some(key) = path.strip_prefix(KV_PREFIX).filter(|key| !key.is_empty()) {
            return self.handle_kv(&req, key).await;
        }
        match path {
            "kv" | KV_PREFIX => self.handle_list(&req).await,
            INTERNAL_KEY => self.handle_internal(&req),
            "namespace" => self.handle_namespace(ctx, &req),
            "system" => self.handle_system(&req),
            "initialized" => Ok(Response::with_field(
                "initialized",
                self.initialized.load(Ordering::SeqCst),
            )),
            "special" => Ok(Response::with_field("special", true)),
            "slow" => self.handle_slow(&req).await,
            "errors/application" => Err(BridgeError::application("mock application error")),
            "errors/unsupported" => Err(unsupported(&req)),
            "errors/panic" => panic!("mock backend panic"),
            _ => Err(BridgeError::UnsupportedPath {
                path: req.path.clone(),
            }),
        }
    }

    async fn handle_existence_check(&self, _ctx: &Context, req: Request) -> Result<ExistenceCheck> {
        let Some(key) = req.path.strip_prefix(KV_PREFIX).filter(|key| !key.is_empty()) else {
            return Ok(ExistenceCheck::unsupported());
        };
        let entry = self.storage()?.get(&format!("{KV_PREFIX}{key}")).await?;
        Ok(ExistenceCheck::found(entry.is_some()))
    }

    async fn special_paths(&self) -> Result<PathSpec> {
        Ok(PathSpec {
            unauthenticated: vec!["special".to_string()],
            ..Default::default()
        })
    }

    fn system(&self) -> Option<Arc<dyn SystemView>> {
        self.config().ok().map(|config| config.system)
    }

    fn logger(&self) -> Option<Logger> {
        self.config().ok().map(|config| config.logger)
    }

    async fn cleanup(&self, _ctx: &Context) {
        if let Some(logger) = self.mock_logger() {
            logger.debug("mock backend cleaned up");
        }
        self.set_internal("");
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn invalidate_key(&self, _ctx: &Context, key: &str) {
        if key == INTERNAL_KEY {
            self.set_internal("");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Namespace;
    use crate::logical::{InmemStorage, LogLevel, StaticSystemView};
    use std::collections::BTreeMap;

    async fn configured() -> (Arc<dyn Backend>, Context) {
        let ctx = Context::background().with_namespace(Namespace::new("testid", "testpath"));
        let config = BackendConfig {
            logger: Logger::new("test", LogLevel::Info),
            system: Arc::new(StaticSystemView::new(
                Duration::from_secs(300),
                Duration::from_secs(1800),
            )),
            storage: Arc::new(InmemStorage::new()),
            config: BTreeMap::new(),
        };
        let backend = factory()(ctx.clone(), config).await.unwrap();
        (backend, ctx)
    }

    #[tokio::test]
    async fn test_kv_create_read_delete() {
        let (backend, ctx) = configured().await;
        let resp = backend
            .handle_request(
                &ctx,
                Request::new(Operation::Create, "kv/foo").with_field("value", "bar"),
            )
            .await
            .unwrap();
        assert_eq!(resp.get_str("value"), Some("bar"));

        let resp = backend
            .handle_request(&ctx, Request::new(Operation::Read, "kv/foo"))
            .await
            .unwrap();
        assert_eq!(resp.get_str("value"), Some("bar"));

        backend
            .handle_request(&ctx, Request::new(Operation::Delete, "kv/foo"))
            .await
            .unwrap();
        let resp = backend
            .handle_request(&ctx, Request::new(Operation::Read, "kv/foo"))
            .await
            .unwrap();
        assert!(resp.data.is_none());
    }

    #[tokio::test]
    async fn test_existence_check() {
        let (backend, ctx) = configured().await;
        let check = backend
            .handle_existence_check(&ctx, Request::new(Operation::Create, "kv/foo"))
            .await
            .unwrap();
        assert_eq!(check.exists(), Some(false));

        let check = backend
            .handle_existence_check(&ctx, Request::new(Operation::Read, "internal"))
            .await
            .unwrap();
        assert!(!check.check_found());
    }

    #[tokio::test]
    async fn test_invalidate_internal() {
        let (backend, ctx) = configured().await;
        let read = || Request::new(Operation::Read, "internal");
        let resp = backend.handle_request(&ctx, read()).await.unwrap();
        assert_eq!(resp.get_str("value"), Some("bar"));

        backend.invalidate_key(&ctx, "internal").await;
        let resp = backend.handle_request(&ctx, read()).await.unwrap();
        assert_eq!(resp.get_str("value"), Some(""));
    }

    #[tokio::test]
    async fn test_unknown_path_and_operation() {
        let (backend, ctx) = configured().await;
        assert!(matches!(
            backend
                .handle_request(&ctx, Request::new(Operation::Read, "nowhere"))
                .await,
            Err(BridgeError::UnsupportedPath { .. })
        ));
        assert!(matches!(
            backend
                .handle_request(&ctx, Request::new(Operation::Delete, "internal"))
                .await,
            Err(BridgeError::UnsupportedOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_initialize_primes_internal() {
        let (backend, ctx) = configured().await;
        let mut params = crate::logical::Map::new();
        params.insert("internal".to_string(), Value::from("primed"));
        backend
            .initialize(&ctx, InitializationRequest { params: Some(params) })
            .await
            .unwrap();

        let resp = backend
            .handle_request(&ctx, Request::new(Operation::Read, "initialized"))
            .await
            .unwrap();
        assert_eq!(resp.get("initialized"), Some(&Value::Bool(true)));
        let resp = backend
            .handle_request(&ctx, Request::new(Operation::Read, "internal"))
            .await
            .unwrap();
        assert_eq!(resp.get_str("value"), Some("primed"));
    }
}
