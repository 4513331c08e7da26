//! Request context and its wire envelope.
//!
//! A [`Context`] carries the namespace a call runs under, a cancellation
//! token and an optional deadline. On the wire it becomes a
//! [`ContextEnvelope`]: the namespace plus the remaining deadline budget.
//! Cancellation does not travel in the envelope; the call id is the handle
//! and a `$/cancel` notification fires the per-call token on the far side.

use crate::cancel::CancellationToken;
use crate::error::{BridgeError, Result};
use crate::ipc::connection::CallOptions;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Namespace identity a request executes under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub path: String,
}

impl Namespace {
    pub const ROOT_ID: &'static str = "root";

    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// The root namespace. Never applied implicitly; callers opt into it.
    pub fn root() -> Self {
        Self::new(Self::ROOT_ID, "")
    }

    pub fn is_root(&self) -> bool {
        self.id == Self::ROOT_ID
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.id, self.path)
    }
}

/// Execution context for a single call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    namespace: Option<Namespace>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context with no namespace, no deadline and a fresh token.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    /// The namespace, or `MissingNamespace`.
    pub fn require_namespace(&self) -> Result<&Namespace> {
        self.namespace.as_ref().ok_or(BridgeError::MissingNamespace)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        self.cancel.check()?;
        if self.remaining() == Some(Duration::ZERO) {
            return Err(BridgeError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `fut` until it completes, the token fires or the deadline passes.
    pub async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            output = fut => Ok(output),
            _ = self.cancel.cancelled() => Err(BridgeError::Cancelled),
            _ = deadline => Err(BridgeError::DeadlineExceeded),
        }
    }

    /// Transport options derived from this context.
    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            cancel: Some(self.cancel.clone()),
            deadline: self.deadline,
        }
    }
}

/// Wire form of a [`Context`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    /// Remaining deadline budget in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ContextEnvelope {
    /// Capture the namespace and deadline budget of `ctx`.
    ///
    /// A missing namespace is carried as-is; the receiving side rejects it.
    pub fn encode(ctx: &Context) -> Result<Self> {
        ctx.check()?;
        Ok(Self {
            namespace: ctx.namespace.clone(),
            timeout_ms: ctx.remaining().map(ceil_millis),
        })
    }

    /// Rebuild a context on the receiving side around the per-call token.
    pub fn decode(self, cancel: CancellationToken) -> Result<Context> {
        let namespace = self.namespace.ok_or(BridgeError::MissingNamespace)?;
        let mut ctx = Context::background()
            .with_namespace(namespace)
            .with_cancellation(cancel);
        if let Some(ms) = self.timeout_ms {
            ctx = ctx.with_timeout(Duration::from_millis(ms));
        }
        Ok(ctx)
    }

    /// Like [`decode`](Self::decode) but tolerates a missing namespace.
    ///
    /// Only for teardown calls, which must run even for a host that never
    /// scoped the connection.
    pub fn decode_unscoped(self, cancel: CancellationToken) -> Context {
        let mut ctx = Context::background().with_cancellation(cancel);
        if let Some(namespace) = self.namespace {
            ctx = ctx.with_namespace(namespace);
        }
        if let Some(ms) = self.timeout_ms {
            ctx = ctx.with_timeout(Duration::from_millis(ms));
        }
        ctx
    }
}

fn ceil_millis(d: Duration) -> u64 {
    let millis = d.as_millis().min(u128::from(u64::MAX)) as u64;
    if d.subsec_nanos() % 1_000_000 != 0 {
        millis.saturating_add(1)
    } else {
        millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_namespace() -> Namespace {
        Namespace::new("testid", "testpath")
    }

    #[test]
    fn test_envelope_roundtrip_keeps_namespace() {
        let ctx = Context::background().with_namespace(test_namespace());
        let envelope = ContextEnvelope::encode(&ctx).unwrap();
        let json = serde_json::to_string(&envelope).unwrap();
        let back: ContextEnvelope = serde_json::from_str(&json).unwrap();

        let decoded = back.decode(CancellationToken::new()).unwrap();
        assert_eq!(decoded.namespace(), Some(&test_namespace()));
        assert!(decoded.deadline().is_none());
    }

    #[test]
    fn test_decode_without_namespace_fails() {
        let envelope = ContextEnvelope::encode(&Context::background()).unwrap();
        assert!(envelope.namespace.is_none());
        let err = envelope.decode(CancellationToken::new()).unwrap_err();
        assert!(matches!(err, BridgeError::MissingNamespace));
    }

    #[test]
    fn test_root_namespace_is_explicit() {
        let ctx = Context::background().with_namespace(Namespace::root());
        assert!(ctx.require_namespace().unwrap().is_root());
        assert!(Context::background().require_namespace().is_err());
    }

    #[tokio::test]
    async fn test_envelope_carries_deadline_budget() {
        let ctx = Context::background()
            .with_namespace(test_namespace())
            .with_timeout(Duration::from_secs(5));
        let envelope = ContextEnvelope::encode(&ctx).unwrap();
        let ms = envelope.timeout_ms.unwrap();
        assert!(ms > 4_000 && ms <= 5_000);

        let decoded = envelope.decode(CancellationToken::new()).unwrap();
        assert!(decoded.remaining().unwrap() <= Duration::from_secs(5));
    }

    #[test]
    fn test_encode_cancelled_context_fails() {
        let ctx = Context::background().with_namespace(test_namespace());
        ctx.cancellation().cancel();
        let err = ContextEnvelope::encode(&ctx).unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_reports_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let result = ctx
            .bounded(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert!(matches!(result, Err(BridgeError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_bounded_reports_cancellation() {
        let ctx = Context::background();
        let token = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let result = ctx.bounded(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_bounded_passes_output_through() {
        let ctx = Context::background();
        assert_eq!(ctx.bounded(async { 7 }).await.unwrap(), 7);
    }

    #[test]
    fn test_ceil_millis() {
        assert_eq!(ceil_millis(Duration::from_micros(1)), 1);
        assert_eq!(ceil_millis(Duration::from_millis(3)), 3);
        assert_eq!(ceil_millis(Duration::from_micros(3_001)), 4);
    }
}
