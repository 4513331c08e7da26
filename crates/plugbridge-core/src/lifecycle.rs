//! Backend lifecycle state machine.
//!
//! ```text
//! Uninitialized --setup--> Configured --initialize--> Ready
//! Ready --invalidate_key--> Ready
//! any --cleanup--> Terminated
//! ```
//!
//! Both the server adapter and the client proxy run one of these, so a
//! backend rejects the same calls at the same points whether it is local or
//! remote. Transitions take the write half of a readers/writer lock and
//! request handling takes the read half: requests run concurrently with each
//! other but never alongside a transition.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

/// Lifecycle state of one backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Configured,
    Ready,
    Terminated,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Configured => "configured",
            LifecycleState::Ready => "ready",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Whether request handling waits for `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePolicy {
    /// Requests are accepted once the backend is configured.
    #[default]
    Lenient,
    /// Requests are accepted only once the backend is ready.
    Strict,
}

impl LifecyclePolicy {
    /// Whether `state` accepts request handling under this policy.
    pub fn serves_in(&self, state: LifecycleState) -> bool {
        match state {
            LifecycleState::Ready => true,
            LifecycleState::Configured => *self == LifecyclePolicy::Lenient,
            LifecycleState::Uninitialized | LifecycleState::Terminated => false,
        }
    }
}

/// Lifecycle manager for one backend instance.
#[derive(Debug)]
pub struct Lifecycle {
    policy: LifecyclePolicy,
    state: RwLock<LifecycleState>,
}

/// Held for the duration of a request; blocks transitions while alive.
#[derive(Debug)]
pub struct ServingGuard<'a> {
    guard: RwLockReadGuard<'a, LifecycleState>,
}

impl ServingGuard<'_> {
    pub fn state(&self) -> LifecycleState {
        *self.guard
    }
}

impl Lifecycle {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self {
            policy,
            state: RwLock::new(LifecycleState::Uninitialized),
        }
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Run `configure` and move to `Configured` if it succeeds.
    ///
    /// Only valid from `Uninitialized`; a failed setup leaves the state
    /// untouched so it can be retried.
    pub async fn setup<T, F, Fut>(&self, configure: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = self.state.write().await;
        if *state != LifecycleState::Uninitialized {
            return Err(BridgeError::lifecycle("setup", *state));
        }
        let value = configure().await?;
        *state = LifecycleState::Configured;
        debug!("Backend lifecycle: uninitialized -> configured");
        Ok(value)
    }

    /// Run `init` and move to `Ready` if it succeeds. Only valid from
    /// `Configured`.
    pub async fn initialize<T, F, Fut>(&self, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = self.state.write().await;
        if *state != LifecycleState::Configured {
            return Err(BridgeError::lifecycle("initialize", *state));
        }
        let value = init().await?;
        *state = LifecycleState::Ready;
        debug!("Backend lifecycle: configured -> ready");
        Ok(value)
    }

    /// Move to `Terminated`, running `release` with the previous state.
    ///
    /// The state becomes `Terminated` whatever `release` does. Returns
    /// `false` without running `release` when already terminated.
    pub async fn cleanup<F, Fut>(&self, release: F) -> bool
    where
        F: FnOnce(LifecycleState) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut state = self.state.write().await;
        if *state == LifecycleState::Terminated {
            return false;
        }
        let previous = *state;
        *state = LifecycleState::Terminated;
        release(previous).await;
        debug!("Backend lifecycle: {} -> terminated", previous);
        true
    }

    /// Admit a request-handling call.
    ///
    /// Returns a guard that keeps transitions out until dropped.
    pub async fn serving(&self, operation: &str) -> Result<ServingGuard<'_>> {
        let guard = self.state.read().await;
        if self.policy.serves_in(*guard) {
            Ok(ServingGuard { guard })
        } else {
            Err(BridgeError::lifecycle(operation, *guard))
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(LifecyclePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_full_sequence() {
        let lifecycle = Lifecycle::new(LifecyclePolicy::Strict);
        assert_eq!(lifecycle.state().await, LifecycleState::Uninitialized);

        lifecycle.setup(|| async { Ok(()) }).await.unwrap();
        assert_eq!(lifecycle.state().await, LifecycleState::Configured);

        lifecycle.initialize(|| async { Ok(()) }).await.unwrap();
        assert_eq!(lifecycle.state().await, LifecycleState::Ready);

        assert!(lifecycle.serving("handle_request").await.is_ok());

        assert!(lifecycle.cleanup(|_| async {}).await);
        assert_eq!(lifecycle.state().await, LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_serving_before_setup_is_violation() {
        let lifecycle = Lifecycle::default();
        let err = lifecycle.serving("handle_request").await.unwrap_err();
        match err {
            BridgeError::LifecycleViolation { operation, state } => {
                assert_eq!(operation, "handle_request");
                assert_eq!(state, LifecycleState::Uninitialized);
            }
            other => panic!("Expected LifecycleViolation, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_policy_decides_configured_serving() {
        let lenient = Lifecycle::new(LifecyclePolicy::Lenient);
        lenient.setup(|| async { Ok(()) }).await.unwrap();
        assert!(lenient.serving("handle_request").await.is_ok());

        let strict = Lifecycle::new(LifecyclePolicy::Strict);
        strict.setup(|| async { Ok(()) }).await.unwrap();
        assert!(strict.serving("handle_request").await.is_err());
    }

    #[tokio::test]
    async fn test_second_setup_is_rejected() {
        let lifecycle = Lifecycle::default();
        lifecycle.setup(|| async { Ok(()) }).await.unwrap();

        let mut ran = false;
        let err = lifecycle
            .setup(|| {
                ran = true;
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert!(!ran);
        assert!(matches!(err, BridgeError::LifecycleViolation { .. }));
    }

    #[tokio::test]
    async fn test_failed_setup_can_be_retried() {
        let lifecycle = Lifecycle::default();
        let result: Result<()> = lifecycle
            .setup(|| async { Err(BridgeError::application("bad config")) })
            .await;
        assert!(result.is_err());
        assert_eq!(lifecycle.state().await, LifecycleState::Uninitialized);

        lifecycle.setup(|| async { Ok(()) }).await.unwrap();
        assert_eq!(lifecycle.state().await, LifecycleState::Configured);
    }

    #[tokio::test]
    async fn test_cleanup_twice_is_noop() {
        let lifecycle = Lifecycle::default();
        lifecycle.setup(|| async { Ok(()) }).await.unwrap();

        let mut calls = 0;
        assert!(lifecycle.cleanup(|_| { calls += 1; async {} }).await);
        assert!(!lifecycle.cleanup(|_| { calls += 1; async {} }).await);
        assert_eq!(calls, 1);

        let err = lifecycle.serving("handle_request").await.unwrap_err();
        assert!(matches!(err, BridgeError::Terminated));
    }

    #[tokio::test]
    async fn test_transition_waits_for_in_flight_requests() {
        let lifecycle = Arc::new(Lifecycle::default());
        lifecycle.setup(|| async { Ok(()) }).await.unwrap();

        let guard = lifecycle.serving("handle_request").await.unwrap();
        let cleanup = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.cleanup(|_| async {}).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!cleanup.is_finished());

        drop(guard);
        assert!(cleanup.await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_the_lock() {
        let lifecycle = Lifecycle::default();
        lifecycle.setup(|| async { Ok(()) }).await.unwrap();

        let first = lifecycle.serving("handle_request").await.unwrap();
        let second = tokio::time::timeout(
            Duration::from_millis(100),
            lifecycle.serving("handle_request"),
        )
        .await
        .expect("second request should not wait for the first")
        .unwrap();
        assert_eq!(first.state(), second.state());
    }
}
