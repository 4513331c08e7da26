//! Cooperative cancellation for bridged calls.
//!
//! Every [`Context`](crate::context::Context) carries a token. On the calling
//! side the proxy races the token against the reply and sends `$/cancel`
//! when it fires. On the serving side each inbound call gets its own token,
//! fired by that notification or by the connection going away.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared cancellation flag. Clones observe the same flag; once set it stays
/// set.
///
/// ```
/// use plugbridge_core::cancel::CancellationToken;
///
/// let call = CancellationToken::new();
/// let watcher = call.clone();
/// call.cancel();
/// assert!(watcher.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Set the flag and wake every waiter. Calling it again does nothing.
    pub fn cancel(&self) {
        self.flag.send_if_modified(|set| !std::mem::replace(set, true));
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolve once the flag is set, immediately if it already is.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // `self` keeps the sender alive, so this cannot fail.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// `Err(CancelledError)` once the flag is set.
    pub fn check(&self) -> Result<(), CancelledError> {
        match self.is_cancelled() {
            true => Err(CancelledError),
            false => Ok(()),
        }
    }
}

/// A call was abandoned through its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("call cancelled")]
pub struct CancelledError;

impl From<CancelledError> for crate::error::BridgeError {
    fn from(_: CancelledError) -> Self {
        crate::error::BridgeError::Cancelled
    }
}
