//! Static routing metadata a backend declares about its paths.

use serde::{Deserialize, Serialize};

/// Path patterns with special handling by the host router.
///
/// An empty spec is a valid answer; it is never represented as "absent".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSpec {
    /// Paths that require a root token.
    #[serde(default)]
    pub root: Vec<String>,
    /// Paths reachable without authentication.
    #[serde(default)]
    pub unauthenticated: Vec<String>,
    /// Paths whose storage is local to the node.
    #[serde(default)]
    pub local_storage: Vec<String>,
    /// Paths whose storage is seal-wrapped.
    #[serde(default)]
    pub seal_wrap_storage: Vec<String>,
}

impl PathSpec {
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
            && self.unauthenticated.is_empty()
            && self.local_storage.is_empty()
            && self.seal_wrap_storage.is_empty()
    }
}
