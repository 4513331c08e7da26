//! System view: host-provided settings a backend may consult.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Read-only view of host settings handed to a backend at setup.
pub trait SystemView: Send + Sync + fmt::Debug {
    /// Lease TTL applied when a backend does not pick one.
    fn default_lease_ttl(&self) -> Duration;

    /// Upper bound for any lease TTL.
    fn max_lease_ttl(&self) -> Duration;

    /// Whether the mount has been tainted for removal.
    fn tainted(&self) -> bool {
        false
    }

    /// Whether the mount is local to this node.
    fn local_mount(&self) -> bool {
        false
    }
}

/// A fixed system view. Also the form a system view takes on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSystemView {
    pub default_lease_ttl: Duration,
    pub max_lease_ttl: Duration,
    #[serde(default)]
    pub tainted: bool,
    #[serde(default)]
    pub local_mount: bool,
}

impl StaticSystemView {
    pub fn new(default_lease_ttl: Duration, max_lease_ttl: Duration) -> Self {
        Self {
            default_lease_ttl,
            max_lease_ttl,
            ..Default::default()
        }
    }

    /// Snapshot any system view.
    pub fn capture(view: &dyn SystemView) -> Self {
        Self {
            default_lease_ttl: view.default_lease_ttl(),
            max_lease_ttl: view.max_lease_ttl(),
            tainted: view.tainted(),
            local_mount: view.local_mount(),
        }
    }
}

impl SystemView for StaticSystemView {
    fn default_lease_ttl(&self) -> Duration {
        self.default_lease_ttl
    }

    fn max_lease_ttl(&self) -> Duration {
        self.max_lease_ttl
    }

    fn tainted(&self) -> bool {
        self.tainted
    }

    fn local_mount(&self) -> bool {
        self.local_mount
    }
}
