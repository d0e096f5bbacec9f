use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Which networks an upload may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityPolicy {
    /// Upload only over an unmetered link.
    #[default]
    WifiOnly,
    /// Upload over whatever link is available.
    AllowMetered,
}

/// Answers whether an unmetered transport is currently up.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectivityProbe: Send + Sync {
    fn has_unmetered_transport(&self) -> bool;
}

/// Reads interface state from `/sys/class/net`.
///
/// A physical interface counts as unmetered when it is up and is either
/// wireless or wired Ethernet. Cellular modems (`wwan*`) never count.
#[derive(Debug, Clone)]
pub struct SysfsConnectivity {
    root: PathBuf,
}

impl SysfsConnectivity {
    pub fn new() -> Self {
        Self::with_root("/sys/class/net")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        SysfsConnectivity { root: root.into() }
    }

    fn interface_is_unmetered(dir: &Path) -> bool {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name == "lo" || name.starts_with("wwan") {
            return false;
        }

        let up = fs::read_to_string(dir.join("operstate"))
            .map(|s| s.trim() == "up")
            .unwrap_or(false);
        if !up || !dir.join("device").exists() {
            return false;
        }

        let wireless = dir.join("wireless").exists() || dir.join("phy80211").exists();
        // ARPHRD_ETHER
        let ethernet = fs::read_to_string(dir.join("type"))
            .map(|s| s.trim() == "1")
            .unwrap_or(false);

        debug!("Interface {} is up (wireless: {}, ethernet: {})", name, wireless, ethernet);
        wireless || ethernet
    }
}

impl Default for SysfsConnectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityProbe for SysfsConnectivity {
    fn has_unmetered_transport(&self) -> bool {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read {}: {}", self.root.display(), e);
                return false;
            }
        };

        entries
            .filter_map(Result::ok)
            .any(|entry| Self::interface_is_unmetered(&entry.path()))
    }
}

/// Fixed answer, for hosts without interface introspection and for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity(pub bool);

impl ConnectivityProbe for StaticConnectivity {
    fn has_unmetered_transport(&self) -> bool {
        self.0
    }
}

/// The probe for the current platform.
pub fn default_probe() -> Arc<dyn ConnectivityProbe> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(SysfsConnectivity::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        log::warn!("No connectivity introspection on this platform; treating every link as unmetered");
        Arc::new(StaticConnectivity(true))
    }
}

/// Policy plus probe: decides whether an upload may proceed right now.
#[derive(Clone)]
pub struct ConnectivityGate {
    policy: ConnectivityPolicy,
    probe: Arc<dyn ConnectivityProbe>,
}

impl ConnectivityGate {
    pub fn new(policy: ConnectivityPolicy, probe: Arc<dyn ConnectivityProbe>) -> Self {
        ConnectivityGate { policy, probe }
    }

    pub fn policy(&self) -> ConnectivityPolicy {
        self.policy
    }

    pub fn permits(&self) -> bool {
        match self.policy {
            ConnectivityPolicy::AllowMetered => true,
            ConnectivityPolicy::WifiOnly => self.probe.has_unmetered_transport(),
        }
    }

    /// [`permits`](Self::permits) with the probe run on the blocking pool,
    /// for callers on an async worker.
    pub async fn permits_now(&self) -> bool {
        match self.policy {
            ConnectivityPolicy::AllowMetered => true,
            ConnectivityPolicy::WifiOnly => {
                let probe = Arc::clone(&self.probe);
                tokio::task::spawn_blocking(move || probe.has_unmetered_transport())
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Connectivity probe did not complete: {}", e);
                        false
                    })
            }
        }
    }
}

impl std::fmt::Debug for ConnectivityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityGate").field("policy", &self.policy).finish()
    }
}
