use std::path::PathBuf;
use std::time::Duration;

use crate::poll::PollConfig;

/// A host-path bind mount applied to every container of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Path on the node's filesystem.
    pub source: PathBuf,
    /// Path inside the container.
    pub target: PathBuf,
}

impl BindMount {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Mount a host path at the same path inside the container.
    pub fn mirrored(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            source: path.clone(),
            target: path,
        }
    }
}

/// Configuration for a [`ClusterManager`](crate::swarm::ClusterManager) and
/// the dispatchers it spawns.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Port remote Docker daemons listen on for direct connections.
    pub remote_port: u16,
    /// Worker-pool capacity of each remote unit's dispatcher.
    pub max_workers: usize,
    /// Poll while waiting for service tasks to leave the "assigned" state.
    pub assignment_poll: PollConfig,
    /// Poll while waiting for every task to report a live container.
    pub activation_poll: PollConfig,
    /// Poll while waiting for a freshly bound unit to settle into idle.
    pub settle_poll: PollConfig,
    /// Gap between the two stats samples taken by `usage()`.
    pub usage_interval: Duration,
    /// Manager-level bind mounts, unioned with per-call mounts.
    pub mounts: Vec<BindMount>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            remote_port: 2375,
            max_workers: 4,
            assignment_poll: PollConfig::new(Duration::from_millis(100)),
            activation_poll: PollConfig::new(Duration::from_secs(1)),
            settle_poll: PollConfig::new(Duration::from_millis(100)),
            usage_interval: Duration::from_millis(100),
            mounts: Vec::new(),
        }
    }
}

impl ManagerConfig {
    pub fn with_mount(mut self, mount: BindMount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_config_default() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.remote_port, 2375);
        assert_eq!(cfg.max_workers, 4);
        assert_eq!(cfg.assignment_poll.interval, Duration::from_millis(100));
        assert_eq!(cfg.activation_poll.interval, Duration::from_secs(1));
        assert!(cfg.assignment_poll.deadline.is_none());
        assert!(cfg.mounts.is_empty());
    }

    #[test]
    fn manager_config_with_mount() {
        let cfg = ManagerConfig::default()
            .with_mount(BindMount::mirrored("/data"))
            .with_mount(BindMount::new("/scratch", "/mnt/scratch"));
        assert_eq!(cfg.mounts.len(), 2);
        assert_eq!(cfg.mounts[0].source, cfg.mounts[0].target);
        assert_eq!(cfg.mounts[1].target, PathBuf::from("/mnt/scratch"));
    }

    #[test]
    fn mirrored_mount_uses_same_path() {
        let mount = BindMount::mirrored("/shared/dataset");
        assert_eq!(mount.source, PathBuf::from("/shared/dataset"));
        assert_eq!(mount.target, PathBuf::from("/shared/dataset"));
    }
}
