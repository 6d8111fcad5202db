use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::exec::{Dispatcher, Output, Task, TaskError};
use crate::platform::{calc_usage, ContainerHandle, ExecOutput, ResourceUsage};
use crate::poll::{PollConfig, Poller};

/// Proxy for one container materialized by the cluster platform.
///
/// Owns exactly one [`Dispatcher`], created at bind time and stopped at
/// teardown. Idle detection is a heuristic: the process-name list is
/// compared against a baseline snapshot, so "idle" means "no process churn
/// since the baseline", not an actual load measurement.
pub struct RemoteUnit {
    id: String,
    addr: String,
    container: Arc<dyn ContainerHandle>,
    dispatcher: Dispatcher<ExecOutput>,
    baseline: Arc<RwLock<Vec<String>>>,
    settle_poll: PollConfig,
    usage_interval: Duration,
    stopped: AtomicBool,
    removed: AtomicBool,
}

/// Snapshot-equality idle check.
pub fn is_idle(baseline: &[String], current: &[String]) -> bool {
    baseline == current
}

impl RemoteUnit {
    /// Bind a dispatcher to a live container, capturing the baseline
    /// process snapshot.
    pub async fn bind(
        id: impl Into<String>,
        addr: impl Into<String>,
        container: Arc<dyn ContainerHandle>,
        config: &ManagerConfig,
    ) -> Result<Self> {
        let baseline = container.top().await?;
        Ok(Self {
            id: id.into(),
            addr: addr.into(),
            container,
            dispatcher: Dispatcher::new(config.max_workers),
            baseline: Arc::new(RwLock::new(baseline)),
            settle_poll: config.settle_poll.clone(),
            usage_interval: config.usage_interval,
            stopped: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Re-capture the baseline process snapshot.
    pub async fn set_idle(&self) -> Result<()> {
        let current = self.container.top().await?;
        *self.baseline.write().await = current;
        Ok(())
    }

    /// True iff the live process list matches the stored baseline.
    pub async fn idle(&self) -> Result<bool> {
        let current = self.container.top().await?;
        Ok(is_idle(&self.baseline.read().await, &current))
    }

    /// Wait for the process list to stop changing, re-baselining on every
    /// mismatch. Used right after deployment while the container starts up.
    pub async fn settle(&self) -> Result<()> {
        let mut poller = Poller::new(&self.settle_poll, format!("settling unit {}", self.id));
        loop {
            let current = self.container.top().await?;
            let mut baseline = self.baseline.write().await;
            if is_idle(&baseline, &current) {
                return Ok(());
            }
            *baseline = current;
            drop(baseline);
            poller.tick().await?;
        }
    }

    /// Cooperative poll until the unit reports idle.
    pub async fn wait(&self) -> Result<()> {
        let mut poller = Poller::new(&self.settle_poll, format!("waiting for unit {}", self.id));
        while !self.idle().await? {
            poller.tick().await?;
        }
        Ok(())
    }

    /// Enqueue `cmd` for execution once the unit is idle.
    ///
    /// Returns immediately; the command runs on the owned dispatcher, which
    /// polls the idle heuristic and then executes `cmd` in the container.
    /// The execution result lands in this unit's output history.
    pub fn submit(&self, cmd: &str) {
        let container = self.container.clone();
        let baseline = self.baseline.clone();
        let interval = self.settle_poll.interval;
        let command = cmd.to_string();
        let task = Task::future(async move {
            loop {
                let current = container.top().await.map_err(TaskError::failed)?;
                if is_idle(&baseline.read().await, &current) {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
            container.exec(&command).await.map_err(TaskError::failed)
        })
        .with_desc(cmd);
        self.dispatcher.submit(task);
    }

    /// Sample resource usage over the configured interval. Blocks the
    /// caller for that interval.
    pub async fn usage(&self) -> Result<ResourceUsage> {
        let pre = self.container.stats().await?;
        tokio::time::sleep(self.usage_interval).await;
        let post = self.container.stats().await?;
        Ok(calc_usage(&pre, &post))
    }

    pub fn dispatcher(&self) -> &Dispatcher<ExecOutput> {
        &self.dispatcher
    }

    pub async fn outputs(&self) -> Vec<Output<ExecOutput>> {
        self.dispatcher.history().await
    }

    pub async fn clear(&self) {
        self.dispatcher.clear().await;
    }

    /// Stop the dispatcher, then the backing container. Idempotent; platform
    /// failures are logged, not raised.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.dispatcher.stop().await;
        if let Err(e) = self.container.stop().await {
            tracing::warn!(unit = %self.id, error = %e, "failed to stop container");
        }
    }

    /// Stop the unit and request removal of the backing container. Safe to
    /// call after [`RemoteUnit::stop`] and under double-invocation.
    pub async fn remove(&self) {
        self.stop().await;
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.container.remove().await {
            tracing::warn!(unit = %self.id, error = %e, "failed to remove container");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_is_snapshot_equality() {
        let a = vec!["sh".to_string(), "sleep".to_string()];
        assert!(is_idle(&a, &a.clone()));

        let mut b = a.clone();
        b.push("python".to_string());
        assert!(!is_idle(&a, &b));

        // Order matters: the snapshot is positional, not a set.
        let reversed: Vec<String> = a.iter().rev().cloned().collect();
        assert!(!is_idle(&a, &reversed));
    }

    #[test]
    fn idle_on_empty_snapshots() {
        assert!(is_idle(&[], &[]));
        assert!(!is_idle(&[], &["sh".to_string()]));
    }
}
