use std::sync::Arc;

use crate::config::{BindMount, ManagerConfig};
use crate::error::{Result, SwarmError};
use crate::exec::Output;
use crate::platform::{
    ClusterPlatform, ExecOutput, ImageSearchResult, ServiceInfo, ServiceSpec, TaskState,
};
use crate::poll::Poller;
use crate::swarm::registry::NodeRegistry;
use crate::swarm::unit::RemoteUnit;

/// Outcome of one provisioning attempt.
///
/// Tasks whose node was unreachable at bind time are skipped without
/// failing the call; their ids are listed in `unbound` so callers can
/// detect partial deployments instead of diffing replica counts.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub service: ServiceInfo,
    pub requested: u64,
    pub bound: usize,
    pub unbound: Vec<String>,
}

impl ProvisionReport {
    pub fn is_complete(&self) -> bool {
        self.unbound.is_empty() && self.bound as u64 == self.requested
    }
}

/// Orchestrates a replicated service across the cluster.
///
/// Discovers nodes, provisions the service, waits the platform's task state
/// machine through to live containers, and binds one [`RemoteUnit`] (each
/// with its own dispatcher) per container. The manager itself runs
/// single-threaded; all parallelism lives in the per-unit dispatchers.
///
/// Teardown is explicit: call [`ClusterManager::remove_service`]. Dropping
/// the manager does not stop the service.
pub struct ClusterManager {
    platform: Arc<dyn ClusterPlatform>,
    config: ManagerConfig,
    registry: NodeRegistry,
    service: Option<ServiceInfo>,
    units: Vec<RemoteUnit>,
}

impl ClusterManager {
    /// Build a manager on an existing platform client and run the initial
    /// node discovery.
    pub async fn new(platform: Arc<dyn ClusterPlatform>, config: ManagerConfig) -> Result<Self> {
        let mut registry = NodeRegistry::new(platform.clone(), config.remote_port);
        registry.refresh().await?;
        Ok(Self {
            platform,
            config,
            registry,
            service: None,
            units: Vec::new(),
        })
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn service(&self) -> Option<&ServiceInfo> {
        self.service.as_ref()
    }

    pub fn units(&self) -> &[RemoteUnit] {
        &self.units
    }

    pub fn unit(&self, index: usize) -> Option<&RemoteUnit> {
        self.units.get(index)
    }

    /// Add a manager-level bind mount applied to future services.
    pub fn add_mount(&mut self, mount: BindMount) {
        if !self.config.mounts.contains(&mount) {
            self.config.mounts.push(mount);
        }
    }

    pub fn remove_mount(&mut self, source: &std::path::Path) {
        self.config.mounts.retain(|m| m.source != source);
    }

    /// Provision a replicated service and bind one unit per live container.
    ///
    /// Any service this manager already owns is torn down first, as is any
    /// other cluster-visible service with the same name. A task rejected by
    /// the platform fails the whole call with
    /// [`SwarmError::ServiceRejected`] and leaves no units bound; tasks on
    /// unreachable nodes are skipped and reported via the returned
    /// [`ProvisionReport`].
    pub async fn create_service(
        &mut self,
        image: &str,
        name: &str,
        replicas: u64,
        mounts: &[BindMount],
    ) -> Result<ProvisionReport> {
        if self.service.is_some() {
            self.remove_service().await;
        }
        self.remove_background_services(Some(name)).await;
        self.registry.refresh().await?;

        // One mount per target: a call-level mount for an already-claimed
        // target replaces the manager-level source.
        let mut all_mounts: Vec<(String, String)> = Vec::new();
        for mount in self.config.mounts.iter().chain(mounts) {
            let source = mount.source.to_string_lossy().into_owned();
            let target = mount.target.to_string_lossy().into_owned();
            match all_mounts.iter_mut().find(|(_, t)| *t == target) {
                Some(entry) => entry.0 = source,
                None => all_mounts.push((source, target)),
            }
        }

        let spec = ServiceSpec {
            image: image.to_string(),
            name: name.to_string(),
            replicas,
            mounts: all_mounts,
            tty: true,
        };
        let service = self.platform.create_service(&spec).await?;
        // Recorded before the waits so a failed attempt can still be torn
        // down by remove_service.
        self.service = Some(service.clone());

        self.wait_assignment(&service).await?;
        self.wait_active(&service).await?;
        let unbound = self.bind_units(&service).await?;

        let report = ProvisionReport {
            service,
            requested: replicas,
            bound: self.units.len(),
            unbound,
        };
        if !report.is_complete() {
            tracing::warn!(
                requested = report.requested,
                bound = report.bound,
                unbound = ?report.unbound,
                "service bound partially"
            );
        }
        Ok(report)
    }

    /// WAITING_ASSIGNMENT: poll until no task sits in the scheduler's
    /// "assigned" state; a rejection anywhere fails the attempt.
    async fn wait_assignment(&self, service: &ServiceInfo) -> Result<()> {
        let mut poller = Poller::new(&self.config.assignment_poll, "waiting for task assignment");
        loop {
            let tasks = self.platform.service_tasks(&service.id).await?;
            if let Some(rejected) = tasks.iter().find(|t| t.state == TaskState::Rejected) {
                let err = rejected
                    .err
                    .clone()
                    .unwrap_or_else(|| "unspecified platform error".to_string());
                return Err(SwarmError::ServiceRejected(err));
            }
            if !tasks.is_empty() && tasks.iter().all(|t| t.state != TaskState::Assigned) {
                return Ok(());
            }
            poller.tick().await?;
        }
    }

    /// WAITING_ACTIVE: poll until every task reports a backing container.
    /// Unbounded by default; set a deadline on `activation_poll` to cap a
    /// stuck deployment.
    async fn wait_active(&self, service: &ServiceInfo) -> Result<()> {
        tracing::info!(service = %service.name, "waiting until service is active");
        let mut poller = Poller::new(&self.config.activation_poll, "waiting for live containers");
        loop {
            let tasks = self.platform.service_tasks(&service.id).await?;
            if let Some(rejected) = tasks.iter().find(|t| t.state == TaskState::Rejected) {
                let err = rejected
                    .err
                    .clone()
                    .unwrap_or_else(|| "unspecified platform error".to_string());
                return Err(SwarmError::ServiceRejected(err));
            }
            if !tasks.is_empty() && tasks.iter().all(|t| t.container_id.is_some()) {
                return Ok(());
            }
            poller.tick().await?;
        }
    }

    /// BOUND: resolve each task's node, fetch its container, and bind a
    /// settled unit. Returns the ids of tasks that could not be bound.
    async fn bind_units(&mut self, service: &ServiceInfo) -> Result<Vec<String>> {
        let mut unbound = Vec::new();
        for task in self.platform.service_tasks(&service.id).await? {
            let Some(container_id) = &task.container_id else {
                unbound.push(task.id.clone());
                continue;
            };
            let node = match task.node_id.as_deref() {
                Some(id) => self.registry.find(id),
                None => None,
            };
            let Some(node) = node else {
                tracing::warn!(task = %task.id, "task assigned to unknown node, skipping");
                unbound.push(task.id.clone());
                continue;
            };
            let hostname = node.info.hostname.clone();
            let node_addr = node.info.addr.clone();
            let Some(client) = node.client.clone() else {
                tracing::warn!(
                    task = %task.id,
                    node = %hostname,
                    "task on unreachable node, skipping"
                );
                unbound.push(task.id.clone());
                continue;
            };

            let container = client.container(container_id).await?;
            let unit =
                RemoteUnit::bind(container_id.clone(), node_addr, container, &self.config).await?;
            // Fresh deployments churn processes while the entrypoint comes
            // up; wait for the snapshot to stabilize before exposing the
            // unit.
            unit.settle().await?;
            tracing::info!(unit = %unit.id(), node = %hostname, "unit bound");
            self.units.push(unit);
        }
        Ok(unbound)
    }

    /// Tear down: drain and stop every bound unit, then remove the platform
    /// service. Always safe to call, with or without an owned service.
    pub async fn remove_service(&mut self) {
        for unit in self.units.drain(..) {
            unit.stop().await;
        }
        if let Some(service) = self.service.take() {
            tracing::info!(service = %service.name, "removing service");
            if let Err(e) = self.platform.remove_service(&service.id).await {
                tracing::warn!(service = %service.name, error = %e, "failed to remove service");
            }
        }
    }

    /// Remove cluster-visible services other than the one this manager
    /// owns, optionally restricted to a given name.
    pub async fn remove_background_services(&self, name: Option<&str>) {
        let services = match self.platform.list_services().await {
            Ok(services) => services,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list services");
                return;
            }
        };
        let own_id = self.service.as_ref().map(|s| s.id.as_str());
        for service in services {
            if Some(service.id.as_str()) == own_id {
                continue;
            }
            if name.is_some_and(|n| n != service.name) {
                continue;
            }
            tracing::info!(service = %service.name, "terminating background service");
            if let Err(e) = self.platform.remove_service(&service.id).await {
                tracing::warn!(service = %service.name, error = %e, "failed to remove background service");
            }
        }
    }

    /// All unit histories, in unit-registration order then per-unit
    /// completion order.
    pub async fn outputs(&self) -> Vec<Output<ExecOutput>> {
        let mut outputs = Vec::new();
        for unit in &self.units {
            outputs.extend(unit.outputs().await);
        }
        outputs
    }

    pub async fn is_installed(&self, image: &str, tag: Option<&str>) -> Result<bool> {
        self.registry.is_installed(image, tag).await
    }

    pub async fn pull(&self, image: &str, tag: Option<&str>) -> Result<()> {
        self.registry.pull(image, tag).await
    }

    /// Query the image registry through the manager's own daemon.
    pub async fn search(&self, term: &str) -> Result<Vec<ImageSearchResult>> {
        self.platform.search_images(term).await
    }

    /// Rebuild the node registry from a fresh platform listing.
    pub async fn refresh_nodes(&mut self) -> Result<()> {
        self.registry.refresh().await
    }
}
