//! Cluster platform interface.
//!
//! The manager and registry never talk to Docker directly; they go through
//! [`ClusterPlatform`] and [`ContainerHandle`], so the provisioning state
//! machine can be driven by the real Engine API client ([`DockerEngine`])
//! or by a scripted mock in tests.

pub mod docker;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;

pub use docker::DockerEngine;

/// Swarm-reported state of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Unknown,
    Down,
    Ready,
    Disconnected,
}

/// One machine in the cluster.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: String,
    pub state: NodeState,
    /// Swarm-advertised address of the node.
    pub addr: String,
    pub hostname: String,
    /// `os-architecture` tag, e.g. `linux-x86_64`.
    pub platform: String,
}

/// State of one service task as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    New,
    Pending,
    Assigned,
    Accepted,
    Preparing,
    Starting,
    Running,
    Complete,
    Failed,
    Rejected,
    Shutdown,
    Other(String),
}

impl FromStr for TaskState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "new" => TaskState::New,
            "pending" => TaskState::Pending,
            "assigned" => TaskState::Assigned,
            "accepted" => TaskState::Accepted,
            "preparing" => TaskState::Preparing,
            "starting" => TaskState::Starting,
            "running" => TaskState::Running,
            "complete" => TaskState::Complete,
            "failed" => TaskState::Failed,
            "rejected" => TaskState::Rejected,
            "shutdown" => TaskState::Shutdown,
            other => TaskState::Other(other.to_string()),
        })
    }
}

/// One unit of a replicated service: the platform's record of where a
/// container should run and how far it has come.
#[derive(Debug, Clone)]
pub struct ServiceTask {
    pub id: String,
    pub state: TaskState,
    /// Platform-reported error, set for rejected tasks.
    pub err: Option<String>,
    pub node_id: Option<String>,
    /// Present once the backing container has materialized.
    pub container_id: Option<String>,
}

/// Request to create a replicated service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub image: String,
    pub name: String,
    pub replicas: u64,
    /// `(source, target)` bind mounts.
    pub mounts: Vec<(String, String)>,
    pub tty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
}

/// One registry hit from an image search.
///
/// Field names follow the Engine API response, which serves them in
/// snake case.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageSearchResult {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub star_count: u64,
    #[serde(default)]
    pub is_official: bool,
}

/// Raw resource counters from one stats snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSample {
    /// Cumulative container CPU time.
    pub cpu_total: u64,
    /// Cumulative host CPU time.
    pub cpu_system: u64,
    pub online_cpus: u32,
    pub mem_usage: u64,
    pub mem_limit: u64,
}

/// Percentages computed from two [`StatsSample`]s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    /// CPU percent, scaled by online CPU count (100 per CPU).
    pub cpu_percent: f64,
    /// Memory percent of the container limit.
    pub mem_percent: f64,
}

/// Compute usage percentages from two samples taken a short interval apart.
pub fn calc_usage(pre: &StatsSample, post: &StatsSample) -> ResourceUsage {
    let delta_total = post.cpu_total.saturating_sub(pre.cpu_total);
    let delta_system = post.cpu_system.saturating_sub(pre.cpu_system);
    let cpu_percent = if delta_system == 0 {
        0.0
    } else {
        delta_total as f64 / delta_system as f64 * f64::from(post.online_cpus) * 100.0
    };
    let mem_percent = if post.mem_limit == 0 {
        0.0
    } else {
        post.mem_usage as f64 / post.mem_limit as f64 * 100.0
    };
    ResourceUsage {
        cpu_percent,
        mem_percent,
    }
}

/// Captured result of running a command inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A live container on some node.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Names of the processes currently running in the container.
    async fn top(&self) -> Result<Vec<String>>;

    /// One raw resource snapshot.
    async fn stats(&self) -> Result<StatsSample>;

    /// Run a shell command to completion and capture its output.
    async fn exec(&self, cmd: &str) -> Result<ExecOutput>;

    async fn stop(&self) -> Result<()>;

    async fn remove(&self) -> Result<()>;
}

/// Client handle to one cluster daemon (local or remote).
#[async_trait]
pub trait ClusterPlatform: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Swarm-advertised address of the daemon this client talks to.
    async fn local_addr(&self) -> Result<String>;

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Installed images as `name:tag` strings.
    async fn list_images(&self) -> Result<Vec<String>>;

    async fn pull_image(&self, image: &str, tag: &str) -> Result<()>;

    /// Query the daemon's registry index for images matching `term`.
    async fn search_images(&self, term: &str) -> Result<Vec<ImageSearchResult>>;

    async fn remove_image(&self, image: &str) -> Result<()>;

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceInfo>;

    async fn list_services(&self) -> Result<Vec<ServiceInfo>>;

    async fn remove_service(&self, id: &str) -> Result<()>;

    async fn service_tasks(&self, service_id: &str) -> Result<Vec<ServiceTask>>;

    async fn container(&self, id: &str) -> Result<Arc<dyn ContainerHandle>>;

    /// Dial the daemon on another node.
    async fn connect_peer(&self, addr: &str, port: u16) -> Result<Arc<dyn ClusterPlatform>>;
}
