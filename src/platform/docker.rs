//! Docker Engine HTTP API client.
//!
//! Talks to a daemon exposed over TCP (`http://host:2375` style), which is
//! also how remote cluster nodes are reached. Only the endpoints the
//! executor core needs are covered: swarm nodes, replicated services and
//! their tasks, images, and per-container top/stats/exec.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::{Result, SwarmError};
use crate::platform::{
    ClusterPlatform, ContainerHandle, ExecOutput, ImageSearchResult, NodeInfo, NodeState,
    ServiceInfo, ServiceSpec, ServiceTask, StatsSample, TaskState,
};

/// Client for one Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    http: reqwest::Client,
    base: Url,
}

impl DockerEngine {
    /// Build a client without probing the daemon.
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| SwarmError::Platform(format!("invalid daemon url {base}: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    /// Build a client and verify the daemon answers `/_ping`.
    pub async fn connect(base: &str) -> Result<Self> {
        let engine = Self::new(base)?;
        engine.ping().await?;
        Ok(engine)
    }

    /// Conventional TCP endpoint of a daemon on `addr`.
    pub fn tcp_url(addr: &str, port: u16) -> String {
        format!("http://{addr}:{port}")
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| SwarmError::Platform(format!("invalid endpoint {path}: {e}")))
    }

    async fn check(resp: Response) -> Result<Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(SwarmError::Platform(format!("{status}: {}", body.trim())))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.http.get(url).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, url: Url, body: &serde_json::Value) -> Result<T> {
        let resp = self.http.post(url).json(body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}

// ---- Engine API payloads ----

#[derive(Deserialize)]
struct NodeJson {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Status")]
    status: NodeStatusJson,
    #[serde(rename = "Description", default)]
    description: NodeDescriptionJson,
}

#[derive(Deserialize)]
struct NodeStatusJson {
    #[serde(rename = "State")]
    state: NodeState,
    #[serde(rename = "Addr", default)]
    addr: String,
}

#[derive(Deserialize, Default)]
struct NodeDescriptionJson {
    #[serde(rename = "Hostname", default)]
    hostname: String,
    #[serde(rename = "Platform", default)]
    platform: NodePlatformJson,
}

#[derive(Deserialize, Default)]
struct NodePlatformJson {
    #[serde(rename = "OS", default)]
    os: String,
    #[serde(rename = "Architecture", default)]
    architecture: String,
}

#[derive(Deserialize)]
struct InfoJson {
    #[serde(rename = "Swarm")]
    swarm: SwarmInfoJson,
}

#[derive(Deserialize)]
struct SwarmInfoJson {
    #[serde(rename = "NodeAddr", default)]
    node_addr: String,
}

#[derive(Deserialize)]
struct CreatedJson {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct ServiceJson {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Spec", default)]
    spec: ServiceSpecJson,
}

#[derive(Deserialize, Default)]
struct ServiceSpecJson {
    #[serde(rename = "Name", default)]
    name: String,
}

#[derive(Deserialize)]
struct TaskJson {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "NodeID", default)]
    node_id: Option<String>,
    #[serde(rename = "Status", default)]
    status: TaskStatusJson,
}

#[derive(Deserialize, Default)]
struct TaskStatusJson {
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Err", default)]
    err: Option<String>,
    #[serde(rename = "ContainerStatus", default)]
    container_status: Option<ContainerStatusJson>,
}

#[derive(Deserialize)]
struct ContainerStatusJson {
    #[serde(rename = "ContainerID", default)]
    container_id: String,
}

#[derive(Deserialize)]
struct ImageJson {
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct TopJson {
    #[serde(rename = "Titles", default)]
    titles: Vec<String>,
    #[serde(rename = "Processes", default)]
    processes: Vec<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct StatsJson {
    #[serde(default)]
    cpu_stats: CpuStatsJson,
    #[serde(default)]
    memory_stats: MemoryStatsJson,
}

#[derive(Deserialize, Default)]
struct CpuStatsJson {
    #[serde(default)]
    cpu_usage: CpuUsageJson,
    #[serde(default)]
    system_cpu_usage: u64,
    #[serde(default)]
    online_cpus: u32,
}

#[derive(Deserialize, Default)]
struct CpuUsageJson {
    #[serde(default)]
    total_usage: u64,
}

#[derive(Deserialize, Default)]
struct MemoryStatsJson {
    #[serde(default)]
    usage: u64,
    #[serde(default)]
    limit: u64,
}

#[derive(Deserialize)]
struct ExecInspectJson {
    #[serde(rename = "ExitCode", default)]
    exit_code: Option<i32>,
}

impl TaskJson {
    fn into_task(self) -> ServiceTask {
        let state = self
            .status
            .state
            .parse()
            .unwrap_or(TaskState::Other(String::new()));
        let container_id = self
            .status
            .container_status
            .map(|c| c.container_id)
            .filter(|id| !id.is_empty());
        ServiceTask {
            id: self.id,
            state,
            err: self.status.err.filter(|e| !e.is_empty()),
            node_id: self.node_id.filter(|n| !n.is_empty()),
            container_id,
        }
    }
}

/// Split a multiplexed attach stream into stdout and stderr.
///
/// Each frame is an 8-byte header (stream type, three zero bytes, big-endian
/// payload length) followed by the payload. Truncated trailing frames are
/// dropped.
pub(crate) fn demux_stream(buf: &[u8]) -> (String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut rest = buf;
    while rest.len() >= 8 {
        let stream = rest[0];
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        if rest.len() < 8 + len {
            break;
        }
        let payload = &rest[8..8 + len];
        match stream {
            2 => stderr.extend_from_slice(payload),
            _ => stdout.extend_from_slice(payload),
        }
        rest = &rest[8 + len..];
    }
    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}

#[async_trait]
impl ClusterPlatform for DockerEngine {
    async fn ping(&self) -> Result<()> {
        let resp = self.http.get(self.url("/_ping")?).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn local_addr(&self) -> Result<String> {
        let info: InfoJson = self.get_json(self.url("/info")?).await?;
        Ok(info.swarm.node_addr)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let nodes: Vec<NodeJson> = self.get_json(self.url("/nodes")?).await?;
        Ok(nodes
            .into_iter()
            .map(|n| NodeInfo {
                id: n.id,
                state: n.status.state,
                addr: n.status.addr,
                hostname: n.description.hostname,
                platform: format!(
                    "{}-{}",
                    n.description.platform.os, n.description.platform.architecture
                ),
            })
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<String>> {
        let images: Vec<ImageJson> = self.get_json(self.url("/images/json")?).await?;
        Ok(images
            .into_iter()
            .flat_map(|i| i.repo_tags.unwrap_or_default())
            .filter(|t| t != "<none>:<none>")
            .collect())
    }

    async fn pull_image(&self, image: &str, tag: &str) -> Result<()> {
        let mut url = self.url("/images/create")?;
        url.query_pairs_mut()
            .append_pair("fromImage", image)
            .append_pair("tag", tag);
        tracing::info!(image, tag, "pulling image");
        let resp = self.http.post(url).send().await?;
        // The body is a progress stream; drain it so the pull runs to
        // completion before returning.
        Self::check(resp).await?.bytes().await?;
        Ok(())
    }

    async fn search_images(&self, term: &str) -> Result<Vec<ImageSearchResult>> {
        let mut url = self.url("/images/search")?;
        url.query_pairs_mut().append_pair("term", term);
        self.get_json(url).await
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/images/{image}"))?)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceInfo> {
        let mounts: Vec<serde_json::Value> = spec
            .mounts
            .iter()
            .map(|(source, target)| {
                json!({ "Type": "bind", "Source": source, "Target": target })
            })
            .collect();
        let body = json!({
            "Name": spec.name,
            "TaskTemplate": {
                "ContainerSpec": {
                    "Image": spec.image,
                    "TTY": spec.tty,
                    "Mounts": mounts,
                }
            },
            "Mode": { "Replicated": { "Replicas": spec.replicas } },
        });
        let created: CreatedJson = self.post_json(self.url("/services/create")?, &body).await?;
        tracing::info!(service = %created.id, name = %spec.name, replicas = spec.replicas, "service created");
        Ok(ServiceInfo {
            id: created.id,
            name: spec.name.clone(),
        })
    }

    async fn list_services(&self) -> Result<Vec<ServiceInfo>> {
        let services: Vec<ServiceJson> = self.get_json(self.url("/services")?).await?;
        Ok(services
            .into_iter()
            .map(|s| ServiceInfo {
                id: s.id,
                name: s.spec.name,
            })
            .collect())
    }

    async fn remove_service(&self, id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/services/{id}"))?)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn service_tasks(&self, service_id: &str) -> Result<Vec<ServiceTask>> {
        let mut url = self.url("/tasks")?;
        let filters = json!({ "service": [service_id] }).to_string();
        url.query_pairs_mut().append_pair("filters", &filters);
        let tasks: Vec<TaskJson> = self.get_json(url).await?;
        Ok(tasks.into_iter().map(TaskJson::into_task).collect())
    }

    async fn container(&self, id: &str) -> Result<Arc<dyn ContainerHandle>> {
        Ok(Arc::new(DockerContainer {
            engine: self.clone(),
            id: id.to_string(),
        }))
    }

    async fn connect_peer(&self, addr: &str, port: u16) -> Result<Arc<dyn ClusterPlatform>> {
        let engine = Self::connect(&Self::tcp_url(addr, port))
            .await
            .map_err(|e| SwarmError::NodeUnreachable {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(engine))
    }
}

/// Engine-backed [`ContainerHandle`].
pub struct DockerContainer {
    engine: DockerEngine,
    id: String,
}

#[async_trait]
impl ContainerHandle for DockerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn top(&self) -> Result<Vec<String>> {
        let mut url = self.engine.url(&format!("/containers/{}/top", self.id))?;
        url.query_pairs_mut().append_pair("ps_args", "-eo comm");
        let top: TopJson = self.engine.get_json(url).await?;
        // The command column is last with the args above, but resolve it
        // from the titles in case the daemon rewrites them.
        let col = top
            .titles
            .iter()
            .position(|t| t == "COMM" || t == "COMMAND" || t == "CMD")
            .unwrap_or(top.titles.len().saturating_sub(1));
        Ok(top
            .processes
            .into_iter()
            .filter_map(|row| row.get(col).cloned())
            .collect())
    }

    async fn stats(&self) -> Result<StatsSample> {
        let mut url = self.engine.url(&format!("/containers/{}/stats", self.id))?;
        url.query_pairs_mut()
            .append_pair("stream", "false")
            .append_pair("one-shot", "true");
        let stats: StatsJson = self.engine.get_json(url).await?;
        Ok(StatsSample {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            cpu_system: stats.cpu_stats.system_cpu_usage,
            online_cpus: stats.cpu_stats.online_cpus,
            mem_usage: stats.memory_stats.usage,
            mem_limit: stats.memory_stats.limit,
        })
    }

    async fn exec(&self, cmd: &str) -> Result<ExecOutput> {
        let create_body = json!({
            "AttachStdout": true,
            "AttachStderr": true,
            "Cmd": ["sh", "-c", cmd],
        });
        let created: CreatedJson = self
            .engine
            .post_json(
                self.engine.url(&format!("/containers/{}/exec", self.id))?,
                &create_body,
            )
            .await?;

        // Starting without detach blocks until the command finishes and
        // returns the multiplexed output stream.
        let start_body = json!({ "Detach": false, "Tty": false });
        let resp = self
            .engine
            .http
            .post(self.engine.url(&format!("/exec/{}/start", created.id))?)
            .json(&start_body)
            .send()
            .await?;
        let raw = DockerEngine::check(resp).await?.bytes().await?;
        let (stdout, stderr) = demux_stream(&raw);

        let inspect: ExecInspectJson = self
            .engine
            .get_json(self.engine.url(&format!("/exec/{}/json", created.id))?)
            .await?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code,
            stdout,
            stderr,
        })
    }

    async fn stop(&self) -> Result<()> {
        let resp = self
            .engine
            .http
            .post(self.engine.url(&format!("/containers/{}/stop", self.id))?)
            .send()
            .await?;
        DockerEngine::check(resp).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let mut url = self.engine.url(&format!("/containers/{}", self.id))?;
        url.query_pairs_mut().append_pair("force", "true");
        let resp = self.engine.http.delete(url).send().await?;
        DockerEngine::check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn demux_splits_stdout_and_stderr() {
        let mut buf = frame(1, b"hello ");
        buf.extend(frame(2, b"oops\n"));
        buf.extend(frame(1, b"world\n"));
        let (stdout, stderr) = demux_stream(&buf);
        assert_eq!(stdout, "hello world\n");
        assert_eq!(stderr, "oops\n");
    }

    #[test]
    fn demux_drops_truncated_frame() {
        let mut buf = frame(1, b"ok");
        buf.extend([1, 0, 0, 0, 0, 0, 0, 99]); // claims 99 bytes, has none
        let (stdout, stderr) = demux_stream(&buf);
        assert_eq!(stdout, "ok");
        assert!(stderr.is_empty());
    }

    #[test]
    fn demux_empty_stream() {
        let (stdout, stderr) = demux_stream(&[]);
        assert!(stdout.is_empty());
        assert!(stderr.is_empty());
    }

    #[test]
    fn task_json_maps_empty_fields_to_none() {
        let task = TaskJson {
            id: "t1".into(),
            node_id: Some(String::new()),
            status: TaskStatusJson {
                state: "running".into(),
                err: Some(String::new()),
                container_status: Some(ContainerStatusJson {
                    container_id: String::new(),
                }),
            },
        }
        .into_task();
        assert_eq!(task.state, TaskState::Running);
        assert!(task.node_id.is_none());
        assert!(task.err.is_none());
        assert!(task.container_id.is_none());
    }

    #[test]
    fn tcp_url_format() {
        assert_eq!(DockerEngine::tcp_url("10.0.0.7", 2375), "http://10.0.0.7:2375");
    }
}
