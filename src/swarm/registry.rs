use std::sync::Arc;

use crate::error::Result;
use crate::platform::{ClusterPlatform, NodeInfo, NodeState};

/// One cluster node plus the client handle used to reach its daemon.
///
/// `client` stays `None` for nodes that are not ready or whose daemon could
/// not be reached; such nodes remain listed but cannot host work.
pub struct Node {
    pub info: NodeInfo,
    pub client: Option<Arc<dyn ClusterPlatform>>,
}

impl Node {
    pub fn is_ready(&self) -> bool {
        self.info.state == NodeState::Ready
    }

    pub fn is_reachable(&self) -> bool {
        self.is_ready() && self.client.is_some()
    }
}

/// Registry of cluster nodes, rebuilt wholesale on every refresh.
pub struct NodeRegistry {
    platform: Arc<dyn ClusterPlatform>,
    remote_port: u16,
    nodes: Vec<Node>,
}

impl NodeRegistry {
    pub fn new(platform: Arc<dyn ClusterPlatform>, remote_port: u16) -> Self {
        Self {
            platform,
            remote_port,
            nodes: Vec::new(),
        }
    }

    /// Replace the node set from a fresh platform listing. Ready nodes on
    /// the same host reuse the manager's client; other ready nodes are
    /// dialed directly, and a failed dial leaves the node clientless with a
    /// diagnostic.
    pub async fn refresh(&mut self) -> Result<()> {
        let local_addr = self.platform.local_addr().await?;
        let infos = self.platform.list_nodes().await?;
        let mut nodes = Vec::with_capacity(infos.len());

        for info in infos {
            let client = if info.state != NodeState::Ready {
                None
            } else if info.addr == local_addr {
                Some(self.platform.clone())
            } else {
                match self.platform.connect_peer(&info.addr, self.remote_port).await {
                    Ok(client) => Some(client),
                    Err(e) => {
                        tracing::warn!(
                            node = %info.hostname,
                            addr = %info.addr,
                            error = %e,
                            "node unreachable, excluded from placement"
                        );
                        None
                    }
                }
            };
            nodes.push(Node { info, client });
        }

        tracing::info!(
            nodes = nodes.len(),
            reachable = nodes.iter().filter(|n| n.is_reachable()).count(),
            "node registry refreshed"
        );
        self.nodes = nodes;
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn ready_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_ready())
    }

    pub fn reachable_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_reachable())
    }

    pub fn find(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.info.id == node_id)
    }

    /// True iff every reachable ready node has the image installed.
    ///
    /// `image` may carry its own `name:tag`; otherwise `tag` applies,
    /// defaulting to `latest`.
    pub async fn is_installed(&self, image: &str, tag: Option<&str>) -> Result<bool> {
        let (name, tag) = split_image(image, tag);
        for node in self.reachable_nodes() {
            if let Some(client) = &node.client {
                let installed = client.list_images().await?;
                if !image_matches(&installed, &name, &tag) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Pull an image on every reachable ready node.
    pub async fn pull(&self, image: &str, tag: Option<&str>) -> Result<()> {
        let (name, tag) = split_image(image, tag);
        for node in self.reachable_nodes() {
            if let Some(client) = &node.client {
                tracing::info!(node = %node.info.hostname, image = %name, tag = %tag, "pulling image on node");
                client.pull_image(&name, &tag).await?;
            }
        }
        Ok(())
    }
}

/// Resolve `name[:tag]` plus an optional explicit tag into `(name, tag)`,
/// defaulting the tag to `latest`.
fn split_image(image: &str, tag: Option<&str>) -> (String, String) {
    match image.split_once(':') {
        Some((name, tag)) => (name.to_string(), tag.to_string()),
        None => (
            image.to_string(),
            tag.unwrap_or("latest").to_string(),
        ),
    }
}

/// Check an installed `name:tag` list for a match.
fn image_matches(installed: &[String], name: &str, tag: &str) -> bool {
    installed.iter().any(|entry| {
        match entry.split_once(':') {
            Some((entry_name, entry_tag)) => entry_name == name && entry_tag == tag,
            None => entry == name,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_image_prefers_inline_tag() {
        assert_eq!(
            split_image("alpine:3.19", Some("latest")),
            ("alpine".to_string(), "3.19".to_string())
        );
    }

    #[test]
    fn split_image_defaults_to_latest() {
        assert_eq!(
            split_image("alpine", None),
            ("alpine".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_image("alpine", Some("edge")),
            ("alpine".to_string(), "edge".to_string())
        );
    }

    #[test]
    fn image_matches_name_and_tag() {
        let installed = vec!["alpine:latest".to_string(), "ubuntu:22.04".to_string()];
        assert!(image_matches(&installed, "alpine", "latest"));
        assert!(image_matches(&installed, "ubuntu", "22.04"));
        assert!(!image_matches(&installed, "alpine", "3.19"));
        assert!(!image_matches(&installed, "debian", "latest"));
    }
}
