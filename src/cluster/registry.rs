//! Configured media servers
//!
//! The registry is built once at startup and never changes afterwards. It
//! tolerates a missing master at construction so that a misconfiguration is
//! reported by `master_node()` before any session touches a server.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::handle::MediaServerHandle;
use crate::client::{KurentoClient, MediaServer};
use crate::config::{KmsSettings, ServerOptions};
use crate::error::{FanoutError, FanoutResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Master,
    Slave,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Slave => write!(f, "slave"),
        }
    }
}

/// A media-processing node
#[derive(Debug, Clone)]
pub struct Node {
    pub role: NodeRole,
    pub handle: MediaServerHandle,
}

impl Node {
    pub fn new(role: NodeRole, handle: MediaServerHandle) -> Self {
        Self { role, handle }
    }

    pub fn master(handle: MediaServerHandle) -> Self {
        Self::new(NodeRole::Master, handle)
    }

    pub fn slave(handle: MediaServerHandle) -> Self {
        Self::new(NodeRole::Slave, handle)
    }

    pub fn id(&self) -> &str {
        self.handle.node_id()
    }

    pub fn ip(&self) -> &str {
        self.handle.ip()
    }

    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }
}

#[derive(Debug, Clone)]
pub struct ServerRegistry {
    nodes: Vec<Node>,
}

impl ServerRegistry {
    /// Build a registry from already-connected nodes.
    ///
    /// Fails on duplicate node ids or more than one master.
    pub fn new(nodes: Vec<Node>) -> FanoutResult<Self> {
        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.id()) {
                return Err(FanoutError::Configuration(format!(
                    "duplicate media server id '{}'",
                    node.id()
                )));
            }
        }

        let masters = nodes.iter().filter(|n| n.is_master()).count();
        if masters > 1 {
            return Err(FanoutError::Configuration(format!(
                "{} media servers are marked master, expected one",
                masters
            )));
        }

        Ok(Self { nodes })
    }

    /// Open a Kurento control channel to every configured server
    pub async fn connect(settings: &KmsSettings) -> FanoutResult<Self> {
        let timeout = settings.call_timeout();
        let nodes = try_join_all(settings.servers.iter().map(|opts| async move {
            let client = tokio::time::timeout(timeout, KurentoClient::connect(&opts.url))
                .await
                .map_err(|_| {
                    FanoutError::unavailable(
                        opts.id(),
                        format!("connect timed out after {:?}", timeout),
                    )
                })?
                .map_err(|e| FanoutError::unavailable(opts.id(), e))?;
            Ok::<_, FanoutError>(node_from_options(opts, Arc::new(client), settings))
        }))
        .await?;

        info!("Connected to {} media servers", nodes.len());
        Self::new(nodes)
    }

    pub fn master_node(&self) -> FanoutResult<&Node> {
        self.nodes
            .iter()
            .find(|n| n.is_master())
            .ok_or_else(|| {
                FanoutError::Configuration("no master media server configured".to_string())
            })
    }

    /// Slave nodes in configuration order
    pub fn slave_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| !n.is_master()).collect()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Wrap a connected server as a node described by `opts`
pub fn node_from_options(
    opts: &ServerOptions,
    server: Arc<dyn MediaServer>,
    settings: &KmsSettings,
) -> Node {
    let role = if opts.master {
        NodeRole::Master
    } else {
        NodeRole::Slave
    };
    let handle = MediaServerHandle::new(opts.id(), &opts.ip, server)
        .with_call_timeout(settings.call_timeout());
    Node::new(role, handle)
}
