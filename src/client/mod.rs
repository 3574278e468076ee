//! Media-server control API
//!
//! `MediaServer` is the seam between session orchestration and a concrete
//! media server. Objects (pipelines, endpoints) are addressed by the opaque
//! ids the server hands out.

pub mod kurento;

#[cfg(test)]
pub mod mock;

pub use kurento::KurentoClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    Closed,

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Subset of the server manager's `getInfo` result
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    #[serde(default)]
    pub version: String,

    #[serde(default, rename = "type")]
    pub server_type: String,

    #[serde(default)]
    pub capabilities: Vec<String>,
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait MediaServer: Send + Sync {
    async fn create_pipeline(&self) -> Result<String, ClientError>;

    async fn create_rtp_endpoint(&self, pipeline: &str) -> Result<String, ClientError>;

    async fn create_webrtc_endpoint(&self, pipeline: &str) -> Result<String, ClientError>;

    /// Route media from `source` into `sink`
    async fn connect(&self, source: &str, sink: &str) -> Result<(), ClientError>;

    async fn generate_offer(&self, endpoint: &str) -> Result<String, ClientError>;

    async fn process_offer(&self, endpoint: &str, offer: &str) -> Result<String, ClientError>;

    async fn process_answer(&self, endpoint: &str, answer: &str) -> Result<String, ClientError>;

    async fn gather_candidates(&self, endpoint: &str) -> Result<(), ClientError>;

    async fn release(&self, object: &str) -> Result<(), ClientError>;

    async fn server_info(&self) -> Result<ServerInfo, ClientError>;
}
