//! Per-node capability wrapper
//!
//! `MediaServerHandle` binds a `MediaServer` to the node it talks to and puts
//! a timeout on every remote call. Pipelines and endpoints carry a clone of
//! the handle of the node that owns them, so operations on them always reach
//! the right server.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::client::{ClientError, MediaServer, ServerInfo};
use crate::error::{FanoutError, FanoutResult};

/// Default upper bound for one remote call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct MediaServerHandle {
    node_id: String,
    ip: String,
    server: Arc<dyn MediaServer>,
    call_timeout: Duration,
}

impl fmt::Debug for MediaServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaServerHandle")
            .field("node_id", &self.node_id)
            .field("ip", &self.ip)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl MediaServerHandle {
    pub fn new(
        node_id: impl Into<String>,
        ip: impl Into<String>,
        server: Arc<dyn MediaServer>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            ip: ip.into(),
            server,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    async fn call<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        debug!("{} on {}", op, self.node_id);
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Transport(format!(
                "{} timed out after {:?}",
                op, self.call_timeout
            ))),
        }
    }

    fn unavailable(&self, op: &str, e: ClientError) -> FanoutError {
        FanoutError::unavailable(&self.node_id, format!("{}: {}", op, e))
    }

    /// Rejections reported by the server are negotiation failures; anything
    /// else means the node could not be reached.
    fn negotiation(&self, op: &str, e: ClientError) -> FanoutError {
        match e {
            ClientError::Rpc { .. } => {
                FanoutError::negotiation(&self.node_id, format!("{}: {}", op, e))
            }
            other => self.unavailable(op, other),
        }
    }

    fn ensure_local(&self, element: &dyn MediaElement) -> FanoutResult<()> {
        if element.node_id() != self.node_id {
            return Err(FanoutError::Configuration(format!(
                "element {} lives on '{}', not on '{}'",
                element.id(),
                element.node_id(),
                self.node_id
            )));
        }
        Ok(())
    }

    pub async fn create_pipeline(&self) -> FanoutResult<Pipeline> {
        let id = self
            .call("create_pipeline", self.server.create_pipeline())
            .await
            .map_err(|e| self.unavailable("create_pipeline", e))?;
        Ok(Pipeline {
            id,
            handle: self.clone(),
        })
    }

    pub async fn create_rtp_endpoint(&self, pipeline: &Pipeline) -> FanoutResult<RtpEndpoint> {
        self.ensure_local(pipeline)?;
        let id = self
            .call(
                "create_rtp_endpoint",
                self.server.create_rtp_endpoint(pipeline.id()),
            )
            .await
            .map_err(|e| self.unavailable("create_rtp_endpoint", e))?;
        Ok(RtpEndpoint {
            id,
            handle: self.clone(),
        })
    }

    pub async fn create_webrtc_endpoint(
        &self,
        pipeline: &Pipeline,
    ) -> FanoutResult<WebRtcEndpoint> {
        self.ensure_local(pipeline)?;
        let id = self
            .call(
                "create_webrtc_endpoint",
                self.server.create_webrtc_endpoint(pipeline.id()),
            )
            .await
            .map_err(|e| self.unavailable("create_webrtc_endpoint", e))?;
        Ok(WebRtcEndpoint {
            id,
            handle: self.clone(),
        })
    }

    async fn connect(
        &self,
        source: &dyn MediaElement,
        sink: &dyn MediaElement,
    ) -> FanoutResult<()> {
        self.ensure_local(sink)?;
        self.call("connect", self.server.connect(source.id(), sink.id()))
            .await
            .map_err(|e| self.unavailable("connect", e))
    }

    async fn generate_offer(&self, endpoint: &str) -> FanoutResult<String> {
        self.call("generate_offer", self.server.generate_offer(endpoint))
            .await
            .map_err(|e| self.negotiation("generate_offer", e))
    }

    async fn process_offer(&self, endpoint: &str, offer: &str) -> FanoutResult<String> {
        self.call("process_offer", self.server.process_offer(endpoint, offer))
            .await
            .map_err(|e| self.negotiation("process_offer", e))
    }

    async fn process_answer(&self, endpoint: &str, answer: &str) -> FanoutResult<String> {
        self.call("process_answer", self.server.process_answer(endpoint, answer))
            .await
            .map_err(|e| self.negotiation("process_answer", e))
    }

    async fn gather_candidates(&self, endpoint: &str) -> FanoutResult<()> {
        self.call("gather_candidates", self.server.gather_candidates(endpoint))
            .await
            .map_err(|e| self.unavailable("gather_candidates", e))
    }

    async fn release(&self, object: &str) -> FanoutResult<()> {
        self.call("release", self.server.release(object))
            .await
            .map_err(|e| self.unavailable("release", e))
    }

    pub async fn server_info(&self) -> FanoutResult<ServerInfo> {
        self.call("server_info", self.server.server_info())
            .await
            .map_err(|e| self.unavailable("server_info", e))
    }
}

/// Anything addressable on a media server
pub trait MediaElement: Send + Sync {
    fn id(&self) -> &str;

    fn handle(&self) -> &MediaServerHandle;

    fn node_id(&self) -> &str {
        self.handle().node_id()
    }
}

/// A media pipeline owned by one node
#[derive(Debug, Clone)]
pub struct Pipeline {
    id: String,
    handle: MediaServerHandle,
}

impl MediaElement for Pipeline {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&self) -> &MediaServerHandle {
        &self.handle
    }
}

impl Pipeline {
    /// Release the pipeline together with every element inside it
    pub async fn release(&self) -> FanoutResult<()> {
        self.handle.release(&self.id).await
    }
}

/// An RTP endpoint, used to relay media between two nodes
#[derive(Debug, Clone)]
pub struct RtpEndpoint {
    id: String,
    handle: MediaServerHandle,
}

impl MediaElement for RtpEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&self) -> &MediaServerHandle {
        &self.handle
    }
}

impl RtpEndpoint {
    pub async fn generate_offer(&self) -> FanoutResult<String> {
        self.handle.generate_offer(&self.id).await
    }

    pub async fn process_offer(&self, offer: &str) -> FanoutResult<String> {
        self.handle.process_offer(&self.id, offer).await
    }

    pub async fn process_answer(&self, answer: &str) -> FanoutResult<String> {
        self.handle.process_answer(&self.id, answer).await
    }

    /// Send this endpoint's media into `sink`, which must live on the same node
    pub async fn connect(&self, sink: &dyn MediaElement) -> FanoutResult<()> {
        self.handle.connect(self, sink).await
    }

    pub async fn release(&self) -> FanoutResult<()> {
        self.handle.release(&self.id).await
    }
}

/// A client-facing WebRTC endpoint.
///
/// The caller owns it: negotiate with the client through `process_offer` and
/// `gather_candidates`, and `release` it when the client leaves.
#[derive(Debug, Clone)]
pub struct WebRtcEndpoint {
    id: String,
    handle: MediaServerHandle,
}

impl MediaElement for WebRtcEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&self) -> &MediaServerHandle {
        &self.handle
    }
}

impl WebRtcEndpoint {
    /// Process the client's SDP offer, returning the answer for the client
    pub async fn process_offer(&self, offer: &str) -> FanoutResult<String> {
        self.handle.process_offer(&self.id, offer).await
    }

    pub async fn gather_candidates(&self) -> FanoutResult<()> {
        self.handle.gather_candidates(&self.id).await
    }

    /// Send this endpoint's media into `sink`, which must live on the same node
    pub async fn connect(&self, sink: &dyn MediaElement) -> FanoutResult<()> {
        self.handle.connect(self, sink).await
    }

    pub async fn release(&self) -> FanoutResult<()> {
        self.handle.release(&self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{Call, MockMediaServer};

    fn handle_for(server: &Arc<MockMediaServer>, node: &str, ip: &str) -> MediaServerHandle {
        MediaServerHandle::new(node, ip, server.clone())
    }

    #[tokio::test]
    async fn test_create_pipeline_and_endpoints() {
        let server = Arc::new(MockMediaServer::new("kms", "192.168.0.1"));
        let handle = handle_for(&server, "kms-a", "10.0.0.1");

        let pipeline = handle.create_pipeline().await.unwrap();
        let rtp = handle.create_rtp_endpoint(&pipeline).await.unwrap();
        let webrtc = handle.create_webrtc_endpoint(&pipeline).await.unwrap();

        assert_eq!(pipeline.node_id(), "kms-a");
        assert_eq!(rtp.node_id(), "kms-a");
        assert_eq!(
            server.calls(),
            vec![
                Call::CreatePipeline,
                Call::CreateRtpEndpoint {
                    pipeline: pipeline.id().to_string()
                },
                Call::CreateWebRtcEndpoint {
                    pipeline: pipeline.id().to_string()
                },
            ]
        );
        assert_ne!(rtp.id(), webrtc.id());
    }

    #[tokio::test]
    async fn test_transport_failure_is_unavailable() {
        let server = Arc::new(
            MockMediaServer::new("kms", "192.168.0.1")
                .fail_on("create_pipeline", ClientError::Closed),
        );
        let handle = handle_for(&server, "kms-a", "10.0.0.1");

        let err = handle.create_pipeline().await.unwrap_err();
        assert!(matches!(err, FanoutError::ServerUnavailable { ref node, .. } if node == "kms-a"));
    }

    #[tokio::test]
    async fn test_rpc_rejection_is_negotiation_error() {
        let server = Arc::new(MockMediaServer::new("kms", "192.168.0.1").fail_on(
            "process_offer",
            ClientError::Rpc {
                code: 40208,
                message: "bad offer".to_string(),
            },
        ));
        let handle = handle_for(&server, "kms-a", "10.0.0.1");
        let pipeline = handle.create_pipeline().await.unwrap();
        let rtp = handle.create_rtp_endpoint(&pipeline).await.unwrap();

        let err = rtp.process_offer("v=0").await.unwrap_err();
        assert!(matches!(err, FanoutError::SdpNegotiation { .. }));
    }

    #[tokio::test]
    async fn test_sdp_transport_failure_stays_unavailable() {
        let server = Arc::new(
            MockMediaServer::new("kms", "192.168.0.1")
                .fail_on("generate_offer", ClientError::Transport("reset".to_string())),
        );
        let handle = handle_for(&server, "kms-a", "10.0.0.1");
        let pipeline = handle.create_pipeline().await.unwrap();
        let rtp = handle.create_rtp_endpoint(&pipeline).await.unwrap();

        let err = rtp.generate_offer().await.unwrap_err();
        assert!(matches!(err, FanoutError::ServerUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_connect_across_nodes_rejected() {
        let a = Arc::new(MockMediaServer::new("a", "192.168.0.1"));
        let b = Arc::new(MockMediaServer::new("b", "192.168.0.2"));
        let ha = handle_for(&a, "kms-a", "10.0.0.1");
        let hb = handle_for(&b, "kms-b", "10.0.0.2");

        let pa = ha.create_pipeline().await.unwrap();
        let pb = hb.create_pipeline().await.unwrap();
        let rtp = ha.create_rtp_endpoint(&pa).await.unwrap();
        let webrtc = hb.create_webrtc_endpoint(&pb).await.unwrap();

        let err = rtp.connect(&webrtc).await.unwrap_err();
        assert!(matches!(err, FanoutError::Configuration(_)));
        assert_eq!(a.count("connect"), 0);

        let err = ha.create_rtp_endpoint(&pb).await.unwrap_err();
        assert!(matches!(err, FanoutError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let server =
            Arc::new(MockMediaServer::new("kms", "192.168.0.9").stall_on("create_pipeline"));
        let handle = handle_for(&server, "slow", "10.0.0.9")
            .with_call_timeout(Duration::from_millis(50));

        let err = handle.create_pipeline().await.unwrap_err();
        match err {
            FanoutError::ServerUnavailable { node, reason } => {
                assert_eq!(node, "slow");
                assert!(reason.contains("timed out"));
            }
            other => panic!("Expected ServerUnavailable, got {:?}", other),
        }
    }
}
