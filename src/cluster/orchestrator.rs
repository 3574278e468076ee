//! Session pipeline orchestration
//!
//! For every session the orchestrator creates one pipeline per node and an
//! RTP relay between the master pipeline and each slave pipeline. Clients are
//! then attached either on the master (fanned out to every relay) or on a
//! randomly picked slave (fed by that slave's relay).

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, error, info, warn};

use super::handle::{MediaElement, MediaServerHandle, Pipeline, WebRtcEndpoint};
use super::registry::{Node, ServerRegistry};
use super::session::{
    RelayEndpointPair, SessionEntry, SessionPipeline, SessionPipelineRegistry,
};
use crate::error::{FanoutError, FanoutResult};
use crate::sdp::SdpRewrite;

/// Pipelines created by an in-flight `create_pipeline`, released in reverse
/// order if the session cannot be completed.
///
/// Only pipelines are tracked: releasing a pipeline releases every endpoint
/// inside it, including one whose create call timed out here but still
/// completed on the server later. A `create_pipeline` call that times out
/// can likewise leave a pipeline behind on that node, and no id is ever
/// returned for it, so it cannot be tracked.
#[derive(Default)]
struct Rollback {
    created: Vec<Pipeline>,
}

impl Rollback {
    fn push(&mut self, pipeline: &Pipeline) {
        self.created.push(pipeline.clone());
    }

    fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    async fn release_all(self, session_id: &str) {
        for pipeline in self.created.into_iter().rev() {
            match pipeline.release().await {
                Ok(()) => debug!(
                    "Rolled back pipeline {} on {} for session {}",
                    pipeline.id(),
                    pipeline.node_id(),
                    session_id
                ),
                Err(e) => warn!(
                    "Failed to roll back pipeline {} for session {}: {}",
                    pipeline.id(),
                    session_id,
                    e
                ),
            }
        }
    }
}

/// A reserved session id plus everything built for it so far.
///
/// Dropping an unfinished creation (the caller timed out, lost a `select!`
/// or was aborted) frees the id at once and hands the rollback to a spawned
/// task, since `Drop` cannot await.
struct PendingSession<'a> {
    sessions: &'a SessionPipelineRegistry,
    session_id: String,
    rollback: Rollback,
    finished: bool,
}

impl<'a> PendingSession<'a> {
    fn reserve(sessions: &'a SessionPipelineRegistry, session_id: &str) -> FanoutResult<Self> {
        sessions.reserve(session_id)?;
        Ok(Self {
            sessions,
            session_id: session_id.to_string(),
            rollback: Rollback::default(),
            finished: false,
        })
    }

    fn commit(mut self, session: SessionPipeline) -> Arc<SessionEntry> {
        self.finished = true;
        self.sessions.commit(session)
    }

    async fn fail(mut self) {
        self.finished = true;
        self.sessions.abandon(&self.session_id);
        let rollback = std::mem::take(&mut self.rollback);
        rollback.release_all(&self.session_id).await;
    }
}

impl Drop for PendingSession<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        self.sessions.abandon(&self.session_id);
        let rollback = std::mem::take(&mut self.rollback);
        if rollback.is_empty() {
            return;
        }

        warn!(
            "Session {} creation cancelled, releasing {} pipelines",
            self.session_id,
            rollback.created.len()
        );
        let session_id = self.session_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { rollback.release_all(&session_id).await });
            }
            Err(_) => error!(
                "Session {}: no runtime left to release {} pipelines",
                session_id,
                rollback.created.len()
            ),
        }
    }
}

pub struct SessionPipelineOrchestrator {
    registry: Arc<ServerRegistry>,
    sessions: SessionPipelineRegistry,
    sdp_rewrite: SdpRewrite,
}

impl SessionPipelineOrchestrator {
    pub fn new(registry: ServerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            sessions: SessionPipelineRegistry::new(),
            sdp_rewrite: SdpRewrite::default(),
        }
    }

    pub fn with_sdp_rewrite(mut self, mode: SdpRewrite) -> Self {
        self.sdp_rewrite = mode;
        self
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionPipelineRegistry {
        &self.sessions
    }

    /// Create the session's pipelines on every node and wire the master to
    /// each slave.
    ///
    /// The session only becomes visible once every node is wired. On failure
    /// everything created so far is released (best-effort) and the error is
    /// returned. Dropping the future part-way frees the id and releases in
    /// the background.
    pub async fn create_pipeline(&self, session_id: &str) -> FanoutResult<Arc<SessionEntry>> {
        let master = self.registry.master_node()?;
        let mut pending = PendingSession::reserve(&self.sessions, session_id)?;

        info!(
            "Creating session {} on master {} with {} slaves",
            session_id,
            master.id(),
            self.registry.slave_nodes().len()
        );

        let built = self
            .build_session(session_id, master, &mut pending.rollback)
            .await;
        match built {
            Ok(session) => {
                let entry = pending.commit(session);
                info!("Session {} ready", session_id);
                Ok(entry)
            }
            Err(e) => {
                warn!("Session {} creation failed: {}", session_id, e);
                pending.fail().await;
                Err(e)
            }
        }
    }

    async fn build_session(
        &self,
        session_id: &str,
        master: &Node,
        rollback: &mut Rollback,
    ) -> FanoutResult<SessionPipeline> {
        let master_pipeline = master.handle.create_pipeline().await?;
        rollback.push(&master_pipeline);

        let mut session = SessionPipeline::new(session_id, master_pipeline.clone());

        for slave in self.registry.slave_nodes() {
            let slave_pipeline = slave.handle.create_pipeline().await?;
            rollback.push(&slave_pipeline);

            let relay = self
                .wire_relay(&master.handle, &master_pipeline, &slave.handle, &slave_pipeline)
                .await?;
            debug!(
                "Session {}: relay {} <-> {} wired to {}",
                session_id,
                relay.master.id(),
                relay.slave.id(),
                slave.id()
            );
            session.add_slave(slave.id(), slave_pipeline, relay);
        }

        Ok(session)
    }

    /// Create an RTP endpoint on each side and run the offer/answer exchange,
    /// rewriting each SDP to the address of the node that produced it.
    async fn wire_relay(
        &self,
        master: &MediaServerHandle,
        master_pipeline: &Pipeline,
        slave: &MediaServerHandle,
        slave_pipeline: &Pipeline,
    ) -> FanoutResult<RelayEndpointPair> {
        let slave_relay = slave.create_rtp_endpoint(slave_pipeline).await?;
        let master_relay = master.create_rtp_endpoint(master_pipeline).await?;

        let offer = master_relay.generate_offer().await?;
        let offer = self.sdp_rewrite.apply(&offer, master.ip());

        let answer = slave_relay.process_offer(&offer).await?;
        let answer = self.sdp_rewrite.apply(&answer, slave.ip());

        master_relay.process_answer(&answer).await?;

        Ok(RelayEndpointPair {
            master: master_relay,
            slave: slave_relay,
        })
    }

    /// Attach a client endpoint on a slave picked uniformly at random, fed by
    /// that slave's relay.
    pub async fn create_slave_webrtc_endpoint(
        &self,
        session_id: &str,
    ) -> FanoutResult<WebRtcEndpoint> {
        let entry = self.sessions.get(session_id)?;
        let _guard = entry.lock().await;
        let session = entry.pipeline();

        let slave_id = {
            let ids = session.slave_ids();
            if ids.is_empty() {
                return Err(FanoutError::NoSlaveNodes(session_id.to_string()));
            }
            let index = rand::thread_rng().gen_range(0..ids.len());
            ids[index].to_string()
        };

        let missing = || FanoutError::SessionNotFound(session_id.to_string());
        let pipeline = session.slave_pipeline(&slave_id).ok_or_else(missing)?;
        let relay = session.relay(&slave_id).ok_or_else(missing)?;

        let endpoint = pipeline.handle().create_webrtc_endpoint(pipeline).await?;
        if let Err(e) = relay.slave.connect(&endpoint).await {
            release_quietly(&endpoint).await;
            return Err(e);
        }

        info!(
            "Session {}: client endpoint {} attached on slave {}",
            session_id,
            endpoint.id(),
            slave_id
        );
        Ok(endpoint)
    }

    /// Attach a client endpoint on the master, connected to every master-side
    /// relay endpoint of the session.
    pub async fn create_master_webrtc_endpoint(
        &self,
        session_id: &str,
    ) -> FanoutResult<WebRtcEndpoint> {
        let entry = self.sessions.get(session_id)?;
        let _guard = entry.lock().await;
        let session = entry.pipeline();

        let master_pipeline = session.master_pipeline();
        let endpoint = master_pipeline
            .handle()
            .create_webrtc_endpoint(master_pipeline)
            .await?;

        for slave_id in session.slave_ids() {
            let Some(relay) = session.master_relay_endpoints().get(slave_id) else {
                continue;
            };
            if let Err(e) = endpoint.connect(relay).await {
                release_quietly(&endpoint).await;
                return Err(e);
            }
        }

        info!(
            "Session {}: client endpoint {} attached on master ({} relays)",
            session_id,
            endpoint.id(),
            session.slave_count()
        );
        Ok(endpoint)
    }

    /// Remove the session and release its pipelines, slaves first.
    ///
    /// Every release is attempted; the first failure is returned.
    pub async fn close_session(&self, session_id: &str) -> FanoutResult<()> {
        let entry = self.sessions.remove(session_id)?;
        let _guard = entry.lock().await;
        let session = entry.pipeline();

        let mut first_error = None;
        for slave_id in session.slave_ids() {
            if let Some(pipeline) = session.slave_pipeline(slave_id) {
                if let Err(e) = pipeline.release().await {
                    warn!("Session {}: releasing slave {} failed: {}", session_id, slave_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = session.master_pipeline().release().await {
            warn!("Session {}: releasing master failed: {}", session_id, e);
            first_error.get_or_insert(e);
        }

        info!("Session {} closed", session_id);
        first_error.map_or(Ok(()), Err)
    }
}

async fn release_quietly(endpoint: &WebRtcEndpoint) {
    if let Err(e) = endpoint.release().await {
        warn!("Failed to release endpoint {}: {}", endpoint.id(), e);
    }
}
