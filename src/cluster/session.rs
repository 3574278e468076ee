//! Per-session pipeline state and the in-memory session store

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};

use super::handle::{Pipeline, RtpEndpoint};
use crate::error::{FanoutError, FanoutResult};

/// The two RTP endpoints bridging the master pipeline and one slave pipeline
#[derive(Debug, Clone)]
pub struct RelayEndpointPair {
    pub master: RtpEndpoint,
    pub slave: RtpEndpoint,
}

/// Remote resources of one session: a pipeline per node plus the relay
/// wiring between the master and every slave.
///
/// A slave is recorded with its pipeline and both relay endpoints at once, so
/// the three slave maps always share the same key set.
#[derive(Debug, Clone)]
pub struct SessionPipeline {
    session_id: String,
    master_pipeline: Pipeline,
    slave_pipelines: HashMap<String, Pipeline>,
    master_relay_endpoints: HashMap<String, RtpEndpoint>,
    slave_relay_endpoints: HashMap<String, RtpEndpoint>,
    created_at: DateTime<Utc>,
}

impl SessionPipeline {
    pub fn new(session_id: impl Into<String>, master_pipeline: Pipeline) -> Self {
        Self {
            session_id: session_id.into(),
            master_pipeline,
            slave_pipelines: HashMap::new(),
            master_relay_endpoints: HashMap::new(),
            slave_relay_endpoints: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn add_slave(&mut self, slave_id: &str, pipeline: Pipeline, relay: RelayEndpointPair) {
        self.slave_pipelines.insert(slave_id.to_string(), pipeline);
        self.master_relay_endpoints
            .insert(slave_id.to_string(), relay.master);
        self.slave_relay_endpoints
            .insert(slave_id.to_string(), relay.slave);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn master_pipeline(&self) -> &Pipeline {
        &self.master_pipeline
    }

    pub fn slave_pipelines(&self) -> &HashMap<String, Pipeline> {
        &self.slave_pipelines
    }

    pub fn master_relay_endpoints(&self) -> &HashMap<String, RtpEndpoint> {
        &self.master_relay_endpoints
    }

    pub fn slave_relay_endpoints(&self) -> &HashMap<String, RtpEndpoint> {
        &self.slave_relay_endpoints
    }

    /// Slave ids, sorted
    pub fn slave_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.slave_pipelines.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn slave_count(&self) -> usize {
        self.slave_pipelines.len()
    }

    pub fn slave_pipeline(&self, slave_id: &str) -> Option<&Pipeline> {
        self.slave_pipelines.get(slave_id)
    }

    pub fn relay(&self, slave_id: &str) -> Option<RelayEndpointPair> {
        let master = self.master_relay_endpoints.get(slave_id)?;
        let slave = self.slave_relay_endpoints.get(slave_id)?;
        Some(RelayEndpointPair {
            master: master.clone(),
            slave: slave.clone(),
        })
    }
}

/// A committed session plus the lock serialising operations on it
#[derive(Debug)]
pub struct SessionEntry {
    pipeline: SessionPipeline,
    op_lock: Mutex<()>,
}

impl SessionEntry {
    pub fn pipeline(&self) -> &SessionPipeline {
        &self.pipeline
    }

    /// Held for the whole of an endpoint attachment or teardown
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }
}

#[derive(Debug)]
enum SessionSlot {
    /// Id reserved by an in-flight `create_pipeline`
    Pending,
    Ready(Arc<SessionEntry>),
}

/// Session id -> committed session.
///
/// Creation is build-then-commit: the id is reserved up front, remote work
/// runs without touching the map, and only the final insert swaps the
/// reservation for the finished session. A reserved id is invisible to
/// lookups.
#[derive(Debug, Default)]
pub struct SessionPipelineRegistry {
    sessions: DashMap<String, SessionSlot>,
}

impl SessionPipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&self, session_id: &str) -> FanoutResult<()> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(FanoutError::SessionAlreadyExists(session_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(SessionSlot::Pending);
                Ok(())
            }
        }
    }

    pub fn commit(&self, pipeline: SessionPipeline) -> Arc<SessionEntry> {
        let entry = Arc::new(SessionEntry {
            pipeline,
            op_lock: Mutex::new(()),
        });
        self.sessions.insert(
            entry.pipeline.session_id().to_string(),
            SessionSlot::Ready(entry.clone()),
        );
        entry
    }

    /// Drop a reservation that will never be committed
    pub fn abandon(&self, session_id: &str) {
        self.sessions
            .remove_if(session_id, |_, slot| matches!(slot, SessionSlot::Pending));
    }

    pub fn get(&self, session_id: &str) -> FanoutResult<Arc<SessionEntry>> {
        match self.sessions.get(session_id).as_deref() {
            Some(SessionSlot::Ready(entry)) => Ok(entry.clone()),
            _ => Err(FanoutError::SessionNotFound(session_id.to_string())),
        }
    }

    pub fn remove(&self, session_id: &str) -> FanoutResult<Arc<SessionEntry>> {
        match self
            .sessions
            .remove_if(session_id, |_, slot| matches!(slot, SessionSlot::Ready(_)))
        {
            Some((_, SessionSlot::Ready(entry))) => Ok(entry),
            _ => Err(FanoutError::SessionNotFound(session_id.to_string())),
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.get(session_id).is_ok()
    }

    /// Number of committed sessions
    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|slot| matches!(slot.value(), SessionSlot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed session ids, sorted
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|slot| matches!(slot.value(), SessionSlot::Ready(_)))
            .map(|slot| slot.key().clone())
            .collect();
        ids.sort();
        ids
    }
}
