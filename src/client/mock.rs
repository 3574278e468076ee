//! Recording media-server double (no I/O)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ClientError, MediaServer, ServerInfo};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreatePipeline,
    CreateRtpEndpoint { pipeline: String },
    CreateWebRtcEndpoint { pipeline: String },
    Connect { source: String, sink: String },
    GenerateOffer { endpoint: String },
    ProcessOffer { endpoint: String, offer: String },
    ProcessAnswer { endpoint: String, answer: String },
    GatherCandidates { endpoint: String },
    Release { object: String },
    ServerInfo,
}

impl Call {
    fn op(&self) -> &'static str {
        match self {
            Call::CreatePipeline => "create_pipeline",
            Call::CreateRtpEndpoint { .. } => "create_rtp_endpoint",
            Call::CreateWebRtcEndpoint { .. } => "create_webrtc_endpoint",
            Call::Connect { .. } => "connect",
            Call::GenerateOffer { .. } => "generate_offer",
            Call::ProcessOffer { .. } => "process_offer",
            Call::ProcessAnswer { .. } => "process_answer",
            Call::GatherCandidates { .. } => "gather_candidates",
            Call::Release { .. } => "release",
            Call::ServerInfo => "server_info",
        }
    }
}

/// Calls from several mocks in the order they happened, tagged with the
/// mock's name
pub type Journal = Arc<Mutex<Vec<(String, Call)>>>;

/// Hands out ids prefixed with `name` and records every call.
///
/// SDPs it produces advertise `internal_ip`, the way a node behind NAT
/// advertises its private address.
pub struct MockMediaServer {
    name: String,
    internal_ip: String,
    calls: Mutex<Vec<Call>>,
    counter: AtomicUsize,
    failures: Mutex<Vec<(String, ClientError)>>,
    stalls: Mutex<Vec<String>>,
    journal: Option<Journal>,
}

impl MockMediaServer {
    pub fn new(name: impl Into<String>, internal_ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            internal_ip: internal_ip.into(),
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            stalls: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    /// Make every call of `op` hang forever
    pub fn stall_on(self, op: &str) -> Self {
        self.stalls.lock().unwrap().push(op.to_string());
        self
    }

    /// Also append every call to `journal`
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Make every call of `op` fail with `error`
    pub fn fail_on(self, op: &str, error: ClientError) -> Self {
        self.failures.lock().unwrap().push((op.to_string(), error));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.op() == op)
            .count()
    }

    pub fn released(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Release { object } => Some(object.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sdp(&self, kind: &str) -> String {
        format!(
            "v=0\r\no=- 1 1 IN IP4 {ip}\r\ns={kind}\r\nc=IN IP4 {ip}\r\nt=0 0\r\nm=audio 5004 RTP/AVPF 96\r\n",
            ip = self.internal_ip,
            kind = kind
        )
    }

    async fn record(&self, call: Call) -> Result<(), ClientError> {
        let op = call.op();
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push((self.name.clone(), call.clone()));
        }
        self.calls.lock().unwrap().push(call);

        let stalled = self.stalls.lock().unwrap().iter().any(|name| name == op);
        if stalled {
            std::future::pending::<()>().await;
        }

        let failures = self.failures.lock().unwrap();
        match failures.iter().find(|(name, _)| name == op) {
            Some((_, err)) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn next_id(&self, kind: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}-{}", self.name, kind, n)
    }
}

#[async_trait]
impl MediaServer for MockMediaServer {
    async fn create_pipeline(&self) -> Result<String, ClientError> {
        self.record(Call::CreatePipeline).await?;
        Ok(self.next_id("pipeline"))
    }

    async fn create_rtp_endpoint(&self, pipeline: &str) -> Result<String, ClientError> {
        self.record(Call::CreateRtpEndpoint {
            pipeline: pipeline.to_string(),
        })
        .await?;
        Ok(self.next_id("rtp"))
    }

    async fn create_webrtc_endpoint(&self, pipeline: &str) -> Result<String, ClientError> {
        self.record(Call::CreateWebRtcEndpoint {
            pipeline: pipeline.to_string(),
        })
        .await?;
        Ok(self.next_id("webrtc"))
    }

    async fn connect(&self, source: &str, sink: &str) -> Result<(), ClientError> {
        self.record(Call::Connect {
            source: source.to_string(),
            sink: sink.to_string(),
        })
        .await
    }

    async fn generate_offer(&self, endpoint: &str) -> Result<String, ClientError> {
        self.record(Call::GenerateOffer {
            endpoint: endpoint.to_string(),
        })
        .await?;
        Ok(self.sdp("offer"))
    }

    async fn process_offer(&self, endpoint: &str, offer: &str) -> Result<String, ClientError> {
        self.record(Call::ProcessOffer {
            endpoint: endpoint.to_string(),
            offer: offer.to_string(),
        })
        .await?;
        Ok(self.sdp("answer"))
    }

    async fn process_answer(&self, endpoint: &str, answer: &str) -> Result<String, ClientError> {
        self.record(Call::ProcessAnswer {
            endpoint: endpoint.to_string(),
            answer: answer.to_string(),
        })
        .await?;
        Ok(String::new())
    }

    async fn gather_candidates(&self, endpoint: &str) -> Result<(), ClientError> {
        self.record(Call::GatherCandidates {
            endpoint: endpoint.to_string(),
        })
        .await
    }

    async fn release(&self, object: &str) -> Result<(), ClientError> {
        self.record(Call::Release {
            object: object.to_string(),
        })
        .await
    }

    async fn server_info(&self) -> Result<ServerInfo, ClientError> {
        self.record(Call::ServerInfo).await?;
        Ok(ServerInfo {
            version: "6.18.0".to_string(),
            server_type: "KMS".to_string(),
            capabilities: vec![],
        })
    }
}
