//! Kurento JSON-RPC client
//!
//! Speaks the Kurento Media Server protocol (JSON-RPC 2.0 over a WebSocket,
//! usually `ws://<host>:8888/kurento`). Responses are matched to requests by
//! id; the `sessionId` the server assigns on the first response is echoed on
//! every later request.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use super::{ClientError, MediaServer, ServerInfo};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type PendingMap = DashMap<u64, oneshot::Sender<Result<Value, ClientError>>>;

/// Well-known object id of the server manager
const SERVER_MANAGER: &str = "manager_ServerManager";

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A response, or a server-initiated notification when `method` is set
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl From<JsonRpcError> for ClientError {
    fn from(e: JsonRpcError) -> Self {
        ClientError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// Extract `result.value` as a string
fn value_str(result: &Value) -> Result<String, ClientError> {
    result
        .get("value")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ClientError::Protocol(format!("missing string value in {}", result)))
}

// ============================================================================
// Client
// ============================================================================

pub struct KurentoClient {
    url: String,
    tx: mpsc::UnboundedSender<Message>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    session_id: Arc<RwLock<Option<String>>>,
    closed: Arc<AtomicBool>,
}

impl KurentoClient {
    /// Open the control channel to a media server
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        info!("Connecting to media server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(format!("Failed to connect to {}: {}", url, e)))?;

        debug!("Connected to media server {}", url);

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingMap::new());
        let session_id = Arc::new(RwLock::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(
            read,
            url.to_string(),
            pending.clone(),
            session_id.clone(),
            closed.clone(),
        ));

        Ok(Self {
            url: url.to_string(),
            tx,
            pending,
            next_id: AtomicU64::new(1),
            session_id,
            closed,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Kurento session id, known after the first response
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send to media server: {}", e);
                break;
            }
        }

        let _ = write.close().await;
        debug!("Media server sender task terminated");
    }

    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        url: String,
        pending: Arc<PendingMap>,
        session_id: Arc<RwLock<Option<String>>>,
        closed: Arc<AtomicBool>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = dispatch_message(text.as_str(), &pending, &session_id).await {
                        warn!("Unhandled message from {}: {}", url, e);
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("Media server {} closed the connection", url);
                    break;
                }
                Err(e) => {
                    error!("Media server {} socket error: {}", url, e);
                    break;
                }
                _ => {}
            }
        }

        closed.store(true, Ordering::SeqCst);
        fail_pending(&pending);
        debug!("Media server receiver task terminated");
    }

    async fn request(&self, method: &str, mut params: Value) -> Result<Value, ClientError> {
        if let Some(session) = self.session_id.read().await.clone() {
            if let Value::Object(ref mut map) = params {
                map.insert("sessionId".to_string(), Value::String(session));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.insert(id, resp_tx);
        let _slot = PendingSlot {
            id,
            pending: self.pending.as_ref(),
        };

        // Receiver may have drained the map before the insert above
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        trace!("-> {}: {}", self.url, text);
        if self.tx.send(Message::Text(text.into())).is_err() {
            return Err(ClientError::Closed);
        }

        resp_rx.await.unwrap_or(Err(ClientError::Closed))
    }

    async fn create(&self, kind: &str, constructor_params: Value) -> Result<String, ClientError> {
        let result = self
            .request(
                "create",
                json!({
                    "type": kind,
                    "constructorParams": constructor_params,
                    "properties": {},
                }),
            )
            .await?;
        let id = value_str(&result)?;
        debug!("Created {} {} on {}", kind, id, self.url);
        Ok(id)
    }

    async fn invoke(
        &self,
        object: &str,
        operation: &str,
        operation_params: Value,
    ) -> Result<Value, ClientError> {
        self.request(
            "invoke",
            json!({
                "object": object,
                "operation": operation,
                "operationParams": operation_params,
            }),
        )
        .await
    }
}

/// Removes a request from the pending map when its caller stops waiting,
/// whether it got a response, failed, or was dropped by a timeout
struct PendingSlot<'a> {
    id: u64,
    pending: &'a PendingMap,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Route one incoming frame: complete the matching pending request, or log a
/// server event.
async fn dispatch_message(
    text: &str,
    pending: &PendingMap,
    session_id: &RwLock<Option<String>>,
) -> Result<(), ClientError> {
    trace!("<- {}", text);

    let msg: JsonRpcMessage =
        serde_json::from_str(text).map_err(|e| ClientError::Protocol(e.to_string()))?;

    if let Some(method) = msg.method {
        debug!("Media server event: {}", method);
        return Ok(());
    }

    let id = msg
        .id
        .ok_or_else(|| ClientError::Protocol("response without id".to_string()))?;

    let outcome = match (msg.result, msg.error) {
        (_, Some(err)) => Err(ClientError::from(err)),
        (Some(result), None) => {
            if let Some(sid) = result.get("sessionId").and_then(Value::as_str) {
                let mut current = session_id.write().await;
                if current.as_deref() != Some(sid) {
                    *current = Some(sid.to_string());
                }
            }
            Ok(result)
        }
        (None, None) => Ok(Value::Null),
    };

    match pending.remove(&id) {
        Some((_, tx)) => {
            let _ = tx.send(outcome);
            Ok(())
        }
        None => Err(ClientError::Protocol(format!(
            "response for unknown request {}",
            id
        ))),
    }
}

fn fail_pending(pending: &PendingMap) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(ClientError::Closed));
        }
    }
}

#[async_trait]
impl MediaServer for KurentoClient {
    async fn create_pipeline(&self) -> Result<String, ClientError> {
        self.create("MediaPipeline", json!({})).await
    }

    async fn create_rtp_endpoint(&self, pipeline: &str) -> Result<String, ClientError> {
        self.create("RtpEndpoint", json!({ "mediaPipeline": pipeline }))
            .await
    }

    async fn create_webrtc_endpoint(&self, pipeline: &str) -> Result<String, ClientError> {
        self.create("WebRtcEndpoint", json!({ "mediaPipeline": pipeline }))
            .await
    }

    async fn connect(&self, source: &str, sink: &str) -> Result<(), ClientError> {
        self.invoke(source, "connect", json!({ "sink": sink }))
            .await
            .map(|_| ())
    }

    async fn generate_offer(&self, endpoint: &str) -> Result<String, ClientError> {
        let result = self.invoke(endpoint, "generateOffer", json!({})).await?;
        value_str(&result)
    }

    async fn process_offer(&self, endpoint: &str, offer: &str) -> Result<String, ClientError> {
        let result = self
            .invoke(endpoint, "processOffer", json!({ "offer": offer }))
            .await?;
        value_str(&result)
    }

    async fn process_answer(&self, endpoint: &str, answer: &str) -> Result<String, ClientError> {
        let result = self
            .invoke(endpoint, "processAnswer", json!({ "answer": answer }))
            .await?;
        // Older servers answer with an empty result
        Ok(result
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn gather_candidates(&self, endpoint: &str) -> Result<(), ClientError> {
        self.invoke(endpoint, "gatherCandidates", json!({}))
            .await
            .map(|_| ())
    }

    async fn release(&self, object: &str) -> Result<(), ClientError> {
        self.request("release", json!({ "object": object }))
            .await
            .map(|_| ())
    }

    async fn server_info(&self) -> Result<ServerInfo, ClientError> {
        let result = self.invoke(SERVER_MANAGER, "getInfo", json!({})).await?;
        let value = result.get("value").cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| ClientError::Protocol(e.to_string()))
    }
}
