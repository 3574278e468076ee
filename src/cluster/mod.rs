//! # Master/slave session fan-out
//!
//! One logical session spans a pipeline on every configured media server:
//!
//! - **ServerRegistry**: the configured nodes, exactly one of them master
//! - **MediaServerHandle**: per-node wrapper creating pipelines and endpoints
//! - **SessionPipelineOrchestrator**: builds and wires a session across nodes,
//!   attaches client endpoints, tears sessions down
//! - **SessionPipelineRegistry**: session id -> wired pipelines
//!
//! ## Session lifecycle
//!
//! ```text
//!   create_pipeline ──► ready ──► create_{master,slave}_webrtc_endpoint (any number)
//!          │                 │
//!          ▼                 ▼
//!   failed (rolled back)   close_session ──► released
//! ```

pub mod handle;
pub mod orchestrator;
pub mod registry;
pub mod session;

pub use handle::{
    MediaElement, MediaServerHandle, Pipeline, RtpEndpoint, WebRtcEndpoint, DEFAULT_CALL_TIMEOUT,
};
pub use orchestrator::SessionPipelineOrchestrator;
pub use registry::{node_from_options, Node, NodeRole, ServerRegistry};
pub use session::{RelayEndpointPair, SessionEntry, SessionPipeline, SessionPipelineRegistry};
