//! # kurento-fanout
//!
//! Replicates a single WebRTC call across one master and any number of slave
//! Kurento media servers. Every node hosts its own pipeline for the session;
//! the master pipeline is bridged to each slave pipeline through a pair of
//! RTP endpoints, so a node only terminates WebRTC for the clients attached to
//! it while media between nodes travels as plain RTP.
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!   client ◄──────►  │ master pipeline              │
//!   (WebRtc)         │  WebRtc ──► Rtp(b)  Rtp(c)   │
//!                    └────────────┬────────┬────────┘
//!                          RTP    │        │   RTP
//!                    ┌────────────▼──┐  ┌──▼────────────┐
//!                    │ slave b       │  │ slave c       │
//!                    │ Rtp ──► WebRtc│  │ Rtp ──► WebRtc│
//!                    └───────────────┘  └───────────────┘
//! ```

pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod sdp;

pub use client::{ClientError, MediaServer, ServerInfo};
pub use cluster::{
    MediaServerHandle, Node, NodeRole, Pipeline, RtpEndpoint, ServerRegistry, SessionPipeline,
    SessionPipelineOrchestrator, SessionPipelineRegistry, WebRtcEndpoint,
};
pub use config::{load_settings_file, ConfigError, KmsSettings, ServerOptions};
pub use error::{FanoutError, FanoutResult};
pub use sdp::SdpRewrite;
