//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::SessionArgs;
use crate::client::{KurentoClient, ServerInfo};
use crate::cluster::{
    node_from_options, MediaElement, NodeRole, ServerRegistry, SessionPipelineOrchestrator,
};
use crate::config::{load_settings_file, ConfigError, KmsSettings};
use crate::error::FanoutError;

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Fanout(#[from] FanoutError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Validate
// ============================================================================

pub fn validate(path: &Path) -> CommandResult<KmsSettings> {
    Ok(load_settings_file(path)?)
}

// ============================================================================
// Probe
// ============================================================================

/// Outcome of querying one configured node
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub id: String,
    pub role: NodeRole,
    pub url: String,
    pub outcome: Result<ServerInfo, String>,
}

/// Query every node independently; one unreachable node does not hide the
/// others.
pub async fn probe(settings: &KmsSettings) -> Vec<ProbeResult> {
    let probes = settings.servers.iter().map(|opts| async move {
        let role = if opts.master {
            NodeRole::Master
        } else {
            NodeRole::Slave
        };

        let outcome = async {
            let client = tokio::time::timeout(
                settings.call_timeout(),
                KurentoClient::connect(&opts.url),
            )
            .await
            .map_err(|_| "connect timed out".to_string())?
            .map_err(|e| e.to_string())?;
            let node = node_from_options(opts, Arc::new(client), settings);
            node.handle.server_info().await.map_err(|e| e.to_string())
        }
        .await;

        if let Err(e) = &outcome {
            warn!("Probe of {} failed: {}", opts.id(), e);
        }

        ProbeResult {
            id: opts.id().to_string(),
            role,
            url: opts.url.clone(),
            outcome,
        }
    });

    futures::future::join_all(probes).await
}

// ============================================================================
// Session
// ============================================================================

/// What a `session` run did
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub slave_count: usize,
    pub endpoint_id: String,
    pub endpoint_node: String,
    pub answer: Option<String>,
}

/// Build a session across all nodes, attach one client endpoint, negotiate
/// the optional offer, then close the session again.
pub async fn run_session(
    settings: &KmsSettings,
    args: &SessionArgs,
) -> CommandResult<SessionReport> {
    let offer = match &args.offer {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };

    let registry = ServerRegistry::connect(settings).await?;
    let orchestrator =
        SessionPipelineOrchestrator::new(registry).with_sdp_rewrite(settings.sdp_rewrite);

    let session_id = args
        .session
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let entry = orchestrator.create_pipeline(&session_id).await?;
    let slave_count = entry.pipeline().slave_count();
    drop(entry);

    let result = attach_client(&orchestrator, &session_id, args.slave, offer.as_deref()).await;

    if let Err(e) = orchestrator.close_session(&session_id).await {
        warn!("Closing session {} failed: {}", session_id, e);
    }

    let (endpoint_id, endpoint_node, answer) = result?;
    Ok(SessionReport {
        session_id,
        slave_count,
        endpoint_id,
        endpoint_node,
        answer,
    })
}

async fn attach_client(
    orchestrator: &SessionPipelineOrchestrator,
    session_id: &str,
    on_slave: bool,
    offer: Option<&str>,
) -> CommandResult<(String, String, Option<String>)> {
    let endpoint = if on_slave {
        orchestrator.create_slave_webrtc_endpoint(session_id).await?
    } else {
        orchestrator.create_master_webrtc_endpoint(session_id).await?
    };

    let answer = match offer {
        Some(offer) => {
            let answer = endpoint.process_offer(offer).await?;
            endpoint.gather_candidates().await?;
            info!("Negotiated client offer on {}", endpoint.node_id());
            Some(answer)
        }
        None => None,
    };

    Ok((endpoint.id().to_string(), endpoint.node_id().to_string(), answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerOptions;
    use crate::sdp::SdpRewrite;
    use std::io::Write;

    #[test]
    fn test_validate_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(
            br#"{"servers": [{"url": "ws://10.0.0.1:8888/kurento", "ip": "10.0.0.1", "master": true}]}"#,
        )
        .unwrap();

        let settings = validate(file.path()).unwrap();
        assert_eq!(settings.servers.len(), 1);
    }

    #[test]
    fn test_validate_missing_file() {
        let result = validate(Path::new("/nonexistent/kms.json"));
        assert!(matches!(result, Err(CommandError::Config(_))));
    }

    #[tokio::test]
    async fn test_probe_reports_each_node() {
        let settings = KmsSettings {
            servers: vec![
                ServerOptions::new("ws://127.0.0.1:1/kurento", "10.0.0.1")
                    .with_name("hub")
                    .as_master(),
                ServerOptions::new("ws://127.0.0.1:1/kurento", "10.0.0.2").with_name("edge"),
            ],
            call_timeout_secs: 2,
            sdp_rewrite: SdpRewrite::default(),
        };

        let results = probe(&settings).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "hub");
        assert_eq!(results[0].role, NodeRole::Master);
        assert_eq!(results[1].role, NodeRole::Slave);
        assert!(results.iter().all(|r| r.outcome.is_err()));
    }
}
