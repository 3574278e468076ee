use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sdp::SdpRewrite;

/// Errors that can occur during settings parsing and validation
#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("No media servers configured")]
    NoServers,

    #[error("No master media server configured")]
    NoMaster,

    #[error("Multiple master media servers configured: {0:?}")]
    MultipleMasters(Vec<String>),

    #[error("Duplicate media server name: '{0}'")]
    DuplicateServerName(String),

    #[error("Media server '{0}' has an invalid IPv4 address: '{1}'")]
    InvalidIp(String, String),

    #[error("Media server '{0}' has an invalid control URL: '{1}' (expected ws:// or wss://)")]
    InvalidUrl(String, String),

    #[error("callTimeoutSecs must be greater than zero")]
    ZeroTimeout,
}

/// One configured media server
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerOptions {
    /// Node id; defaults to the IP when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Kurento control URL, e.g. ws://10.0.0.1:8888/kurento
    pub url: String,

    /// Address other nodes use to reach this node's RTP endpoints
    pub ip: String,

    #[serde(default, alias = "isMaster")]
    pub master: bool,
}

impl ServerOptions {
    pub fn new(url: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: None,
            url: url.into(),
            ip: ip.into(),
            master: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn as_master(mut self) -> Self {
        self.master = true;
        self
    }

    pub fn id(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.ip)
    }
}

/// The complete settings file
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KmsSettings {
    pub servers: Vec<ServerOptions>,

    /// Upper bound for every remote call against a media server
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default)]
    pub sdp_rewrite: SdpRewrite,
}

fn default_call_timeout() -> u64 {
    10
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Where the comment scanner currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Json,
    String,
    Escape,
    LineComment,
    BlockComment,
    /// Inside a block comment, just after a `*`
    BlockStar,
}

/// Remove `//` and `/* */` comments outside JSON strings. A line comment
/// keeps its newline so parse errors still point at the right line.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut state = Scan::Json;

    while let Some(c) = chars.next() {
        state = match (state, c) {
            (Scan::Json, '/') if chars.peek() == Some(&'/') => {
                chars.next();
                Scan::LineComment
            }
            (Scan::Json, '/') if chars.peek() == Some(&'*') => {
                chars.next();
                Scan::BlockComment
            }
            (Scan::Json, _) => {
                out.push(c);
                if c == '"' {
                    Scan::String
                } else {
                    Scan::Json
                }
            }
            (Scan::String, _) => {
                out.push(c);
                match c {
                    '\\' => Scan::Escape,
                    '"' => Scan::Json,
                    _ => Scan::String,
                }
            }
            (Scan::Escape, _) => {
                out.push(c);
                Scan::String
            }
            (Scan::LineComment, '\n') => {
                out.push('\n');
                Scan::Json
            }
            (Scan::LineComment, _) => Scan::LineComment,
            (Scan::BlockComment, '*') | (Scan::BlockStar, '*') => Scan::BlockStar,
            (Scan::BlockStar, '/') => Scan::Json,
            (Scan::BlockComment, _) | (Scan::BlockStar, _) => Scan::BlockComment,
        };
    }

    out
}

/// Parse JSONC settings without validating them.
pub fn parse_settings(content: &str) -> Result<KmsSettings, SettingsError> {
    let stripped = strip_jsonc_comments(content);
    serde_json::from_str(&stripped).map_err(|e| SettingsError::ParseError(e.to_string()))
}

/// Parse YAML settings without validating them.
pub fn parse_settings_yaml(content: &str) -> Result<KmsSettings, SettingsError> {
    serde_yaml::from_str(content).map_err(|e| SettingsError::ParseError(e.to_string()))
}

/// Validate settings for consistency.
pub fn validate_settings(settings: &KmsSettings) -> Result<(), SettingsError> {
    if settings.servers.is_empty() {
        return Err(SettingsError::NoServers);
    }

    let mut seen = HashSet::new();
    for server in &settings.servers {
        if !seen.insert(server.id()) {
            return Err(SettingsError::DuplicateServerName(server.id().to_string()));
        }

        if server.ip.parse::<Ipv4Addr>().is_err() {
            return Err(SettingsError::InvalidIp(
                server.id().to_string(),
                server.ip.clone(),
            ));
        }

        if !(server.url.starts_with("ws://") || server.url.starts_with("wss://")) {
            return Err(SettingsError::InvalidUrl(
                server.id().to_string(),
                server.url.clone(),
            ));
        }
    }

    let masters: Vec<String> = settings
        .servers
        .iter()
        .filter(|s| s.master)
        .map(|s| s.id().to_string())
        .collect();
    match masters.len() {
        0 => return Err(SettingsError::NoMaster),
        1 => {}
        _ => return Err(SettingsError::MultipleMasters(masters)),
    }

    if settings.call_timeout_secs == 0 {
        return Err(SettingsError::ZeroTimeout);
    }

    Ok(())
}

impl KmsSettings {
    /// Parse and validate from a JSONC string.
    pub fn from_str(content: &str) -> Result<Self, SettingsError> {
        let settings = parse_settings(content)?;
        validate_settings(&settings)?;
        Ok(settings)
    }

    /// Parse and validate from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, SettingsError> {
        let settings = parse_settings_yaml(content)?;
        validate_settings(&settings)?;
        Ok(settings)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn master(&self) -> Option<&ServerOptions> {
        self.servers.iter().find(|s| s.master)
    }

    pub fn slaves(&self) -> impl Iterator<Item = &ServerOptions> {
        self.servers.iter().filter(|s| !s.master)
    }
}
