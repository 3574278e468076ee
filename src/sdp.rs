//! SDP address rewriting for RTP relays
//!
//! An RTP endpoint advertises the internal address of the node that produced
//! its SDP. Before the SDP is handed to the peer node, that address has to be
//! replaced by the address the peer can actually reach.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How much of an SDP body is subject to address rewriting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SdpRewrite {
    /// Every dotted-quad token anywhere in the body.
    ///
    /// Only correct while relay SDPs carry no other IPv4-shaped tokens
    /// (candidate lines, `a=rtcp:` attributes with addresses, ...).
    #[default]
    AllAddresses,
    /// Only the address of `c=IN IP4 <addr>` lines.
    ConnectionLine,
}

impl SdpRewrite {
    pub fn apply(self, sdp: &str, target_ip: &str) -> String {
        match self {
            SdpRewrite::AllAddresses => rewrite_address(sdp, target_ip),
            SdpRewrite::ConnectionLine => rewrite_connection_address(sdp, target_ip),
        }
    }
}

fn dotted_quad() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").expect("static regex is valid")
    })
}

fn connection_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^(c=IN IP4 )\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}")
            .expect("static regex is valid")
    })
}

/// Replace every dotted-quad token in `sdp` with `target_ip`.
/// Input without a match is returned unchanged.
pub fn rewrite_address(sdp: &str, target_ip: &str) -> String {
    dotted_quad()
        .replace_all(sdp, regex::NoExpand(target_ip))
        .into_owned()
}

/// Replace the address of every `c=IN IP4` line, leaving the rest of the body
/// (origin line, candidates) untouched.
pub fn rewrite_connection_address(sdp: &str, target_ip: &str) -> String {
    connection_line()
        .replace_all(sdp, |caps: &regex::Captures<'_>| {
            format!("{}{}", &caps[1], target_ip)
        })
        .into_owned()
}
