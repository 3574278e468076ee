//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::{ProbeResult, SessionReport};
use crate::config::{KmsSettings, ServerOptions};

// ============================================================================
// Tables
// ============================================================================

/// Something printed as one line of a table
pub trait TableRow {
    const HEADERS: &'static [&'static str];

    fn cells(&self) -> Vec<String>;
}

impl TableRow for ServerOptions {
    const HEADERS: &'static [&'static str] = &["NAME", "ROLE", "IP", "URL"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.id().to_string(),
            if self.master { "master" } else { "slave" }.to_string(),
            self.ip.clone(),
            self.url.clone(),
        ]
    }
}

impl TableRow for ProbeResult {
    const HEADERS: &'static [&'static str] = &["NAME", "ROLE", "STATUS", "VERSION", "URL"];

    fn cells(&self) -> Vec<String> {
        let (status, version) = match &self.outcome {
            Ok(info) => ("Ready".to_string(), info.version.clone()),
            Err(e) => (format!("Unavailable ({})", e), "-".to_string()),
        };
        vec![
            self.id.clone(),
            self.role.to_string(),
            status,
            version,
            self.url.clone(),
        ]
    }
}

/// Left-aligned columns sized to their widest cell, trailing blanks trimmed
pub fn format_table<R: TableRow>(rows: &[R]) -> String {
    if rows.is_empty() {
        return "No media servers.\n".to_string();
    }

    let header: Vec<String> = R::HEADERS.iter().map(|h| h.to_string()).collect();
    let body: Vec<Vec<String>> = rows.iter().map(TableRow::cells).collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|col| {
            std::iter::once(&header)
                .chain(&body)
                .filter_map(|line| line.get(col))
                .map(String::len)
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut output = String::new();
    for line in std::iter::once(&header).chain(&body) {
        let padded: Vec<String> = line
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        output.push_str(padded.join("   ").trim_end());
        output.push('\n');
    }
    output
}

// ============================================================================
// Settings display
// ============================================================================

/// Format the configured nodes
pub fn format_servers(settings: &KmsSettings) -> String {
    let mut output = format_table(&settings.servers);
    output.push_str(&format!(
        "\nCall timeout: {}s, SDP rewrite: {:?}\n",
        settings.call_timeout_secs, settings.sdp_rewrite
    ));
    output
}

// ============================================================================
// Probe display
// ============================================================================

pub fn format_probe_results(results: &[ProbeResult]) -> String {
    format_table(results)
}

// ============================================================================
// Session display
// ============================================================================

pub fn format_session_report(report: &SessionReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("Session:   {}\n", report.session_id));
    output.push_str(&format!("Slaves:    {}\n", report.slave_count));
    output.push_str(&format!(
        "Endpoint:  {} on {}\n",
        report.endpoint_id, report.endpoint_node
    ));

    if let Some(answer) = &report.answer {
        output.push_str("\nSDP answer:\n");
        output.push_str(answer);
        if !answer.ends_with('\n') {
            output.push('\n');
        }
    }

    output
}
