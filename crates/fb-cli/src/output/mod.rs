//! Output formatting utilities for the CLI
//!
//! Human-readable renderings of the coordinator's replies: a table of
//! connected agents, key/value blocks for agent and transfer status, and
//! colored one-line status messages.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use fb_core::api::{AgentStatusResponse, ClientList, HealthResponse, TransferInfo};

/// Render connected agents as a table
///
/// The detailed view adds architecture, activity and peer address columns.
pub fn format_clients(list: &ClientList, detailed: bool, now: DateTime<Utc>) -> String {
    if list.clients.is_empty() {
        return "No clients connected".to_string();
    }

    #[derive(Tabled)]
    struct ClientRow {
        #[tabled(rename = "CLIENT ID")]
        id: String,
        #[tabled(rename = "HOSTNAME")]
        hostname: String,
        #[tabled(rename = "OS")]
        os: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "CONNECTED")]
        connected: String,
    }

    #[derive(Tabled)]
    struct ClientRowDetailed {
        #[tabled(rename = "CLIENT ID")]
        id: String,
        #[tabled(rename = "HOSTNAME")]
        hostname: String,
        #[tabled(rename = "OS/ARCH")]
        os_arch: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "CONNECTED")]
        connected: String,
        #[tabled(rename = "LAST HEARTBEAT")]
        heartbeat: String,
        #[tabled(rename = "LAST ACTIVITY")]
        activity: String,
        #[tabled(rename = "PEER")]
        peer: String,
    }

    let meta = |c: &fb_core::api::ClientSummary, key: &str| {
        c.metadata.get(key).cloned().unwrap_or_else(|| "-".to_string())
    };

    let table = if detailed {
        let rows: Vec<ClientRowDetailed> = list
            .clients
            .iter()
            .map(|c| ClientRowDetailed {
                id: truncate(&c.client_id, 24),
                hostname: meta(c, "hostname"),
                os_arch: format!("{}/{}", meta(c, "os"), meta(c, "architecture")),
                status: meta(c, "status"),
                connected: ago(c.connected_at, now),
                heartbeat: ago(c.last_heartbeat, now),
                activity: ago(c.last_activity, now),
                peer: meta(c, "peer_addr"),
            })
            .collect();
        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(120))
            .to_string()
    } else {
        let rows: Vec<ClientRow> = list
            .clients
            .iter()
            .map(|c| ClientRow {
                id: truncate(&c.client_id, 24),
                hostname: meta(c, "hostname"),
                os: meta(c, "os"),
                status: meta(c, "status"),
                connected: ago(c.connected_at, now),
            })
            .collect();
        Table::new(rows).with(Style::rounded()).to_string()
    };

    format!("{}\n{} client(s) connected", table, list.count)
}

/// Render one agent's connection and transfer summary
pub fn format_agent_status(status: &AgentStatusResponse, now: DateTime<Utc>) -> String {
    let mut output = String::new();

    output.push_str(&format!("Client: {}\n", status.client_id));
    output.push_str(&format!(
        "Connected: {}\n",
        if status.connected { "yes" } else { "no" }
    ));
    if let Some(at) = status.connected_at {
        output.push_str(&format!("Connected Since: {} ({})\n", at.to_rfc3339(), ago(at, now)));
    }
    if let Some(at) = status.last_heartbeat {
        output.push_str(&format!("Last Heartbeat: {}\n", ago(at, now)));
    }
    if let Some(hostname) = status.metadata.get("hostname") {
        output.push_str(&format!("Hostname: {}\n", hostname));
    }
    output.push_str(&format!(
        "Uploads: {} total, {} succeeded, {} failed\n",
        status.total_uploads, status.success_uploads, status.failed_uploads
    ));

    if let Some(upload) = &status.current_upload {
        output.push_str("\n--- Latest Upload ---\n");
        output.push_str(&format_transfer(upload, now));
    }

    output
}

/// Render one transfer
pub fn format_transfer(info: &TransferInfo, now: DateTime<Utc>) -> String {
    let mut output = String::new();

    output.push_str(&format!("Upload: {}\n", info.upload_id));
    output.push_str(&format!("Client: {}\n", info.client_id));
    output.push_str(&format!("File: {}\n", info.file_path));
    output.push_str(&format!("Object: s3://{}/{}\n", info.bucket, info.s3_key));
    output.push_str(&format!("Status: {}\n", info.status));
    output.push_str(&format!(
        "Progress: {:.1}% ({}/{} parts, {})\n",
        info.progress,
        info.completed_parts,
        info.total_parts,
        format_bytes(info.bytes_uploaded)
    ));
    if info.file_size > 0 {
        output.push_str(&format!("Size: {}\n", format_bytes(info.file_size)));
    }
    output.push_str(&format!("Started: {}\n", ago(info.start_time, now)));
    if let Some(end) = info.end_time {
        let elapsed = (end - info.start_time).num_seconds().max(0) as u64;
        output.push_str(&format!("Finished: {} (took {})\n", ago(end, now), format_duration(elapsed)));
    }
    if let Some(error) = &info.error {
        output.push_str(&format!("Error: {}\n", error));
    }

    output
}

/// Render the health reply
pub fn format_health(health: &HealthResponse) -> String {
    format!(
        "Coordinator: {}\nConnected Clients: {}\nServer Time: {}\n",
        health.status,
        health.clients,
        health.time.to_rfc3339()
    )
}

/// Print any reply as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Time elapsed since `at`, like "5m 3s ago"
fn ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }
    format!("{} ago", format_duration(secs as u64))
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning in yellow
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
