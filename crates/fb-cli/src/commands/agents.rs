//! Agent listing and status commands

use anyhow::{Context, Result};
use chrono::Utc;

use crate::client::CoordinatorClient;
use crate::output::{format_agent_status, format_clients, print_json, print_warning};

/// Execute the list command
pub async fn list_command(client: &CoordinatorClient, long: bool, json: bool) -> Result<()> {
    let list = client
        .list_clients()
        .await
        .context("Failed to list clients")?;

    if json {
        return print_json(&list);
    }
    println!("{}", format_clients(&list, long, Utc::now()));
    Ok(())
}

/// Execute the status command
pub async fn status_command(client: &CoordinatorClient, client_id: &str, json: bool) -> Result<()> {
    let status = client
        .client_status(client_id)
        .await
        .with_context(|| format!("Failed to get status of {}", client_id))?;

    if json {
        return print_json(&status);
    }
    if !status.connected {
        print_warning(&format!("Client {} is not connected", client_id));
    }
    print!("{}", format_agent_status(&status, Utc::now()));
    Ok(())
}
