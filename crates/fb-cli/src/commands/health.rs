//! Health command implementation

use anyhow::{Context, Result};

use crate::client::CoordinatorClient;
use crate::output::{format_health, print_json};

/// Execute the health command
pub async fn health_command(client: &CoordinatorClient, json: bool) -> Result<()> {
    let health = client
        .health()
        .await
        .with_context(|| format!("Coordinator at {} is unreachable", client.server()))?;

    if json {
        return print_json(&health);
    }
    print!("{}", format_health(&health));
    Ok(())
}
