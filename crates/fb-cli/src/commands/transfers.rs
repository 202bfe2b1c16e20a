//! Transfer commands: download, upload, cancel

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;

use fb_core::api::{TransferInfo, TriggerRequest};

use crate::client::CoordinatorClient;
use crate::output::{format_transfer, print_json, print_success, print_warning};

/// Parse repeated `key=value` pairs
pub fn parse_metadata(pairs: &[String]) -> Result<Option<HashMap<String, String>>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut metadata = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("metadata must be key=value, got {:?}", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("metadata key is empty in {:?}", pair);
        }
        metadata.insert(key.to_string(), value.to_string());
    }
    Ok(Some(metadata))
}

/// Execute the download command.
///
/// With `wait`, polls the transfer every `poll` until it is terminal and
/// fails unless it completed.
pub async fn download_command(
    client: &CoordinatorClient,
    client_id: &str,
    file_path: Option<String>,
    metadata: &[String],
    wait: Option<Duration>,
    json: bool,
) -> Result<()> {
    let request = TriggerRequest {
        file_path,
        metadata: parse_metadata(metadata)?,
    };

    let reply = client
        .trigger_download(client_id, &request)
        .await
        .with_context(|| format!("Failed to start download from {}", client_id))?;

    let Some(poll) = wait else {
        if json {
            return print_json(&reply);
        }
        print_success(&reply.message);
        println!("Upload ID: {}", reply.upload_id);
        println!("Object: {}", reply.s3_key);
        return Ok(());
    };

    if !json {
        print_success(&reply.message);
        println!("Upload ID: {}", reply.upload_id);
    }
    let info = wait_for_transfer(client, &reply.upload_id, poll, json).await?;
    finish(&info, json)
}

/// Execute the upload command
pub async fn upload_command(client: &CoordinatorClient, upload_id: &str, json: bool) -> Result<()> {
    let info = client
        .upload(upload_id)
        .await
        .with_context(|| format!("Failed to get upload {}", upload_id))?;

    if json {
        return print_json(&info);
    }
    print!("{}", format_transfer(&info, Utc::now()));
    Ok(())
}

/// Execute the cancel command
pub async fn cancel_command(client: &CoordinatorClient, upload_id: &str, json: bool) -> Result<()> {
    match client.cancel_upload(upload_id).await {
        Ok(reply) if json => print_json(&reply),
        Ok(reply) => {
            print_success(&reply.message);
            Ok(())
        }
        Err(e) => {
            if e.status() == Some(409) {
                print_warning(&format!("Upload {} already finished", upload_id));
            }
            Err(e).with_context(|| format!("Failed to cancel upload {}", upload_id))
        }
    }
}

async fn wait_for_transfer(
    client: &CoordinatorClient,
    upload_id: &str,
    poll: Duration,
    quiet: bool,
) -> Result<TransferInfo> {
    let mut last_parts = None;
    loop {
        let info = client
            .upload(upload_id)
            .await
            .with_context(|| format!("Lost track of upload {}", upload_id))?;
        if info.status.is_terminal() {
            return Ok(info);
        }
        if !quiet && last_parts != Some(info.completed_parts) {
            println!(
                "{}: {}/{} parts ({:.1}%)",
                info.status, info.completed_parts, info.total_parts, info.progress
            );
            last_parts = Some(info.completed_parts);
        }
        tokio::time::sleep(poll).await;
    }
}

fn finish(info: &TransferInfo, json: bool) -> Result<()> {
    if json {
        print_json(info)?;
    } else {
        print!("{}", format_transfer(info, Utc::now()));
    }
    match info.status {
        fb_core::TransferStatus::Completed => {
            if !json {
                print_success(&format!("Upload {} completed", info.upload_id));
            }
            Ok(())
        }
        status => bail!("upload {} ended {}", info.upload_id, status),
    }
}
