//! CLI integration tests
//!
//! Runs the `fetchback` binary with assert_cmd, against a coordinator
//! served in-process on a random port where needed. Agents are registered
//! directly in the registry; their outbound queue stands in for the socket.

use std::sync::Arc;

use assert_cmd::Command;
use predicates::prelude::*;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fb_coordinator::auth::{JwtValidator, TokenValidator};
use fb_coordinator::blob::MemoryBlobStore;
use fb_coordinator::registry::ChannelHandle;
use fb_coordinator::server;
use fb_coordinator::CoordinatorState;
use fb_core::config::CoordinatorConfig;
use fb_core::AgentId;
use fb_protocol::{Command as AgentCommand, Message};

fn fetchback() -> Command {
    let mut cmd = Command::cargo_bin("fetchback").expect("fetchback binary is built");
    cmd.env_remove("FETCHBACK_SERVER")
        .env_remove("FETCHBACK_AUTH_SECRET")
        .env_remove("RUST_LOG");
    cmd
}

struct Coordinator {
    state: Arc<CoordinatorState>,
    url: String,
}

async fn start_coordinator() -> Coordinator {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let blob = MemoryBlobStore::new("test-bucket", format!("http://{}", addr));
    let state = Arc::new(CoordinatorState::new(
        CoordinatorConfig::default(),
        Arc::new(blob.clone()),
    ));
    let app = server::router(state.clone()).merge(blob.router());
    tokio::spawn(server::serve(listener, app, state.shutdown.clone()));
    Coordinator {
        state,
        url: format!("http://{}", addr),
    }
}

async fn connect_agent(state: &CoordinatorState, id: &str) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel(16);
    let handle = ChannelHandle::new(AgentId::new(id).unwrap(), tx, CancellationToken::new());
    handle.set_metadata("hostname", format!("{}.local", id));
    state.registry.register(Arc::new(handle)).await;
    rx
}

/// Run the binary off the async runtime so the in-process server keeps serving
async fn run(cmd: Command) -> assert_cmd::assert::Assert {
    tokio::task::spawn_blocking(move || {
        let mut cmd = cmd;
        cmd.assert()
    })
    .await
    .unwrap()
}

#[test]
fn test_cli_help() {
    fetchback()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetchback"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("token"));
}

#[test]
fn test_cli_version() {
    fetchback()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetchback"));
}

#[test]
fn test_cli_download_help() {
    fetchback()
        .args(["download", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--meta"))
        .stdout(predicate::str::contains("--wait"));
}

#[test]
fn test_cli_requires_subcommand() {
    fetchback().assert().failure();
}

#[test]
fn test_cli_token_is_valid() {
    let output = fetchback()
        .args(["token", "agent-1", "--secret", "s3cret", "--ttl", "60"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let token = String::from_utf8(output.stdout).unwrap();
    let validated = JwtValidator::new("s3cret", "fetchback")
        .validate(token.trim())
        .unwrap();
    assert_eq!(validated.agent_id, "agent-1");
}

#[test]
fn test_cli_token_reads_secret_from_env() {
    fetchback()
        .args(["token", "agent-1"])
        .env("FETCHBACK_AUTH_SECRET", "from-env")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("eyJ"));
}

#[test]
fn test_cli_token_requires_secret() {
    fetchback().args(["token", "agent-1"]).assert().failure();
}

#[test]
fn test_cli_invalid_server() {
    fetchback()
        .args(["--server", "not a url", "health"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid server address"));
}

#[test]
fn test_cli_bad_metadata() {
    fetchback()
        .args(["download", "agent-1", "--meta", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("key=value"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_health() {
    let coordinator = start_coordinator().await;
    let _rx = connect_agent(&coordinator.state, "agent-1").await;

    let mut cmd = fetchback();
    cmd.args(["--server", &coordinator.url, "health"]);
    run(cmd)
        .await
        .success()
        .stdout(predicate::str::contains("Coordinator: healthy"))
        .stdout(predicate::str::contains("Connected Clients: 1"));

    let mut cmd = fetchback();
    cmd.args(["health", "--json"])
        .env("FETCHBACK_SERVER", &coordinator.url);
    run(cmd)
        .await
        .success()
        .stdout(predicate::str::contains("\"status\": \"healthy\""));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_list_clients() {
    let coordinator = start_coordinator().await;
    let _a = connect_agent(&coordinator.state, "agent-a").await;
    let _b = connect_agent(&coordinator.state, "agent-b").await;

    let mut cmd = fetchback();
    cmd.args(["--server", &coordinator.url, "list"]);
    run(cmd)
        .await
        .success()
        .stdout(predicate::str::contains("agent-a"))
        .stdout(predicate::str::contains("agent-b.local"))
        .stdout(predicate::str::contains("2 client(s) connected"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_download_sends_command() {
    let coordinator = start_coordinator().await;
    let mut rx = connect_agent(&coordinator.state, "agent-1").await;

    let mut cmd = fetchback();
    cmd.args([
        "--server",
        &coordinator.url,
        "--json",
        "download",
        "agent-1",
        "--file",
        "/var/log/app.log",
        "--meta",
        "ticket=OPS-12",
    ]);
    let output = run(cmd).await.success().get_output().stdout.clone();
    let reply: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(reply["success"], true);
    assert!(reply["s3_key"]
        .as_str()
        .unwrap()
        .starts_with("uploads/agent-1/"));

    let Message::Command(command) = rx.recv().await.unwrap() else {
        panic!("expected a command");
    };
    assert_eq!(command.message_id, reply["upload_id"].as_str().unwrap());
    let AgentCommand::DownloadFile(request) = command.command().unwrap() else {
        panic!("expected download_file");
    };
    assert_eq!(request.file_path, "/var/log/app.log");
    assert_eq!(request.metadata["ticket"], "OPS-12");

    let mut cmd = fetchback();
    cmd.args([
        "--server",
        &coordinator.url,
        "upload",
        reply["upload_id"].as_str().unwrap(),
    ]);
    run(cmd)
        .await
        .success()
        .stdout(predicate::str::contains("Status: pending"))
        .stdout(predicate::str::contains("File: /var/log/app.log"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_download_offline_agent() {
    let coordinator = start_coordinator().await;

    let mut cmd = fetchback();
    cmd.args(["--server", &coordinator.url, "download", "ghost"]);
    run(cmd)
        .await
        .failure()
        .stderr(predicate::str::contains("Failed to start download from ghost"))
        .stderr(predicate::str::contains("not connected"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_status_of_offline_agent() {
    let coordinator = start_coordinator().await;

    let mut cmd = fetchback();
    cmd.args(["--server", &coordinator.url, "status", "agent-9"]);
    run(cmd)
        .await
        .success()
        .stdout(predicate::str::contains("Client: agent-9"))
        .stdout(predicate::str::contains("Connected: no"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_cancel_unknown_upload() {
    let coordinator = start_coordinator().await;

    let mut cmd = fetchback();
    cmd.args(["--server", &coordinator.url, "cancel", "nope"]);
    run(cmd)
        .await
        .failure()
        .stderr(predicate::str::contains("Failed to cancel upload nope"));
}
