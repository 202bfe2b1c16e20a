//! HTTP client for the coordinator API

use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use fb_core::api::{
    AgentStatusResponse, CancelResponse, ClientList, ErrorResponse, HealthResponse, ServiceInfo,
    TransferInfo, TriggerRequest, TriggerResponse,
};

/// Coordinator address used when none is given
pub const DEFAULT_SERVER: &str = "http://localhost:8080";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors talking to the coordinator
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server address could not be parsed
    #[error("invalid server address {0:?}")]
    InvalidServer(String),

    /// Transport failure or undecodable reply
    #[error("request to coordinator failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The coordinator answered with an error body
    #[error("{message} ({status})")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

impl ClientError {
    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Client for one coordinator
#[derive(Clone)]
pub struct CoordinatorClient {
    base: Url,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(server: &str) -> Result<Self, ClientError> {
        let mut base =
            Url::parse(server).map_err(|_| ClientError::InvalidServer(server.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidServer(server.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base, http })
    }

    /// Base URL requests are resolved against
    pub fn server(&self) -> &Url {
        &self.base
    }

    pub async fn service_info(&self) -> Result<ServiceInfo, ClientError> {
        self.get("").await
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get("health").await
    }

    /// Ask an agent to upload `file_path` (or its default file)
    pub async fn trigger_download(
        &self,
        client_id: &str,
        request: &TriggerRequest,
    ) -> Result<TriggerResponse, ClientError> {
        self.send(Method::POST, &["trigger-download", client_id], Some(request))
            .await
    }

    pub async fn client_status(&self, client_id: &str) -> Result<AgentStatusResponse, ClientError> {
        self.send::<(), _>(Method::GET, &["status", client_id], None)
            .await
    }

    pub async fn upload(&self, upload_id: &str) -> Result<TransferInfo, ClientError> {
        self.send::<(), _>(Method::GET, &["uploads", upload_id], None)
            .await
    }

    pub async fn cancel_upload(&self, upload_id: &str) -> Result<CancelResponse, ClientError> {
        self.send::<(), _>(Method::POST, &["uploads", upload_id, "cancel"], None)
            .await
    }

    pub async fn list_clients(&self) -> Result<ClientList, ClientError> {
        self.get("clients").await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        let segments: Vec<&str> = if path.is_empty() { vec![] } else { vec![path] };
        self.send::<(), _>(Method::GET, &segments, None).await
    }

    async fn send<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<R, ClientError> {
        let url = self.url(segments)?;
        tracing::debug!("{} {}", method, url);

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        Err(api_error(status, response.text().await.unwrap_or_default()))
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        if segments.is_empty() {
            return Ok(url);
        }
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::InvalidServer(self.base.to_string()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }
}

fn api_error(status: StatusCode, body: String) -> ClientError {
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => ClientError::Api {
            status: status.as_u16(),
            code: error.error,
            message: error.message,
        },
        Err(_) => ClientError::Api {
            status: status.as_u16(),
            code: "http_error".to_string(),
            message: if body.trim().is_empty() {
                status.to_string()
            } else {
                body.trim().to_string()
            },
        },
    }
}
