//! Outbound WebSocket connector

use async_trait::async_trait;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

use fb_core::config::AgentConfig;
use fb_core::AgentId;

use super::ConnectionError;

/// An open channel transport
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens the channel transport
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self) -> Result<WsStream, ConnectionError>;
}

/// Dials `coordinator_url?client_id=<id>[&token=<token>]`
pub struct ChannelConnector {
    config: AgentConfig,
    agent_id: AgentId,
}

impl ChannelConnector {
    pub fn new(config: AgentConfig, agent_id: AgentId) -> Self {
        Self { config, agent_id }
    }

    /// URL the agent dials, with identity and credential as query parameters
    pub fn connect_url(&self) -> Result<Url, ConnectionError> {
        let mut url = Url::parse(&self.config.coordinator_url).map_err(|e| {
            ConnectionError::Transport(format!(
                "invalid coordinator URL {}: {}",
                self.config.coordinator_url, e
            ))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", self.agent_id.as_str());
            if let Some(token) = &self.config.token {
                query.append_pair("token", token);
            }
        }
        Ok(url)
    }

    async fn try_connect(&self) -> Result<WsStream, ConnectionError> {
        let url = self.connect_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        if let Some(token) = &self.config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ConnectionError::Transport(format!("invalid token: {}", e)))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);

        tracing::debug!("Connecting to {}", self.config.coordinator_url);
        let (stream, response) = connect_async_with_config(request, Some(ws_config), false)
            .await
            .map_err(|e| match e {
                WsError::Http(response)
                    if matches!(
                        response.status(),
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                    ) =>
                {
                    ConnectionError::AuthRejected {
                        status: response.status().as_u16(),
                    }
                }
                WsError::Http(response) => ConnectionError::Transport(format!(
                    "coordinator answered HTTP {}",
                    response.status()
                )),
                other => ConnectionError::Transport(format!(
                    "failed to connect to {}: {}",
                    self.config.coordinator_url, other
                )),
            })?;
        tracing::trace!("Handshake completed with HTTP {}", response.status());
        Ok(stream)
    }
}

#[async_trait]
impl Dialer for ChannelConnector {
    async fn dial(&self) -> Result<WsStream, ConnectionError> {
        tokio::time::timeout(self.config.connect_timeout, self.try_connect())
            .await
            .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout))?
    }
}
