use std::sync::Arc;

use async_trait::async_trait;
use beach_commands_core::{
    decode_response, encode_request, CodecError, CommandRequest, CommandResponse,
    DiscoveredCommand,
};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use transport_bus::{Bus, BusError, Envelope};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Carries one request to the command owner and returns its response.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn submit(&self, request: CommandRequest) -> Result<CommandResponse, TransportError>;
}

#[async_trait]
impl<T> CommandTransport for Arc<T>
where
    T: CommandTransport + ?Sized,
{
    async fn submit(&self, request: CommandRequest) -> Result<CommandResponse, TransportError> {
        (**self).submit(request).await
    }
}

/// Sends requests from `local` to `remote` over a [`Bus`].
#[derive(Clone)]
pub struct BusTransport {
    bus: Arc<dyn Bus>,
    local: String,
    remote: String,
}

impl BusTransport {
    pub fn new(bus: Arc<dyn Bus>, local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            bus,
            local: local.into(),
            remote: remote.into(),
        }
    }
}

#[async_trait]
impl CommandTransport for BusTransport {
    async fn submit(&self, request: CommandRequest) -> Result<CommandResponse, TransportError> {
        let payload = encode_request(&request)?;
        let pending = self.bus.request(Envelope::request(
            self.local.clone(),
            self.remote.clone(),
            payload,
        ))?;
        debug!(
            correlation_id = pending.correlation_id(),
            node = %request.node,
            "command request sent on bus"
        );
        let reply = pending.recv().await?;
        Ok(decode_response(&reply.payload)?)
    }
}

/// Talks to a command server's HTTP binding.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn discover_commands(&self) -> Result<Vec<DiscoveredCommand>, TransportError> {
        let url = format!("{}/commands", self.base_url);
        let res = self.http.get(url).send().await?;
        if res.status().is_success() {
            Ok(res.json::<Vec<DiscoveredCommand>>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(TransportError::UnexpectedStatus { status, body })
        }
    }
}

#[async_trait]
impl CommandTransport for HttpTransport {
    async fn submit(&self, request: CommandRequest) -> Result<CommandResponse, TransportError> {
        let url = format!("{}/commands", self.base_url);
        let res = self.http.post(url).json(&request).send().await?;
        if res.status().is_success() {
            Ok(res.json::<CommandResponse>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(TransportError::UnexpectedStatus { status, body })
        }
    }
}
