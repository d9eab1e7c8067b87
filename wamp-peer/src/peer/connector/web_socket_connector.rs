use std::time::Duration;

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use log::info;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        ClientRequestBuilder,
        http::header::SEC_WEBSOCKET_PROTOCOL,
    },
};

use crate::{
    codec::codec::CodecId,
    core::error::TransportError,
    peer::{
        config::DEFAULT_AGENT,
        connector::connector::Connector,
    },
    transport::{
        transport::{
            DEFAULT_LENGTH_LIMIT,
            Transport,
            TransportInfo,
        },
        web_socket::WebSocketTransport,
    },
};

/// Settings for reaching a router over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone)]
pub struct WebSocketHost {
    pub url: String,
    /// Value of the `User-Agent` header.
    pub agent: String,
    /// Additional headers sent with the handshake.
    pub headers: Vec<(String, String)>,
    /// The maximum length of an inbound message.
    pub max_rx_length: usize,
    /// The maximum length of an outbound message.
    pub max_tx_length: usize,
    /// Interval between heartbeats. Disabled if [`None`].
    pub heartbeat_interval: Option<Duration>,
    pub handshake_timeout: Duration,
}

impl WebSocketHost {
    pub fn new<S>(url: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            url: url.into(),
            agent: DEFAULT_AGENT.to_owned(),
            headers: Vec::new(),
            max_rx_length: DEFAULT_LENGTH_LIMIT,
            max_tx_length: DEFAULT_LENGTH_LIMIT,
            heartbeat_interval: None,
            handshake_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_max_rx_length(mut self, length: usize) -> Self {
        self.max_rx_length = length;
        self
    }

    pub fn with_max_tx_length(mut self, length: usize) -> Self {
        self.max_tx_length = length;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WebSocketHost {
    async fn connect(&self, codec: CodecId) -> Result<Box<dyn Transport>> {
        if self.max_rx_length == 0 || self.max_tx_length == 0 {
            return Err(TransportError::BadLengthLimit.into());
        }
        let mut request = ClientRequestBuilder::new(self.url.as_str().try_into()?);
        if !self.agent.is_empty() {
            request = request.with_header("User-Agent", &self.agent);
        }
        request = request.with_sub_protocol(codec.subprotocol());
        for (key, value) in &self.headers {
            request = request.with_header(key, value);
        }

        let (stream, response) =
            match tokio::time::timeout(self.handshake_timeout, connect_async(request)).await {
                Ok(result) => result?,
                Err(_) => return Err(TransportError::Timeout.into()),
            };
        let negotiated = match response.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            Some(protocol) => CodecId::try_from(protocol.to_str()?)
                .map_err(|err| Error::new(err).context("router chose an unknown sub-protocol"))?,
            None => return Err(TransportError::NoSerializer.into()),
        };
        if negotiated != codec {
            return Err(Error::new(TransportError::BadHandshake)
                .context(format!("requested {codec}, but router chose {negotiated}")));
        }
        info!("Connected to {} using {codec}", self.url);

        let info = TransportInfo {
            codec,
            send_limit: self.max_tx_length,
            receive_limit: self.max_rx_length,
            heartbeat_interval: self.heartbeat_interval,
        };
        Ok(Box::new(WebSocketTransport::new(stream, info)))
    }
}
