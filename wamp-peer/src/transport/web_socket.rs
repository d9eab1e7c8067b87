use core::str;
use std::{
    pin::Pin,
    task,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    SinkExt,
    Stream,
    StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    tungstenite::Message,
};

use crate::{
    core::error::TransportError,
    transport::transport::{
        Transport,
        TransportData,
        TransportInfo,
    },
};

/// A transport implemented for a TCP stream using the WebSocket protocol.
///
/// Text frames carry JSON, and binary frames carry every other codec.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    info: TransportInfo,
    binary: bool,
}

impl WebSocketTransport {
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, info: TransportInfo) -> Self {
        Self {
            stream,
            info,
            binary: !info.codec.is_text(),
        }
    }
}

impl Transport for WebSocketTransport {
    fn info(&self) -> TransportInfo {
        self.info
    }
}

impl Stream for WebSocketTransport {
    type Item = Result<TransportData>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        loop {
            let message = match futures_util::ready!(self.stream.poll_next_unpin(cx)) {
                Some(Ok(message)) => message,
                Some(Err(err)) => return task::Poll::Ready(Some(Err(err.into()))),
                None => return task::Poll::Ready(None),
            };
            let data = match message {
                Message::Ping(data) => TransportData::Ping(data.to_vec()),
                Message::Pong(data) => TransportData::Pong(data.to_vec()),
                Message::Text(_) if self.binary => {
                    return task::Poll::Ready(Some(Err(TransportError::ExpectedBinary.into())));
                }
                Message::Binary(_) if !self.binary => {
                    return task::Poll::Ready(Some(Err(TransportError::ExpectedText.into())));
                }
                message @ (Message::Text(_) | Message::Binary(_)) => {
                    let data = message.into_data();
                    if data.len() > self.info.receive_limit {
                        return task::Poll::Ready(Some(Err(TransportError::InboundTooLong.into())));
                    }
                    TransportData::Message(data.to_vec())
                }
                Message::Close(_) => return task::Poll::Ready(None),
                // Raw frames are never produced while reading.
                Message::Frame(_) => continue,
            };
            return task::Poll::Ready(Some(Ok(data)));
        }
    }
}

impl Sink<TransportData> for WebSocketTransport {
    type Error = Error;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_ready_unpin(cx).map_err(Error::new)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: TransportData,
    ) -> std::result::Result<(), Self::Error> {
        let message = match item {
            TransportData::Ping(data) => Message::Ping(data.into()),
            TransportData::Pong(data) => Message::Pong(data.into()),
            TransportData::Message(data) => {
                if data.len() > self.info.send_limit {
                    return Err(TransportError::OutboundTooLong.into());
                }
                if self.binary {
                    Message::Binary(data.into())
                } else {
                    Message::Text(str::from_utf8(&data)?.to_owned().into())
                }
            }
        };
        self.stream.start_send_unpin(message).map_err(Error::new)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_flush_unpin(cx).map_err(Error::new)
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_close_unpin(cx).map_err(Error::new)
    }
}
