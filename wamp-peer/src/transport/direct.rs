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
    Stream,
};
use tokio::sync::mpsc::{
    UnboundedReceiver,
    UnboundedSender,
    unbounded_channel,
};

use crate::{
    codec::codec::CodecId,
    core::error::TransportError,
    transport::transport::{
        Transport,
        TransportData,
        TransportInfo,
    },
};

/// A transport connecting two peers in the same process.
///
/// Messages are still encoded, so both sides must agree on the codec.
#[derive(Debug)]
pub struct DirectTransport {
    info: TransportInfo,
    tx: Option<UnboundedSender<TransportData>>,
    rx: UnboundedReceiver<TransportData>,
}

impl DirectTransport {
    /// Creates two connected transports.
    pub fn pair(info: TransportInfo) -> (DirectTransport, DirectTransport) {
        let (a_tx, b_rx) = unbounded_channel();
        let (b_tx, a_rx) = unbounded_channel();
        (
            DirectTransport {
                info,
                tx: Some(a_tx),
                rx: a_rx,
            },
            DirectTransport {
                info,
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

impl Transport for DirectTransport {
    fn info(&self) -> TransportInfo {
        self.info
    }
}

impl Stream for DirectTransport {
    type Item = Result<TransportData>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        match futures_util::ready!(self.rx.poll_recv(cx)) {
            Some(TransportData::Message(data)) if data.len() > self.info.receive_limit => {
                task::Poll::Ready(Some(Err(TransportError::InboundTooLong.into())))
            }
            Some(data) => task::Poll::Ready(Some(Ok(data))),
            None => task::Poll::Ready(None),
        }
    }
}

impl Sink<TransportData> for DirectTransport {
    type Error = Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        match &self.tx {
            Some(tx) if !tx.is_closed() => task::Poll::Ready(Ok(())),
            _ => task::Poll::Ready(Err(TransportError::Disconnected.into())),
        }
    }

    fn start_send(
        self: Pin<&mut Self>,
        item: TransportData,
    ) -> std::result::Result<(), Self::Error> {
        if let TransportData::Message(data) = &item {
            if data.len() > self.info.send_limit {
                return Err(TransportError::OutboundTooLong.into());
            }
        }
        match &self.tx {
            Some(tx) => tx
                .send(item)
                .map_err(|_| TransportError::Disconnected.into()),
            None => Err(TransportError::Disconnected.into()),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.tx = None;
        task::Poll::Ready(Ok(()))
    }
}

/// The client side of an in-process endpoint, which opens new [`DirectTransport`]s.
#[derive(Debug, Clone)]
pub struct DirectDialer {
    info: TransportInfo,
    tx: UnboundedSender<DirectTransport>,
}

impl DirectDialer {
    /// Opens a new transport, handing the other side to the listener.
    pub fn dial(&self, codec: CodecId) -> Result<DirectTransport> {
        if codec != self.info.codec {
            return Err(TransportError::BadSerializer.into());
        }
        let (client, server) = DirectTransport::pair(self.info);
        self.tx
            .send(server)
            .map_err(|_| TransportError::Shedded)?;
        Ok(client)
    }

    pub fn info(&self) -> TransportInfo {
        self.info
    }
}

/// The server side of an in-process endpoint.
#[derive(Debug)]
pub struct DirectListener {
    rx: UnboundedReceiver<DirectTransport>,
}

impl DirectListener {
    /// Waits for the next transport opened by a [`DirectDialer`].
    ///
    /// Returns [`None`] once every dialer is dropped.
    pub async fn accept(&mut self) -> Option<DirectTransport> {
        self.rx.recv().await
    }
}

/// Creates a connected dialer and listener.
pub fn direct_endpoint(info: TransportInfo) -> (DirectDialer, DirectListener) {
    let (tx, rx) = unbounded_channel();
    (DirectDialer { info, tx }, DirectListener { rx })
}

#[cfg(test)]
mod direct_test {
    use futures_util::{
        SinkExt,
        StreamExt,
    };

    use crate::{
        codec::codec::CodecId,
        core::error::TransportError,
        transport::{
            direct::{
                DirectTransport,
                direct_endpoint,
            },
            transport::{
                TransportData,
                TransportInfo,
            },
        },
    };

    #[tokio::test]
    async fn passes_data_both_ways() {
        let (mut a, mut b) = DirectTransport::pair(TransportInfo::new(CodecId::Json));
        a.send(TransportData::Message(b"[1]".to_vec())).await.unwrap();
        assert_matches::assert_matches!(b.next().await, Some(Ok(TransportData::Message(data))) => {
            assert_eq!(data, b"[1]");
        });
        b.send(TransportData::Ping(vec![1])).await.unwrap();
        assert_matches::assert_matches!(a.next().await, Some(Ok(TransportData::Ping(_))));
    }

    #[tokio::test]
    async fn ends_stream_when_peer_closes() {
        let (mut a, mut b) = DirectTransport::pair(TransportInfo::new(CodecId::Json));
        a.close().await.unwrap();
        assert_matches::assert_matches!(b.next().await, None);
        drop(a);
        assert_matches::assert_matches!(b.send(TransportData::Message(vec![])).await, Err(_));
    }

    #[tokio::test]
    async fn enforces_length_limits() {
        let mut info = TransportInfo::new(CodecId::Json);
        info.send_limit = 4;
        info.receive_limit = 2;
        let (mut a, mut b) = DirectTransport::pair(info);
        assert_matches::assert_matches!(
            a.send(TransportData::Message(vec![0; 5])).await,
            Err(err) => {
                assert_matches::assert_matches!(
                    err.downcast_ref::<TransportError>(),
                    Some(TransportError::OutboundTooLong)
                );
            }
        );
        a.send(TransportData::Message(vec![0; 3])).await.unwrap();
        assert_matches::assert_matches!(b.next().await, Some(Err(err)) => {
            assert_matches::assert_matches!(
                err.downcast_ref::<TransportError>(),
                Some(TransportError::InboundTooLong)
            );
        });
    }

    #[tokio::test]
    async fn hands_server_side_to_listener() {
        let (dialer, mut listener) = direct_endpoint(TransportInfo::new(CodecId::Json));
        let mut client = dialer.dial(CodecId::Json).unwrap();
        let mut server = listener.accept().await.unwrap();
        client
            .send(TransportData::Message(b"[]".to_vec()))
            .await
            .unwrap();
        assert_matches::assert_matches!(server.next().await, Some(Ok(TransportData::Message(_))));
        assert_matches::assert_matches!(dialer.dial(CodecId::MsgPack), Err(_));
    }
}
