use std::{
    fmt::Debug,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    Stream,
};

use crate::codec::codec::CodecId;

/// Data sent or received over a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportData {
    /// A health check that should be answered with a [`TransportData::Pong`] carrying the same
    /// data.
    Ping(Vec<u8>),
    /// The answer to a health check.
    Pong(Vec<u8>),
    /// An encoded WAMP message.
    Message(Vec<u8>),
}

/// Properties of an established [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportInfo {
    /// The codec negotiated for the transport.
    pub codec: CodecId,
    /// The maximum length of an outbound message.
    pub send_limit: usize,
    /// The maximum length of an inbound message.
    pub receive_limit: usize,
    /// Interval between heartbeats, if enabled.
    pub heartbeat_interval: Option<Duration>,
}

impl TransportInfo {
    pub fn new(codec: CodecId) -> Self {
        Self {
            codec,
            send_limit: DEFAULT_LENGTH_LIMIT,
            receive_limit: DEFAULT_LENGTH_LIMIT,
            heartbeat_interval: None,
        }
    }
}

/// The default message length limit, in bytes.
pub const DEFAULT_LENGTH_LIMIT: usize = 16 * 1024 * 1024;

/// A transport, over which WAMP messages can be sent and received.
///
/// Implemented as a [`Stream`] and [`Sink`] that extracts out meaningful data and reports
/// violations to be handled at higher layers. The stream ending means the peer closed the
/// transport.
pub trait Transport:
    Send + Stream<Item = Result<TransportData>> + Sink<TransportData, Error = Error> + Unpin + Debug
{
    /// Properties of the transport.
    fn info(&self) -> TransportInfo;
}
