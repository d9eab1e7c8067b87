use std::fmt::Display;

/// The kind of an [`Incident`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncidentKind {
    /// The transport failed or was closed by the peer.
    TransportDropped,
    /// The peer sent a message that violates the protocol.
    ProtocolViolation,
    /// The peer aborted the session.
    AbortedByPeer,
    /// The peer closed the session with GOODBYE.
    ClosedByPeer,
    /// A reply arrived for a request that is no longer pending.
    StaleReply,
    /// An ERROR or ABORT carried a URI that does not map to a known error code.
    UnknownErrorUri,
    /// A user handler failed or panicked.
    HandlerFailed,
    /// An EVENT arrived for a subscription that does not exist locally.
    EventForUnknownSubscription,
}

impl Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TransportDropped => "transport dropped",
            Self::ProtocolViolation => "protocol violation",
            Self::AbortedByPeer => "aborted by peer",
            Self::ClosedByPeer => "closed by peer",
            Self::StaleReply => "stale reply",
            Self::UnknownErrorUri => "unknown error URI",
            Self::HandlerFailed => "handler failed",
            Self::EventForUnknownSubscription => "event for unknown subscription",
        };
        write!(f, "{name}")
    }
}

/// Something notable that happened to a session outside of any operation the application
/// started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub kind: IncidentKind,
    pub message: String,
}

impl Incident {
    pub fn new<S>(kind: IncidentKind, message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Display for Incident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
