use std::fmt::Display;

/// The state of a WAMP session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No transport is attached.
    #[default]
    Disconnected,
    /// A transport is being established.
    Connecting,
    /// A transport is attached, but no session exists.
    Closed,
    /// HELLO was exchanged, and the session is awaiting WELCOME.
    Establishing,
    /// CHALLENGE was exchanged, and the session is awaiting WELCOME.
    Authenticating,
    /// The session is joined to a realm.
    Established,
    /// GOODBYE was sent or received, and the session is closing.
    ShuttingDown,
    /// The session hit a fatal protocol or transport error.
    Failed,
}

impl SessionState {
    /// Checks if the session is in the middle of joining a realm.
    pub fn is_joining(&self) -> bool {
        matches!(self, Self::Establishing | Self::Authenticating)
    }

    /// Checks if an ABORT may be sent in this state.
    pub fn is_abortable(&self) -> bool {
        matches!(
            self,
            Self::Establishing | Self::Authenticating | Self::Established
        )
    }

    /// Checks if a transport is attached in this state.
    pub fn has_transport(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting | Self::Failed)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Closed => "closed",
            Self::Establishing => "establishing",
            Self::Authenticating => "authenticating",
            Self::Established => "established",
            Self::ShuttingDown => "shutting down",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}
